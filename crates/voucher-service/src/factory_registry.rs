//! Factory registry for issuer implementations.
//!
//! Every ledger and account implementation compiled into the binary registers
//! itself here under its configuration name, so the builder can instantiate
//! whichever one the configuration selects.

use std::collections::HashMap;
use std::sync::OnceLock;
use voucher_account::AccountFactory;
use voucher_config::Config;
use voucher_core::{VoucherBuilder, VoucherEngine, VoucherFactories};
use voucher_storage::LedgerFactory;

/// Registry of all implementation factories, keyed by name.
pub struct FactoryRegistry {
	pub ledger: HashMap<String, LedgerFactory>,
	pub account: HashMap<String, AccountFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			ledger: HashMap::new(),
			account: HashMap::new(),
		}
	}

	/// Register a ledger implementation
	pub fn register_ledger(&mut self, name: impl Into<String>, factory: LedgerFactory) {
		self.ledger.insert(name.into(), factory);
	}

	/// Register an account implementation
	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in voucher_storage::get_all_implementations() {
			tracing::debug!("Registering ledger implementation: {}", name);
			registry.register_ledger(name, factory);
		}

		for (name, factory) in voucher_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		registry
	})
}

/// Picks the registered factories for every implementation named in `implementations`.
fn select_factories<F: Copy>(
	kind: &str,
	registered: &HashMap<String, F>,
	implementations: &HashMap<String, toml::Value>,
) -> Result<HashMap<String, F>, String> {
	let mut factories = HashMap::new();
	for name in implementations.keys() {
		match registered.get(name) {
			Some(factory) => {
				factories.insert(name.clone(), *factory);
			}
			None => {
				let mut available: Vec<_> = registered.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					kind,
					name,
					available.join(", ")
				));
			}
		}
	}
	Ok(factories)
}

/// Builds the voucher engine from configuration using the registry.
pub async fn build_engine_from_config(
	config: Config,
) -> Result<VoucherEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let factories = VoucherFactories {
		ledger_factories: select_factories(
			"ledger",
			&registry.ledger,
			&config.ledger.implementations,
		)?,
		account_factories: select_factories(
			"account",
			&registry.account,
			&config.account.implementations,
		)?,
	};

	Ok(VoucherBuilder::new(config).build(factories).await?)
}
