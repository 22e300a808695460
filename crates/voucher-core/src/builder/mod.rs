//! Builder pattern for constructing voucher engines.
//!
//! Composes a VoucherEngine from ledger and account implementations chosen
//! by name in the configuration. Factories are supplied by the caller, so
//! the binary decides which backends are compiled in.

use crate::engine::VoucherEngine;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use voucher_account::{recover_signer, AccountError, AccountInterface, AccountService};
use voucher_config::Config;
use voucher_storage::{LedgerError, LedgerInterface, LedgerService};
use voucher_types::{VoucherDomain, B256};

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
	/// The signing key is unusable or is not the authorized signer.
	#[error("Signing error: {0}")]
	Signing(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct VoucherFactories<LF, AF> {
	pub ledger_factories: HashMap<String, LF>,
	pub account_factories: HashMap<String, AF>,
}

/// Builder for constructing a VoucherEngine with pluggable implementations.
pub struct VoucherBuilder {
	config: Config,
}

impl VoucherBuilder {
	/// Creates a new VoucherBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the VoucherEngine using the primary implementation of each component.
	pub async fn build<LF, AF>(
		self,
		factories: VoucherFactories<LF, AF>,
	) -> Result<VoucherEngine, BuilderError>
	where
		LF: Fn(&toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
	{
		let ledger_backend = create_primary(
			"ledger",
			&self.config.ledger.primary,
			&self.config.ledger.implementations,
			&factories.ledger_factories,
			BuilderError::Config,
		)?;
		let ledger = Arc::new(LedgerService::new(ledger_backend));

		let account_backend = create_primary(
			"account",
			&self.config.account.primary,
			&self.config.account.implementations,
			&factories.account_factories,
			BuilderError::Signing,
		)?;
		let account = Arc::new(AccountService::new(account_backend));

		// Fetch the signer address once during initialization
		let signer = account.get_address().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to get signer address");
			BuilderError::Signing(format!("Failed to get signer address: {}", e))
		})?;

		if let Some(authorized) = self
			.config
			.issuer
			.authorized_signer()
			.map_err(|e| BuilderError::Config(e.to_string()))?
		{
			if authorized != signer {
				tracing::error!(
					component = "account",
					signer = %signer,
					authorized = %authorized,
					"Signing key does not match the authorized signer"
				);
				return Err(BuilderError::Signing(format!(
					"Key address {} does not match authorized signer {}",
					signer, authorized
				)));
			}
		}

		// Sign a throwaway digest so a broken key stops startup instead of requests
		let probe = B256::repeat_byte(0x01);
		let recovered = account
			.sign_digest(&probe)
			.await
			.map_err(|e| BuilderError::Signing(e.to_string()))
			.and_then(|signature| {
				recover_signer(&probe, &signature).map_err(|e| BuilderError::Signing(e.to_string()))
			})?;
		if recovered != signer {
			return Err(BuilderError::Signing(format!(
				"Signature recovers to {}, expected {}",
				recovered, signer
			)));
		}

		let contract = self
			.config
			.issuer
			.contract()
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		let domain = VoucherDomain::new(self.config.issuer.chain_id, contract);

		Ok(VoucherEngine::new(
			self.config,
			ledger,
			account,
			signer,
			domain,
		))
	}
}

/// Instantiates the primary implementation of one component.
///
/// A failing factory is reported through `on_factory_error`, so an unusable
/// key surfaces as [`BuilderError::Signing`] rather than a config problem.
fn create_primary<T, E, F>(
	component: &'static str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
	on_factory_error: fn(String) -> BuilderError,
) -> Result<Box<T>, BuilderError>
where
	T: ?Sized,
	E: std::fmt::Display,
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	for name in implementations.keys() {
		if name != primary {
			tracing::debug!(component, implementation = %name, "Skipping non-primary implementation");
		}
	}

	let config = implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' has no configuration",
			component, primary
		))
	})?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!("{} implementation '{}'", component, primary))
	})?;

	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component, implementation = %primary, "Loaded");
			Ok(implementation)
		}
		Err(e) => {
			tracing::error!(
				component,
				implementation = %primary,
				error = %e,
				"Failed to create implementation"
			);
			Err(on_factory_error(format!(
				"Failed to create {} implementation '{}': {}",
				component, primary, e
			)))
		}
	}
}
