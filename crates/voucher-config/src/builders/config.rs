//! Configuration builder for tests and local development.
//!
//! Produces a valid [`Config`] backed by the in-memory ledger and the
//! well-known development key, without touching the filesystem.

use crate::{AccountConfig, ApiConfig, Config, IssuerConfig, LedgerConfig};
use std::collections::HashMap;
use voucher_types::IssuancePolicy;

/// Anvil's first development key. Never fund it on a real network.
pub const DEV_PRIVATE_KEY: &str =
	"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// Address derived from [`DEV_PRIVATE_KEY`].
pub const DEV_SIGNER_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
/// Placeholder consuming contract.
pub const DEV_CONTRACT_ADDRESS: &str = "0xb9b44398952d3f38cb66d9f5bd2bd03b0b809c1a";

/// Builder for creating `Config` instances with a fluent API.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	issuer_id: String,
	chain_id: u64,
	contract_address: String,
	authorized_signer: Option<String>,
	voucher_ttl_seconds: u64,
	recipient_policy: IssuancePolicy,
	private_key: String,
	ledger_primary: String,
	ledger_table: toml::Value,
	reap_interval_seconds: u64,
	reap_grace_seconds: u64,
	reap_after_issue: bool,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			issuer_id: "test-issuer".to_string(),
			chain_id: 11_155_111,
			contract_address: DEV_CONTRACT_ADDRESS.to_string(),
			authorized_signer: None,
			voucher_ttl_seconds: 300,
			recipient_policy: IssuancePolicy::Multiple,
			private_key: DEV_PRIVATE_KEY.to_string(),
			ledger_primary: "memory".to_string(),
			ledger_table: toml::Value::Table(toml::map::Map::new()),
			reap_interval_seconds: 60,
			reap_grace_seconds: 3600,
			reap_after_issue: true,
			api: None,
		}
	}

	pub fn issuer_id(mut self, id: impl Into<String>) -> Self {
		self.issuer_id = id.into();
		self
	}

	pub fn chain_id(mut self, chain_id: u64) -> Self {
		self.chain_id = chain_id;
		self
	}

	pub fn contract_address(mut self, address: impl Into<String>) -> Self {
		self.contract_address = address.into();
		self
	}

	pub fn authorized_signer(mut self, address: Option<String>) -> Self {
		self.authorized_signer = address;
		self
	}

	pub fn voucher_ttl_seconds(mut self, ttl: u64) -> Self {
		self.voucher_ttl_seconds = ttl;
		self
	}

	pub fn recipient_policy(mut self, policy: IssuancePolicy) -> Self {
		self.recipient_policy = policy;
		self
	}

	pub fn private_key(mut self, key: impl Into<String>) -> Self {
		self.private_key = key.into();
		self
	}

	/// Selects the ledger implementation and the table passed to its factory.
	pub fn ledger(mut self, primary: impl Into<String>, table: toml::Value) -> Self {
		self.ledger_primary = primary.into();
		self.ledger_table = table;
		self
	}

	/// Points the ledger at an SQLite file.
	pub fn sqlite_ledger(self, path: impl Into<String>) -> Self {
		let mut table = toml::map::Map::new();
		table.insert("path".to_string(), toml::Value::String(path.into()));
		self.ledger("sqlite", toml::Value::Table(table))
	}

	pub fn reap_interval_seconds(mut self, interval: u64) -> Self {
		self.reap_interval_seconds = interval;
		self
	}

	pub fn reap_grace_seconds(mut self, grace: u64) -> Self {
		self.reap_grace_seconds = grace;
		self
	}

	pub fn reap_after_issue(mut self, enabled: bool) -> Self {
		self.reap_after_issue = enabled;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	/// Builds the `Config` with the configured values.
	pub fn build(self) -> Config {
		let mut account_table = toml::map::Map::new();
		account_table.insert(
			"private_key".to_string(),
			toml::Value::String(self.private_key),
		);

		Config {
			issuer: IssuerConfig {
				id: self.issuer_id,
				chain_id: self.chain_id,
				contract_address: self.contract_address,
				authorized_signer: self.authorized_signer,
				voucher_ttl_seconds: self.voucher_ttl_seconds,
				recipient_policy: self.recipient_policy,
			},
			account: AccountConfig {
				primary: "local".to_string(),
				implementations: HashMap::from([(
					"local".to_string(),
					toml::Value::Table(account_table),
				)]),
			},
			ledger: LedgerConfig {
				primary: self.ledger_primary.clone(),
				implementations: HashMap::from([(self.ledger_primary, self.ledger_table)]),
				reap_interval_seconds: self.reap_interval_seconds,
				reap_grace_seconds: self.reap_grace_seconds,
				reap_after_issue: self.reap_after_issue,
			},
			api: self.api,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_build_is_valid() {
		let config = ConfigBuilder::new().build();
		assert!(config.validate().is_ok());
		assert_eq!(config.ledger.primary, "memory");
		assert!(config.account.implementations.contains_key("local"));
	}

	#[test]
	fn test_sqlite_ledger_table() {
		let config = ConfigBuilder::new().sqlite_ledger("/tmp/n.sqlite").build();
		let table = &config.ledger.implementations["sqlite"];
		assert_eq!(table.get("path").and_then(|v| v.as_str()), Some("/tmp/n.sqlite"));
	}
}
