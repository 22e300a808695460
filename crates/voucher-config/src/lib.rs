//! Configuration module for the voucher issuer.
//!
//! This module provides structures and utilities for managing issuer configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Environment variables
//!
//! Any value may reference `${VAR}` or `${VAR:-default}`. Secrets such as the
//! signing key are expected to arrive this way rather than being written into
//! the file.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use voucher_types::{parse_recipient, Address, IssuancePolicy};

/// Upper bound for every interval or lifetime expressed in seconds.
const MAX_SECONDS: u64 = 86_400;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the voucher issuer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of the issuer and the domain its vouchers are bound to.
	pub issuer: IssuerConfig,
	/// Configuration for the signing account.
	pub account: AccountConfig,
	/// Configuration for the nonce ledger.
	pub ledger: LedgerConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the issuer instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssuerConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Chain the consuming contract is deployed on.
	#[serde(default = "default_chain_id")]
	pub chain_id: u64,
	/// Address of the consuming contract, bound into every digest.
	pub contract_address: String,
	/// Address the consuming contract trusts. When set, the configured key
	/// must derive exactly this address or startup fails.
	#[serde(default)]
	pub authorized_signer: Option<String>,
	/// Lifetime of a freshly issued voucher.
	#[serde(default = "default_voucher_ttl_seconds")]
	pub voucher_ttl_seconds: u64,
	/// Whether a recipient may hold several live vouchers at once.
	#[serde(default)]
	pub recipient_policy: IssuancePolicy,
}

impl IssuerConfig {
	/// Parsed consuming contract address.
	pub fn contract(&self) -> Result<Address, ConfigError> {
		parse_recipient(&self.contract_address).map_err(|e| {
			ConfigError::Validation(format!(
				"Invalid issuer.contract_address '{}': {}",
				self.contract_address, e
			))
		})
	}

	/// Parsed authorized signer; an empty string counts as unset.
	pub fn authorized_signer(&self) -> Result<Option<Address>, ConfigError> {
		match self.authorized_signer.as_deref().map(str::trim) {
			None | Some("") => Ok(None),
			Some(raw) => parse_recipient(raw).map(Some).map_err(|e| {
				ConfigError::Validation(format!(
					"Invalid issuer.authorized_signer '{}': {}",
					raw, e
				))
			}),
		}
	}
}

/// Sepolia.
fn default_chain_id() -> u64 {
	11_155_111
}

fn default_voucher_ttl_seconds() -> u64 {
	300
}

/// Configuration for account management.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the nonce ledger.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of ledger implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval between periodic reap passes.
	#[serde(default = "default_reap_interval_seconds")]
	pub reap_interval_seconds: u64,
	/// How long past `expiry` an unused record is retained, so late
	/// consumption reports for in-flight transactions still find it.
	#[serde(default = "default_reap_grace_seconds")]
	pub reap_grace_seconds: u64,
	/// Run a best-effort reap after each successful issuance.
	#[serde(default = "default_true")]
	pub reap_after_issue: bool,
}

fn default_reap_interval_seconds() -> u64 {
	300
}

fn default_reap_grace_seconds() -> u64 {
	3600
}

fn default_true() -> bool {
	true
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default = "default_true")]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			host: default_api_host(),
			port: default_api_port(),
			timeout_seconds: default_api_timeout(),
			max_request_size: default_max_request_size(),
		}
	}
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	8787
}

fn default_api_timeout() -> u64 {
	30
}

/// Request bodies are a single short JSON field; 64KiB is generous.
fn default_max_request_size() -> usize {
	64 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}; the default may be
/// empty.
///
/// Input strings are limited to 1MB to keep regex matching bounded.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				}
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with async environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Effective API settings; an absent `[api]` section means defaults.
	pub fn api_or_default(&self) -> ApiConfig {
		self.api.clone().unwrap_or_default()
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// Implementation tables are only checked for presence here; each backend
	/// validates its own table against its schema when it is constructed.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.issuer.id.trim().is_empty() {
			return Err(ConfigError::Validation("Issuer ID cannot be empty".into()));
		}
		if self.issuer.chain_id == 0 {
			return Err(ConfigError::Validation(
				"issuer.chain_id must be greater than 0".into(),
			));
		}
		self.issuer.contract()?;
		self.issuer.authorized_signer()?;
		check_seconds("issuer.voucher_ttl_seconds", self.issuer.voucher_ttl_seconds)?;

		check_primary("account", &self.account.primary, &self.account.implementations)?;
		check_primary("ledger", &self.ledger.primary, &self.ledger.implementations)?;
		check_seconds(
			"ledger.reap_interval_seconds",
			self.ledger.reap_interval_seconds,
		)?;

		if let Some(api) = &self.api {
			if api.enabled && api.timeout_seconds == 0 {
				return Err(ConfigError::Validation(
					"api.timeout_seconds must be greater than 0".into(),
				));
			}
			if api.max_request_size == 0 {
				return Err(ConfigError::Validation(
					"api.max_request_size must be greater than 0".into(),
				));
			}
		}

		Ok(())
	}
}

fn check_seconds(field: &str, value: u64) -> Result<(), ConfigError> {
	if value == 0 || value > MAX_SECONDS {
		return Err(ConfigError::Validation(format!(
			"{} must be between 1 and {} (got {})",
			field, MAX_SECONDS, value
		)));
	}
	Ok(())
}

fn check_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses a TOML string, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
