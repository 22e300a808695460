//! Account management module for the voucher issuer.
//!
//! This module provides abstractions for the issuer's signing key. Vouchers
//! are signed as personal messages (EIP-191) over the 32-byte voucher digest,
//! which is exactly what the consuming contract recovers the signer from.

use async_trait::async_trait;
use thiserror::Error;
use voucher_types::{Address, ImplementationRegistry, Signature, B256};

pub mod verify;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

pub use verify::{personal_message_hash, recover_signer, verify_voucher, VerifyError};

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for account implementations.
///
/// Implementations keep their key material private; only the derived address
/// and signatures leave them.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Retrieves the address associated with this account.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs `message` with the EIP-191 personal-message prefix.
	///
	/// Returns a 65-byte recoverable signature.
	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
///
/// Returns a vector of (name, factory) tuples for all available account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Retrieves the address associated with the managed account.
	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	/// Signs a voucher digest.
	///
	/// The digest bytes are the message: the signer hashes
	/// `"\x19Ethereum Signed Message:\n32" || digest` before signing.
	pub async fn sign_digest(&self, digest: &B256) -> Result<Signature, AccountError> {
		self.implementation.sign_message(digest.as_slice()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::local::LocalAccount;
	use voucher_types::SecretString;

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	#[tokio::test]
	async fn test_signed_digest_recovers_to_address() {
		let account = LocalAccount::new(&SecretString::from(KEY)).unwrap();
		let service = AccountService::new(Box::new(account));

		let digest = B256::repeat_byte(0x42);
		let signature = service.sign_digest(&digest).await.unwrap();
		let address = service.get_address().await.unwrap();

		assert_eq!(recover_signer(&digest, &signature).unwrap(), address);
	}

	#[test]
	fn test_registry_lists_local() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["local"]);
	}
}
