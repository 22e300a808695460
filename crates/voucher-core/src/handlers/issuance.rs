//! Issuance handler.
//!
//! Turns a recipient address into a signed voucher: reserve a fresh nonce in
//! the ledger, build the digest for the configured chain and contract, and
//! sign it with the issuer key. No lock is taken across these steps; nonce
//! uniqueness is enforced by the ledger alone.

use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use voucher_account::AccountService;
use voucher_storage::{LedgerError, LedgerService};
use voucher_types::{
	parse_recipient, truncate_id, APIError, Address, IssuancePolicy, Voucher, VoucherDomain,
};

/// Errors surfaced by issuance and consumption requests.
#[derive(Debug, Error)]
pub enum IssuanceError {
	/// Malformed input; the caller's fault and never retried here.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	/// The durable store could not be read or written.
	#[error("Ledger unavailable: {0}")]
	LedgerUnavailable(String),
	/// The issuer key failed to sign.
	#[error("Signing failed: {0}")]
	Signing(String),
	/// The recipient still holds an unused, unexpired voucher.
	#[error("Recipient already holds a live voucher")]
	LiveVoucherExists,
}

impl From<LedgerError> for IssuanceError {
	fn from(e: LedgerError) -> Self {
		match e {
			LedgerError::LiveVoucherExists => IssuanceError::LiveVoucherExists,
			other => IssuanceError::LedgerUnavailable(other.to_string()),
		}
	}
}

impl From<IssuanceError> for APIError {
	fn from(e: IssuanceError) -> Self {
		match e {
			IssuanceError::InvalidRequest(_) => APIError::InvalidRecipient,
			IssuanceError::LedgerUnavailable(_) => APIError::LedgerUnavailable,
			IssuanceError::LiveVoucherExists => APIError::LiveVoucherExists,
			IssuanceError::Signing(_) => APIError::Internal,
		}
	}
}

/// Handler that issues signed vouchers.
pub struct IssuanceHandler {
	ledger: Arc<LedgerService>,
	account: Arc<AccountService>,
	domain: VoucherDomain,
	signer: Address,
	ttl_seconds: u64,
	policy: IssuancePolicy,
}

impl IssuanceHandler {
	pub fn new(
		ledger: Arc<LedgerService>,
		account: Arc<AccountService>,
		domain: VoucherDomain,
		signer: Address,
		ttl_seconds: u64,
		policy: IssuancePolicy,
	) -> Self {
		Self {
			ledger,
			account,
			domain,
			signer,
			ttl_seconds,
			policy,
		}
	}

	/// Validates `recipient` and issues a voucher for it.
	///
	/// Validation happens before the ledger is touched, so a malformed address
	/// never creates a record.
	pub async fn issue(&self, recipient: &str) -> Result<Voucher, IssuanceError> {
		let recipient =
			parse_recipient(recipient).map_err(|e| IssuanceError::InvalidRequest(e.to_string()))?;
		self.issue_to(recipient).await
	}

	/// Issues a voucher for an already validated recipient.
	///
	/// If signing fails after the nonce was reserved, the record is left
	/// unused and expires on its own.
	#[instrument(skip_all, fields(recipient = %recipient))]
	pub async fn issue_to(&self, recipient: Address) -> Result<Voucher, IssuanceError> {
		let record = self
			.ledger
			.reserve(recipient, self.ttl_seconds, self.policy)
			.await?;
		let nonce = truncate_id(&record.nonce.to_string());

		let digest = self
			.domain
			.digest(&record.recipient, &record.nonce, record.expiry);
		let signature = self.account.sign_digest(&digest).await.map_err(|e| {
			tracing::error!(nonce = %nonce, error = %e, "Failed to sign voucher");
			IssuanceError::Signing(e.to_string())
		})?;

		tracing::info!(nonce = %nonce, expiry = record.expiry, "Issued voucher");
		Ok(Voucher {
			recipient: record.recipient,
			nonce: record.nonce,
			expiry: record.expiry,
			signature,
			signer: self.signer,
		})
	}
}
