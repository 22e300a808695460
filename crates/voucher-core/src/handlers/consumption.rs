//! Consumption handler.
//!
//! Records that a voucher's nonce was spent. Reports come from an untrusted
//! caller, so unknown nonces are logged and answered, never treated as fatal.

use super::IssuanceError;
use std::sync::Arc;
use voucher_storage::LedgerService;
use voucher_types::{truncate_id, MarkOutcome, Nonce};

/// Handler for consumption reports.
pub struct ConsumptionHandler {
	ledger: Arc<LedgerService>,
}

impl ConsumptionHandler {
	pub fn new(ledger: Arc<LedgerService>) -> Self {
		Self { ledger }
	}

	/// Marks `nonce` as used.
	///
	/// Repeated reports return [`MarkOutcome::AlreadyConsumed`] and change
	/// nothing.
	pub async fn report_used(&self, nonce: &Nonce) -> Result<MarkOutcome, IssuanceError> {
		let id = truncate_id(&nonce.to_string());
		let outcome = self.ledger.mark_used(nonce).await.map_err(|e| {
			tracing::error!(nonce = %id, error = %e, "Failed to mark nonce used");
			IssuanceError::from(e)
		})?;

		match outcome {
			MarkOutcome::Consumed => tracing::info!(nonce = %id, "Voucher consumed"),
			MarkOutcome::AlreadyConsumed => tracing::debug!(nonce = %id, "Voucher already consumed"),
			MarkOutcome::NotFound => tracing::warn!(nonce = %id, "Consumption reported for unknown nonce"),
		}
		Ok(outcome)
	}
}
