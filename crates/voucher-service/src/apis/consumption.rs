//! Consumption reporting endpoint.
//!
//! `POST /mark-used` takes `{ "nonce": "0x…" }` once the voucher has been
//! spent on chain. Repeated reports are answered with `already: true`.

use voucher_core::VoucherEngine;
use voucher_types::{parse_nonce, APIError, MarkUsedRequest, MarkUsedResponse};

/// Marks `request.nonce` as used.
pub async fn process_mark_used(
	request: MarkUsedRequest,
	engine: &VoucherEngine,
) -> Result<MarkUsedResponse, APIError> {
	let nonce = parse_nonce(&request.nonce).map_err(|e| {
		tracing::debug!(nonce = %request.nonce, reason = %e, "Rejected nonce");
		APIError::InvalidNonce
	})?;

	let outcome = engine.report_used(&nonce).await.map_err(|e| {
		tracing::error!(error = %e, "Consumption report failed");
		APIError::from(e)
	})?;
	MarkUsedResponse::from_outcome(outcome)
}
