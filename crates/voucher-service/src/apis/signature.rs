//! Voucher issuance endpoint.
//!
//! `POST /get-signature` takes `{ "to": "0x…" }` and answers with a signed
//! voucher the recipient can submit to the consuming contract.

use voucher_core::{IssuanceError, VoucherEngine};
use voucher_types::{APIError, GetSignatureRequest, VoucherResponse};

/// Issues a voucher for `request.to`.
///
/// Internal failures are logged with their cause; the caller only sees the
/// stable error code.
pub async fn process_signature_request(
	request: GetSignatureRequest,
	engine: &VoucherEngine,
) -> Result<VoucherResponse, APIError> {
	match engine.issue(&request.to).await {
		Ok(voucher) => Ok(VoucherResponse::from(&voucher)),
		Err(e) => {
			match &e {
				IssuanceError::InvalidRequest(reason) => {
					tracing::debug!(to = %request.to, reason = %reason, "Rejected recipient")
				}
				IssuanceError::LiveVoucherExists => {
					tracing::info!(to = %request.to, "Recipient already holds a live voucher")
				}
				IssuanceError::LedgerUnavailable(_) | IssuanceError::Signing(_) => {
					tracing::error!(error = %e, "Voucher issuance failed")
				}
			}
			Err(APIError::from(e))
		}
	}
}
