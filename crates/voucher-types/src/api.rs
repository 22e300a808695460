//! API types for the voucher issuer HTTP API.
//!
//! Request bodies are deserialized into typed structs at the boundary; every
//! failure is expressed as an [`APIError`] whose JSON body carries a stable
//! `error` field and never the underlying internal message.

use crate::utils::{
	format_address, format_nonce, format_signature, parse_nonce, parse_recipient,
	parse_signature, HexFieldError,
};
use crate::voucher::{MarkOutcome, Voucher};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-readable description of the signing scheme, echoed in every voucher.
pub const SIGNATURE_ALGORITHM: &str =
	"EIP-191(personal_sign) over keccak256(abi.encodePacked(address,bytes32,uint256,uint256,address))";

/// Body of `POST /get-signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureRequest {
	/// Recipient address, `0x`-prefixed, 40 hex characters.
	pub to: String,
}

/// Body of `POST /mark-used`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkUsedRequest {
	/// Nonce of a previously issued voucher, `0x`-prefixed, 64 hex characters.
	pub nonce: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
	pub ok: bool,
	/// Address of the issuing key.
	pub signer: String,
}

/// Successful response of `POST /get-signature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherResponse {
	/// Recipient, lowercase hex.
	pub to: String,
	/// 32-byte nonce, lowercase hex.
	pub nonce: String,
	/// Unix timestamp (seconds) after which the voucher is invalid.
	pub expiry: u64,
	/// 65-byte signature, hex.
	pub signature: String,
	/// Address of the issuing key.
	pub signer: String,
	pub algorithm: String,
}

impl From<&Voucher> for VoucherResponse {
	fn from(voucher: &Voucher) -> Self {
		Self {
			to: format_address(&voucher.recipient),
			nonce: format_nonce(&voucher.nonce),
			expiry: voucher.expiry,
			signature: format_signature(&voucher.signature),
			signer: format_address(&voucher.signer),
			algorithm: SIGNATURE_ALGORITHM.to_string(),
		}
	}
}

impl VoucherResponse {
	/// Parses the hex fields back into a typed [`Voucher`].
	pub fn to_voucher(&self) -> Result<Voucher, HexFieldError> {
		Ok(Voucher {
			recipient: parse_recipient(&self.to)?,
			nonce: parse_nonce(&self.nonce)?,
			expiry: self.expiry,
			signature: parse_signature(&self.signature)?,
			signer: parse_recipient(&self.signer)?,
		})
	}
}

/// Successful response of `POST /mark-used`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkUsedResponse {
	pub ok: bool,
	/// Present and `true` when the nonce had already been consumed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub already: Option<bool>,
}

impl MarkUsedResponse {
	pub fn consumed() -> Self {
		Self {
			ok: true,
			already: None,
		}
	}

	pub fn already_consumed() -> Self {
		Self {
			ok: true,
			already: Some(true),
		}
	}

	/// Maps a ledger outcome to a response; `NotFound` has no success form.
	pub fn from_outcome(outcome: MarkOutcome) -> Result<Self, APIError> {
		match outcome {
			MarkOutcome::Consumed => Ok(Self::consumed()),
			MarkOutcome::AlreadyConsumed => Ok(Self::already_consumed()),
			MarkOutcome::NotFound => Err(APIError::NotFound),
		}
	}
}

/// API error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Stable error string.
	pub error: String,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum APIError {
	/// Malformed or missing recipient (400).
	InvalidRecipient,
	/// Malformed or missing nonce (400).
	InvalidNonce,
	/// Unknown nonce (404).
	NotFound,
	/// Recipient already holds a live voucher (409).
	LiveVoucherExists,
	/// Durable store unreachable; the caller may retry (503).
	LedgerUnavailable,
	/// No route matches the request path (404).
	RouteNotFound,
	/// The path exists but not for this method (405).
	MethodNotAllowed,
	/// The request did not complete within the API timeout (408).
	Timeout,
	/// Anything else (500).
	Internal,
}

impl APIError {
	/// HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::InvalidRecipient | APIError::InvalidNonce => 400,
			APIError::NotFound | APIError::RouteNotFound => 404,
			APIError::MethodNotAllowed => 405,
			APIError::Timeout => 408,
			APIError::LiveVoucherExists => 409,
			APIError::LedgerUnavailable => 503,
			APIError::Internal => 500,
		}
	}

	/// Stable value of the `error` field.
	pub fn error_code(&self) -> &'static str {
		match self {
			APIError::InvalidRecipient => "invalid to",
			APIError::InvalidNonce => "invalid nonce",
			APIError::NotFound => "not found",
			APIError::LiveVoucherExists => "voucher already issued",
			APIError::LedgerUnavailable => "ledger unavailable",
			APIError::RouteNotFound => "route not found",
			APIError::MethodNotAllowed => "method not allowed",
			APIError::Timeout => "request timeout",
			APIError::Internal => "internal",
		}
	}

	pub fn to_error_response(&self) -> ErrorResponse {
		ErrorResponse {
			error: self.error_code().to_string(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.error_code(), self.status_code())
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{address, Signature, B256, U256};

	fn sample_voucher() -> Voucher {
		Voucher {
			recipient: address!("0xABCDEF0000000000000000000000000000001234"),
			nonce: B256::repeat_byte(0x42),
			expiry: 1_700_000_300,
			signature: Signature::new(U256::from(1u64), U256::from(2u64), true),
			signer: address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
		}
	}

	#[test]
	fn test_voucher_response_fields() {
		let response = VoucherResponse::from(&sample_voucher());

		assert_eq!(response.to, "0xabcdef0000000000000000000000000000001234");
		assert_eq!(response.nonce.len(), 66);
		assert_eq!(response.signature.len(), 2 + 130);
		assert!(response.signature.ends_with("1c"));
		assert_eq!(response.algorithm, SIGNATURE_ALGORITHM);
	}

	#[test]
	fn test_voucher_response_parses_back() {
		let voucher = sample_voucher();
		let parsed = VoucherResponse::from(&voucher).to_voucher().unwrap();
		assert_eq!(parsed, voucher);
	}

	#[test]
	fn test_mark_used_response_shapes() {
		let first = serde_json::to_value(MarkUsedResponse::consumed()).unwrap();
		assert_eq!(first, serde_json::json!({ "ok": true }));

		let repeat = serde_json::to_value(MarkUsedResponse::already_consumed()).unwrap();
		assert_eq!(repeat, serde_json::json!({ "ok": true, "already": true }));

		assert_eq!(
			MarkUsedResponse::from_outcome(MarkOutcome::NotFound),
			Err(APIError::NotFound)
		);
	}

	#[test]
	fn test_error_codes_are_stable() {
		assert_eq!(APIError::InvalidRecipient.status_code(), 400);
		assert_eq!(
			serde_json::to_value(APIError::InvalidRecipient.to_error_response()).unwrap(),
			serde_json::json!({ "error": "invalid to" })
		);
		assert_eq!(APIError::NotFound.error_code(), "not found");
		assert_eq!(APIError::Internal.status_code(), 500);
		assert_eq!(APIError::LedgerUnavailable.status_code(), 503);
		assert_eq!(APIError::RouteNotFound.status_code(), 404);
		assert_eq!(APIError::MethodNotAllowed.status_code(), 405);
		assert_eq!(APIError::Timeout.error_code(), "request timeout");
	}
}
