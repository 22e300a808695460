//! Strict parsing of hex-encoded fields received over HTTP.
//!
//! Inputs must carry a `0x` prefix and exactly the expected number of hex
//! digits. Letter case is not significant and no checksum is enforced.

use super::formatting::without_0x_prefix;
use alloy_primitives::{hex, Address, Signature, B256};
use thiserror::Error;

/// Errors produced while parsing a hex field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexFieldError {
	#[error("missing 0x prefix")]
	MissingPrefix,
	#[error("expected {expected} hex characters, got {actual}")]
	InvalidLength { expected: usize, actual: usize },
	#[error("invalid hex: {0}")]
	InvalidHex(String),
	#[error("invalid signature: {0}")]
	InvalidSignature(String),
}

fn decode_fixed(input: &str, byte_len: usize) -> Result<Vec<u8>, HexFieldError> {
	if !input.starts_with("0x") && !input.starts_with("0X") {
		return Err(HexFieldError::MissingPrefix);
	}
	let digits = without_0x_prefix(input);
	if digits.len() != byte_len * 2 {
		return Err(HexFieldError::InvalidLength {
			expected: byte_len * 2,
			actual: digits.len(),
		});
	}
	hex::decode(digits).map_err(|e| HexFieldError::InvalidHex(e.to_string()))
}

/// Parses a `0x`-prefixed 20-byte recipient address.
pub fn parse_recipient(input: &str) -> Result<Address, HexFieldError> {
	let bytes = decode_fixed(input, 20)?;
	Ok(Address::from_slice(&bytes))
}

/// Parses a `0x`-prefixed 32-byte nonce.
pub fn parse_nonce(input: &str) -> Result<B256, HexFieldError> {
	let bytes = decode_fixed(input, 32)?;
	Ok(B256::from_slice(&bytes))
}

/// Parses a `0x`-prefixed 65-byte `r || s || v` signature.
pub fn parse_signature(input: &str) -> Result<Signature, HexFieldError> {
	let bytes = decode_fixed(input, 65)?;
	Signature::from_raw(&bytes).map_err(|e| HexFieldError::InvalidSignature(e.to_string()))
}
