//! String formatting utilities.
//!
//! Every hex value the issuer emits is lowercase and `0x`-prefixed, matching
//! what callers feed back into the consuming contract.

use alloy_primitives::{hex, Address, Signature, B256};

/// Truncates a hex string for log output: the first 10 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 10 {
		id.to_string()
	} else {
		format!("{}..", &id[..10])
	}
}

/// Removes the "0x" or "0X" prefix from a hex string if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Lowercase `0x`-prefixed address, no checksum casing.
pub fn format_address(address: &Address) -> String {
	hex::encode_prefixed(address.as_slice())
}

/// Lowercase `0x`-prefixed 32-byte nonce.
pub fn format_nonce(nonce: &B256) -> String {
	hex::encode_prefixed(nonce.as_slice())
}

/// `0x`-prefixed 65-byte `r || s || v` signature with `v` in {27, 28}.
pub fn format_signature(signature: &Signature) -> String {
	hex::encode_prefixed(signature.as_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0x1234"), "0x1234");
		assert_eq!(truncate_id("0x1234567890abcdef"), "0x12345678..");
	}

	#[test]
	fn test_without_prefix() {
		assert_eq!(without_0x_prefix("0Xabcd"), "abcd");
		assert_eq!(without_0x_prefix("abcd"), "abcd");
	}

	#[test]
	fn test_format_address_is_lowercase() {
		let addr = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
		assert_eq!(
			format_address(&addr),
			"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);
	}

	#[test]
	fn test_format_nonce_width() {
		let formatted = format_nonce(&B256::repeat_byte(0xab));
		assert_eq!(formatted.len(), 2 + 64);
		assert!(formatted.starts_with("0xabab"));
	}
}
