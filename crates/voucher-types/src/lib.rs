//! Common types module for the voucher issuer.
//!
//! This module defines the data model shared by every component of the issuer:
//! the persisted voucher record, the signed voucher handed to callers, the HTTP
//! contract, configuration schema primitives and the canonical digest encoding.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Canonical packed encoding and hashing of voucher fields.
pub mod digest;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting wrapper for private key material.
pub mod secret_string;
/// Utility functions for hex parsing, formatting and time.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;
/// Voucher records, signed vouchers and ledger outcomes.
pub mod voucher;

// Re-export all types for convenient access
pub use alloy_primitives::{Address, Signature, B256};
pub use api::*;
pub use digest::{build_digest, encode_packed, PackedEncoder, VoucherDomain, PACKED_MESSAGE_LEN};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{
	current_timestamp, format_address, format_nonce, format_signature, parse_nonce,
	parse_recipient, parse_signature, truncate_id, without_0x_prefix, HexFieldError,
};
pub use validation::*;
pub use voucher::*;
