//! Utility functions for common type conversions and transformations.
//!
//! This module provides helpers for parsing and rendering the hex-encoded
//! fields that cross the HTTP boundary, and for reading the wall clock.

pub mod conversion;
pub mod formatting;
pub mod helpers;

pub use conversion::{parse_nonce, parse_recipient, parse_signature, HexFieldError};
pub use formatting::{
	format_address, format_nonce, format_signature, truncate_id, without_0x_prefix,
};
pub use helpers::current_timestamp;
