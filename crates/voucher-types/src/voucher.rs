//! Voucher data model.
//!
//! A [`VoucherRecord`] is the unit persisted by the nonce ledger. A [`Voucher`]
//! is what the issuer hands back to a caller once the record has been reserved
//! and its digest signed.

use alloy_primitives::{Address, Signature, B256};
use serde::{Deserialize, Serialize};

/// A 32-byte random value binding a voucher to exactly one issuance.
pub type Nonce = B256;

/// Persisted voucher record, keyed by `nonce`.
///
/// Only `used` ever changes after insertion, and only from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRecord {
	/// Primary key; unique across the full history of the ledger.
	pub nonce: Nonce,
	/// Address the voucher authorizes.
	pub recipient: Address,
	/// Unix timestamp (seconds) after which the voucher is invalid.
	pub expiry: u64,
	/// Whether consumption has been reported.
	pub used: bool,
	/// Unix timestamp of issuance.
	pub created_at: u64,
}

impl VoucherRecord {
	/// Creates a fresh, unused record.
	pub fn new(nonce: Nonce, recipient: Address, expiry: u64, created_at: u64) -> Self {
		Self {
			nonce,
			recipient,
			expiry,
			used: false,
			created_at,
		}
	}

	/// A voucher is valid strictly before its expiry timestamp.
	pub fn is_expired_at(&self, now: u64) -> bool {
		self.expiry <= now
	}

	/// Unused and not yet expired.
	pub fn is_live_at(&self, now: u64) -> bool {
		!self.used && !self.is_expired_at(now)
	}

	/// Whether a reap pass with the given cutoff (`now - grace`) removes this record.
	pub fn is_reapable(&self, cutoff: u64) -> bool {
		self.used || self.expiry < cutoff
	}
}

/// Result of reporting a nonce as consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
	/// The record transitioned from unused to used.
	Consumed,
	/// The record was already used; nothing changed.
	AlreadyConsumed,
	/// No record exists for the nonce.
	NotFound,
}

/// Whether a recipient may hold more than one live voucher at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuancePolicy {
	/// Every request yields a new voucher.
	#[default]
	Multiple,
	/// Refuse issuance while the recipient holds an unused, unexpired voucher.
	SingleLive,
}

/// A signed voucher as returned by the issuance service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
	pub recipient: Address,
	pub nonce: Nonce,
	pub expiry: u64,
	/// 65-byte `r || s || v` signature over the personal-message digest.
	pub signature: Signature,
	/// Address of the key that produced `signature`.
	pub signer: Address,
}
