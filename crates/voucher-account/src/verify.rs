//! Off-chain voucher verification.
//!
//! Mirrors what the consuming contract does: rebuild the digest for its own
//! chain and address, recover the signer from the personal-message hash,
//! compare with the trusted signer and reject expired vouchers.

use alloy_primitives::eip191_hash_message;
use thiserror::Error;
use voucher_types::{Address, Signature, Voucher, VoucherDomain, B256};

/// Reasons a voucher fails verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
	#[error("signature recovery failed: {0}")]
	Recovery(String),
	#[error("signed by {recovered}, expected {expected}")]
	SignerMismatch { expected: Address, recovered: Address },
	#[error("voucher expired at {expiry} (now {now})")]
	Expired { expiry: u64, now: u64 },
}

/// `keccak256("\x19Ethereum Signed Message:\n32" || digest)`.
pub fn personal_message_hash(digest: &B256) -> B256 {
	eip191_hash_message(digest.as_slice())
}

/// Recovers the address that signed `digest` as a personal message.
pub fn recover_signer(digest: &B256, signature: &Signature) -> Result<Address, VerifyError> {
	signature
		.recover_address_from_msg(digest.as_slice())
		.map_err(|e| VerifyError::Recovery(e.to_string()))
}

/// Checks a voucher the way the consuming contract does.
///
/// A voucher is accepted only while `expiry > now`.
pub fn verify_voucher(
	voucher: &Voucher,
	domain: &VoucherDomain,
	expected_signer: Address,
	now: u64,
) -> Result<(), VerifyError> {
	let digest = domain.digest(&voucher.recipient, &voucher.nonce, voucher.expiry);
	let recovered = recover_signer(&digest, &voucher.signature)?;
	if recovered != expected_signer {
		return Err(VerifyError::SignerMismatch {
			expected: expected_signer,
			recovered,
		});
	}
	if voucher.expiry <= now {
		return Err(VerifyError::Expired {
			expiry: voucher.expiry,
			now,
		});
	}
	Ok(())
}
