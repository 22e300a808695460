//! Canonical voucher digest.
//!
//! The consuming contract recomputes
//! `keccak256(abi.encodePacked(to, nonce, expiry, block.chainid, address(this)))`
//! and recovers the signer from it. Any byte of difference here is a silent
//! verification failure on-chain, so this module is the single place where the
//! encoding is defined.
//!
//! Packed layout (136 bytes):
//! - [0-19]: recipient address
//! - [20-51]: nonce
//! - [52-83]: expiry as uint256, big-endian
//! - [84-115]: chain id as uint256, big-endian
//! - [116-135]: consuming contract address

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Length of the packed message that is hashed into the digest.
pub const PACKED_MESSAGE_LEN: usize = 20 + 32 + 32 + 32 + 20;

/// Chain and contract a voucher is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDomain {
	pub chain_id: u64,
	pub contract: Address,
}

impl VoucherDomain {
	pub fn new(chain_id: u64, contract: Address) -> Self {
		Self { chain_id, contract }
	}

	/// Digest of a voucher within this domain.
	pub fn digest(&self, recipient: &Address, nonce: &B256, expiry: u64) -> B256 {
		build_digest(recipient, nonce, expiry, self.chain_id, &self.contract)
	}
}

/// Minimal `abi.encodePacked` encoder for the static types a voucher uses.
///
/// Addresses are written as their raw 20 bytes; integers are widened to
/// 32-byte big-endian words.
#[derive(Debug, Default)]
pub struct PackedEncoder {
	buf: Vec<u8>,
}

impl PackedEncoder {
	pub fn new() -> Self {
		Self {
			buf: Vec::with_capacity(PACKED_MESSAGE_LEN),
		}
	}

	pub fn push_address(&mut self, addr: &Address) {
		self.buf.extend_from_slice(addr.as_slice());
	}

	pub fn push_b256(&mut self, v: &B256) {
		self.buf.extend_from_slice(v.as_slice());
	}

	pub fn push_u256(&mut self, v: U256) {
		self.buf.extend_from_slice(&v.to_be_bytes::<32>());
	}

	pub fn finish(self) -> Vec<u8> {
		self.buf
	}
}

/// Packs the voucher fields exactly as the consuming contract does.
pub fn encode_packed(
	recipient: &Address,
	nonce: &B256,
	expiry: u64,
	chain_id: u64,
	contract: &Address,
) -> Vec<u8> {
	let mut enc = PackedEncoder::new();
	enc.push_address(recipient);
	enc.push_b256(nonce);
	enc.push_u256(U256::from(expiry));
	enc.push_u256(U256::from(chain_id));
	enc.push_address(contract);
	enc.finish()
}

/// Computes the 32-byte digest that the issuer signs.
///
/// Pure function: the same inputs always produce the same digest.
pub fn build_digest(
	recipient: &Address,
	nonce: &B256,
	expiry: u64,
	chain_id: u64,
	contract: &Address,
) -> B256 {
	keccak256(encode_packed(recipient, nonce, expiry, chain_id, contract))
}
