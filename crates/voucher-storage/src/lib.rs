//! Nonce ledger for the voucher issuer.
//!
//! The ledger is the only owner of voucher records. Backends implement
//! [`LedgerInterface`] and must make every operation atomic with respect to the
//! others on the same nonce; [`LedgerService`] adds nonce generation and the
//! collision retry loop on top of any backend.

use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use voucher_types::{
	current_timestamp, truncate_id, Address, ImplementationRegistry, IssuancePolicy,
	MarkOutcome, Nonce, VoucherRecord, B256,
};

pub mod implementations {
	pub mod memory;
	pub mod sqlite;
}

/// How many fresh nonces `reserve` draws before giving up.
///
/// A collision on 256 random bits is not expected to ever happen; reaching the
/// limit points at a broken nonce source rather than bad luck.
pub const MAX_NONCE_ATTEMPTS: usize = 8;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// The durable store could not be read or written.
	#[error("Backend error: {0}")]
	Backend(String),
	/// A stored row could not be decoded.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Every generated nonce collided with an existing one.
	#[error("No unused nonce found after {attempts} attempts")]
	NonceExhausted { attempts: usize },
	/// The recipient already holds an unused, unexpired voucher.
	#[error("Recipient already holds a live voucher")]
	LiveVoucherExists,
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Result of an atomic insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
	Inserted,
	/// The nonce exists now or existed at some point in the ledger's history.
	NonceTaken,
	/// Refused under [`IssuancePolicy::SingleLive`].
	RecipientHasLiveVoucher,
}

/// Trait defining the interface for nonce ledger backends.
///
/// Implementations must guarantee:
/// - `insert` never overwrites, and never accepts a nonce that was reaped earlier.
/// - `mark_used` is a compare-and-set: concurrent calls on one nonce yield
///   exactly one [`MarkOutcome::Consumed`].
/// - `reap` never removes an unused record whose expiry is at or after the cutoff.
#[async_trait]
pub trait LedgerInterface: Send + Sync {
	/// Atomically inserts a new unused record.
	///
	/// Under [`IssuancePolicy::SingleLive`] the insert is refused while the
	/// recipient holds a record that is unused with `expiry > record.created_at`.
	async fn insert(
		&self,
		record: &VoucherRecord,
		policy: IssuancePolicy,
	) -> Result<InsertOutcome, LedgerError>;

	/// Atomically flips `used` from false to true.
	async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, LedgerError>;

	/// Removes every record that is used or has `expiry < cutoff`, returning
	/// how many were removed. Removed nonces stay reserved forever.
	async fn reap(&self, cutoff: u64) -> Result<usize, LedgerError>;

	async fn get(&self, nonce: &Nonce) -> Result<Option<VoucherRecord>, LedgerError>;

	/// Number of records currently held (retired nonces excluded).
	async fn count(&self) -> Result<usize, LedgerError>;
}

/// Type alias for ledger factory functions.
pub type LedgerFactory = fn(&toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError>;

/// Registry trait for ledger implementations.
pub trait LedgerRegistry: ImplementationRegistry<Factory = LedgerFactory> {}

/// Get all registered ledger implementations.
///
/// Returns a vector of (name, factory) tuples for all available ledger implementations.
pub fn get_all_implementations() -> Vec<(&'static str, LedgerFactory)> {
	use implementations::{memory, sqlite};

	vec![
		(memory::Registry::NAME, memory::Registry::factory()),
		(sqlite::Registry::NAME, sqlite::Registry::factory()),
	]
}

/// Source of fresh nonces. Production code uses the operating system RNG.
pub type NonceSource = Box<dyn Fn() -> Nonce + Send + Sync>;

/// 32 bytes from the operating system's CSPRNG.
pub fn random_nonce() -> Nonce {
	let mut bytes = [0u8; 32];
	OsRng.fill_bytes(&mut bytes);
	B256::from(bytes)
}

/// High-level ledger service used by the issuance engine.
pub struct LedgerService {
	backend: Box<dyn LedgerInterface>,
	nonce_source: NonceSource,
}

impl LedgerService {
	pub fn new(backend: Box<dyn LedgerInterface>) -> Self {
		Self::with_nonce_source(backend, Box::new(random_nonce))
	}

	/// Uses `nonce_source` instead of the system RNG.
	pub fn with_nonce_source(backend: Box<dyn LedgerInterface>, nonce_source: NonceSource) -> Self {
		Self {
			backend,
			nonce_source,
		}
	}

	/// Reserves a fresh nonce for `recipient`, valid for `ttl_seconds` from now.
	pub async fn reserve(
		&self,
		recipient: Address,
		ttl_seconds: u64,
		policy: IssuancePolicy,
	) -> Result<VoucherRecord, LedgerError> {
		let now = current_timestamp();
		self.reserve_record(recipient, now.saturating_add(ttl_seconds), now, policy)
			.await
	}

	/// Like [`reserve`](Self::reserve) with an explicit expiry timestamp.
	///
	/// The expiry is not checked against the clock; a voucher may be recorded
	/// as already expired.
	pub async fn reserve_until(
		&self,
		recipient: Address,
		expiry: u64,
		policy: IssuancePolicy,
	) -> Result<VoucherRecord, LedgerError> {
		self.reserve_record(recipient, expiry, current_timestamp(), policy)
			.await
	}

	async fn reserve_record(
		&self,
		recipient: Address,
		expiry: u64,
		created_at: u64,
		policy: IssuancePolicy,
	) -> Result<VoucherRecord, LedgerError> {
		for attempt in 1..=MAX_NONCE_ATTEMPTS {
			let record = VoucherRecord::new((self.nonce_source)(), recipient, expiry, created_at);
			match self.backend.insert(&record, policy).await? {
				InsertOutcome::Inserted => return Ok(record),
				InsertOutcome::RecipientHasLiveVoucher => return Err(LedgerError::LiveVoucherExists),
				InsertOutcome::NonceTaken => {
					tracing::warn!(
						nonce = %truncate_id(&record.nonce.to_string()),
						attempt,
						"Nonce collision, drawing a new one"
					);
				}
			}
		}
		Err(LedgerError::NonceExhausted {
			attempts: MAX_NONCE_ATTEMPTS,
		})
	}

	pub async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, LedgerError> {
		self.backend.mark_used(nonce).await
	}

	/// Removes records that are used or expired more than `grace_seconds` ago.
	pub async fn reap(&self, grace_seconds: u64) -> Result<usize, LedgerError> {
		self.reap_before(current_timestamp().saturating_sub(grace_seconds))
			.await
	}

	/// Removes records that are used or have `expiry < cutoff`.
	pub async fn reap_before(&self, cutoff: u64) -> Result<usize, LedgerError> {
		self.backend.reap(cutoff).await
	}

	pub async fn get(&self, nonce: &Nonce) -> Result<Option<VoucherRecord>, LedgerError> {
		self.backend.get(nonce).await
	}

	pub async fn count(&self) -> Result<usize, LedgerError> {
		self.backend.count().await
	}
}
