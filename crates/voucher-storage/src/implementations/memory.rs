//! In-memory ledger backend.
//!
//! Records live in a `HashMap` behind a single `RwLock`; every mutating
//! operation holds the write lock for its whole check-and-write, which makes it
//! linearizable. Nothing survives a restart, so this backend is meant for tests
//! and local development.

use crate::{InsertOutcome, LedgerError, LedgerInterface, LedgerRegistry};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use voucher_types::{
	ConfigSchema, ImplementationRegistry, IssuancePolicy, MarkOutcome, Nonce, Schema,
	ValidationError, VoucherRecord,
};

#[derive(Default)]
struct LedgerState {
	records: HashMap<Nonce, VoucherRecord>,
	/// Nonces removed by reaping; never handed out again.
	///
	/// Only ever grows: a retired nonce stays here for the life of the
	/// process, one entry per reaped record.
	retired: HashSet<Nonce>,
}

/// In-memory ledger implementation.
#[derive(Default)]
pub struct MemoryLedger {
	state: RwLock<LedgerState>,
}

impl MemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl LedgerInterface for MemoryLedger {
	async fn insert(
		&self,
		record: &VoucherRecord,
		policy: IssuancePolicy,
	) -> Result<InsertOutcome, LedgerError> {
		let mut state = self.state.write().await;

		if state.records.contains_key(&record.nonce) || state.retired.contains(&record.nonce) {
			return Ok(InsertOutcome::NonceTaken);
		}
		if policy == IssuancePolicy::SingleLive
			&& state
				.records
				.values()
				.any(|r| r.recipient == record.recipient && r.is_live_at(record.created_at))
		{
			return Ok(InsertOutcome::RecipientHasLiveVoucher);
		}

		state.records.insert(record.nonce, record.clone());
		Ok(InsertOutcome::Inserted)
	}

	async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, LedgerError> {
		let mut state = self.state.write().await;
		Ok(match state.records.get_mut(nonce) {
			None => MarkOutcome::NotFound,
			Some(record) if record.used => MarkOutcome::AlreadyConsumed,
			Some(record) => {
				record.used = true;
				MarkOutcome::Consumed
			}
		})
	}

	async fn reap(&self, cutoff: u64) -> Result<usize, LedgerError> {
		let mut state = self.state.write().await;
		let doomed: Vec<Nonce> = state
			.records
			.values()
			.filter(|r| r.is_reapable(cutoff))
			.map(|r| r.nonce)
			.collect();

		for nonce in &doomed {
			state.records.remove(nonce);
			state.retired.insert(*nonce);
		}
		Ok(doomed.len())
	}

	async fn get(&self, nonce: &Nonce) -> Result<Option<VoucherRecord>, LedgerError> {
		Ok(self.state.read().await.records.get(nonce).cloned())
	}

	async fn count(&self) -> Result<usize, LedgerError> {
		Ok(self.state.read().await.records.len())
	}
}

/// Configuration schema for MemoryLedger.
pub struct MemoryLedgerSchema;

impl ConfigSchema for MemoryLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No options; the table only has to be a table.
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory ledger from configuration.
///
/// Configuration parameters:
/// - None required for the memory ledger
pub fn create_ledger(config: &toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	MemoryLedgerSchema
		.validate(config)
		.map_err(|e| LedgerError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryLedger::new()))
}

/// Registry for the memory ledger implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}
