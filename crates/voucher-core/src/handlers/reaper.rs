//! Expiry reaper.
//!
//! Deletes consumed records and records that expired more than the grace
//! period ago. Failures are logged and left for the next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use voucher_storage::LedgerService;

/// Handler for reap passes, periodic or opportunistic.
pub struct ReapHandler {
	ledger: Arc<LedgerService>,
	grace_seconds: u64,
	running: AtomicBool,
}

impl ReapHandler {
	pub fn new(ledger: Arc<LedgerService>, grace_seconds: u64) -> Self {
		Self {
			ledger,
			grace_seconds,
			running: AtomicBool::new(false),
		}
	}

	/// Runs one reap pass and returns the number of records removed.
	///
	/// At most one pass runs at a time; a call made while another pass is in
	/// flight returns 0 immediately.
	pub async fn reap_once(&self) -> usize {
		if self
			.running
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return 0;
		}
		let _pass = PassGuard(&self.running);

		match self.ledger.reap(self.grace_seconds).await {
			Ok(count) => {
				if count > 0 {
					tracing::debug!(removed = count, "Ledger reap");
				}
				count
			}
			Err(e) => {
				tracing::warn!(error = %e, "Ledger reap failed");
				0
			}
		}
	}
}

/// Clears the in-flight flag when a pass ends, including a cancelled one.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}
