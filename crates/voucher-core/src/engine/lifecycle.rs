//! Lifecycle management for the voucher engine.

use super::{EngineError, VoucherEngine};

impl VoucherEngine {
	/// Checks the ledger is reachable and logs the issuing identity.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		let records = self
			.ledger
			.count()
			.await
			.map_err(|e| EngineError::Service(format!("Ledger not reachable: {}", e)))?;

		tracing::info!(
			issuer = %self.config.issuer.id,
			signer = %self.signer,
			chain_id = self.domain.chain_id,
			contract = %self.domain.contract,
			records,
			"Initialized voucher engine"
		);
		Ok(())
	}

	/// Runs a final reap pass before exit.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down voucher engine");
		self.reaper.reap_once().await;
		Ok(())
	}
}
