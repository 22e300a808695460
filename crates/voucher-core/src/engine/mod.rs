//! Voucher engine that ties the ledger, the signer and the reaper together.
//!
//! The engine is the explicit service context every request goes through.
//! It is cheap to clone and safe to share between request tasks; all mutable
//! state lives in the ledger.

pub mod lifecycle;

use crate::handlers::{ConsumptionHandler, IssuanceError, IssuanceHandler, ReapHandler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use voucher_account::AccountService;
use voucher_config::Config;
use voucher_storage::LedgerService;
use voucher_types::{Address, MarkOutcome, Nonce, Voucher, VoucherDomain};

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// Issuance engine shared by the HTTP surface and the background reaper.
#[derive(Clone)]
pub struct VoucherEngine {
	/// Issuer configuration.
	pub(crate) config: Config,
	/// Nonce ledger.
	pub(crate) ledger: Arc<LedgerService>,
	/// Address of the signing key, fetched once at build time.
	pub(crate) signer: Address,
	/// Chain and contract every voucher is bound to.
	pub(crate) domain: VoucherDomain,
	pub(crate) issuance: Arc<IssuanceHandler>,
	pub(crate) consumption: Arc<ConsumptionHandler>,
	pub(crate) reaper: Arc<ReapHandler>,
}

impl VoucherEngine {
	/// Creates a new engine from already constructed services.
	pub fn new(
		config: Config,
		ledger: Arc<LedgerService>,
		account: Arc<AccountService>,
		signer: Address,
		domain: VoucherDomain,
	) -> Self {
		let issuance = Arc::new(IssuanceHandler::new(
			ledger.clone(),
			account,
			domain,
			signer,
			config.issuer.voucher_ttl_seconds,
			config.issuer.recipient_policy,
		));
		let consumption = Arc::new(ConsumptionHandler::new(ledger.clone()));
		let reaper = Arc::new(ReapHandler::new(
			ledger.clone(),
			config.ledger.reap_grace_seconds,
		));

		Self {
			config,
			ledger,
			signer,
			domain,
			issuance,
			consumption,
			reaper,
		}
	}

	/// Issues a voucher for a recipient given as a hex string.
	pub async fn issue(&self, recipient: &str) -> Result<Voucher, IssuanceError> {
		let voucher = self.issuance.issue(recipient).await?;
		self.after_issue();
		Ok(voucher)
	}

	/// Issues a voucher for an already parsed recipient.
	pub async fn issue_to(&self, recipient: Address) -> Result<Voucher, IssuanceError> {
		let voucher = self.issuance.issue_to(recipient).await?;
		self.after_issue();
		Ok(voucher)
	}

	/// Records a consumption report for `nonce`.
	pub async fn report_used(&self, nonce: &Nonce) -> Result<MarkOutcome, IssuanceError> {
		self.consumption.report_used(nonce).await
	}

	/// Runs one reap pass immediately.
	pub async fn reap_once(&self) -> usize {
		self.reaper.reap_once().await
	}

	/// Runs the periodic reaper until Ctrl-C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for shutdown signal");
			}
		})
		.await
	}

	/// Runs the periodic reaper until `shutdown` completes.
	///
	/// The first pass runs immediately, then once per configured interval.
	pub async fn run_until<F>(&self, shutdown: F) -> Result<(), EngineError>
	where
		F: Future<Output = ()>,
	{
		let period = Duration::from_secs(self.config.ledger.reap_interval_seconds);
		if period.is_zero() {
			return Err(EngineError::Config(
				"reap_interval_seconds must be positive".into(),
			));
		}

		let mut interval = tokio::time::interval(period);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					self.reaper.reap_once().await;
				}

				_ = &mut shutdown => {
					break;
				}
			}
		}

		Ok(())
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the ledger service.
	pub fn ledger(&self) -> &Arc<LedgerService> {
		&self.ledger
	}

	/// Address vouchers are signed with.
	pub fn signer(&self) -> Address {
		self.signer
	}

	pub fn domain(&self) -> &VoucherDomain {
		&self.domain
	}

	/// Starts an opportunistic reap pass in the background.
	fn after_issue(&self) {
		if !self.config.ledger.reap_after_issue {
			return;
		}
		let reaper = Arc::clone(&self.reaper);
		tokio::spawn(async move {
			reaper.reap_once().await;
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{VoucherBuilder, VoucherFactories};
	use async_trait::async_trait;
	use futures::future::join_all;
	use mockall::mock;
	use std::collections::{HashMap, HashSet};
	use voucher_account::{verify_voucher, AccountError, AccountInterface};
	use voucher_config::builders::{ConfigBuilder, DEV_SIGNER_ADDRESS};
	use voucher_storage::{InsertOutcome, LedgerError, LedgerInterface};
	use voucher_types::{
		current_timestamp, APIError, IssuancePolicy, Signature, VoucherRecord, B256,
	};

	const RECIPIENT: &str = "0xABCDEF0000000000000000000000000000001234";

	mock! {
		Signer {}

		#[async_trait]
		impl AccountInterface for Signer {
			async fn address(&self) -> Result<Address, AccountError>;
			async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError>;
		}
	}

	mock! {
		Ledger {}

		#[async_trait]
		impl LedgerInterface for Ledger {
			async fn insert(&self, record: &VoucherRecord, policy: IssuancePolicy) -> Result<InsertOutcome, LedgerError>;
			async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, LedgerError>;
			async fn reap(&self, cutoff: u64) -> Result<usize, LedgerError>;
			async fn get(&self, nonce: &Nonce) -> Result<Option<VoucherRecord>, LedgerError>;
			async fn count(&self) -> Result<usize, LedgerError>;
		}
	}

	fn signer_address() -> Address {
		DEV_SIGNER_ADDRESS.parse().unwrap()
	}

	async fn build(config: Config) -> VoucherEngine {
		let factories = VoucherFactories {
			ledger_factories: voucher_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect::<HashMap<_, _>>(),
			account_factories: voucher_account::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect::<HashMap<_, _>>(),
		};
		VoucherBuilder::new(config).build(factories).await.unwrap()
	}

	fn engine_with_doubles(
		ledger: Box<dyn LedgerInterface>,
		account: Box<dyn AccountInterface>,
	) -> VoucherEngine {
		let config = ConfigBuilder::new().reap_after_issue(false).build();
		let domain = VoucherDomain::new(
			config.issuer.chain_id,
			config.issuer.contract().unwrap(),
		);
		VoucherEngine::new(
			config,
			Arc::new(LedgerService::new(ledger)),
			Arc::new(AccountService::new(account)),
			signer_address(),
			domain,
		)
	}

	#[tokio::test]
	async fn test_issued_voucher_recovers_to_signer() {
		let engine = build(ConfigBuilder::new().build()).await;

		let before = current_timestamp();
		let voucher = engine.issue(RECIPIENT).await.unwrap();
		let after = current_timestamp();

		assert_eq!(voucher.recipient, RECIPIENT.parse::<Address>().unwrap());
		assert_eq!(voucher.signer, signer_address());
		assert_eq!(voucher.signature.as_bytes().len(), 65);
		assert!(voucher.expiry >= before + 300 && voucher.expiry <= after + 300);
		assert_eq!(
			verify_voucher(&voucher, engine.domain(), signer_address(), after),
			Ok(())
		);

		let record = engine.ledger().get(&voucher.nonce).await.unwrap().unwrap();
		assert!(!record.used);
		assert_eq!(record.expiry, voucher.expiry);
	}

	#[tokio::test]
	async fn test_invalid_recipient_creates_no_record() {
		let engine = build(ConfigBuilder::new().build()).await;

		for input in ["not-an-address", "0x1234", "", "ABCDEF0000000000000000000000000000001234"] {
			let err = engine.issue(input).await.unwrap_err();
			assert!(matches!(err, IssuanceError::InvalidRequest(_)), "{input}");
			assert_eq!(APIError::from(err), APIError::InvalidRecipient);
		}
		assert_eq!(engine.ledger().count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_concurrent_issuance_yields_distinct_nonces() {
		let engine = build(ConfigBuilder::new().build()).await;

		let vouchers = join_all((0..128u8).map(|i| {
			let engine = engine.clone();
			tokio::spawn(async move { engine.issue_to(Address::repeat_byte(i)).await })
		}))
		.await;

		let nonces: HashSet<B256> = vouchers
			.into_iter()
			.map(|v| v.unwrap().unwrap().nonce)
			.collect();
		assert_eq!(nonces.len(), 128);
		assert_eq!(engine.ledger().count().await.unwrap(), 128);
	}

	#[tokio::test]
	async fn test_replayed_report_is_idempotent() {
		let engine = build(ConfigBuilder::new().build()).await;
		let voucher = engine.issue(RECIPIENT).await.unwrap();

		assert_eq!(
			engine.report_used(&voucher.nonce).await.unwrap(),
			MarkOutcome::Consumed
		);
		assert_eq!(
			engine.report_used(&voucher.nonce).await.unwrap(),
			MarkOutcome::AlreadyConsumed
		);
		assert_eq!(
			engine.report_used(&B256::repeat_byte(0x77)).await.unwrap(),
			MarkOutcome::NotFound
		);

		let record = engine.ledger().get(&voucher.nonce).await.unwrap().unwrap();
		assert!(record.used);
		assert_eq!(engine.ledger().count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_single_live_policy() {
		let config = ConfigBuilder::new()
			.recipient_policy(IssuancePolicy::SingleLive)
			.reap_after_issue(false)
			.build();
		let engine = build(config).await;

		let first = engine.issue(RECIPIENT).await.unwrap();
		let err = engine.issue(RECIPIENT).await.unwrap_err();
		assert!(matches!(err, IssuanceError::LiveVoucherExists));
		assert_eq!(APIError::from(err), APIError::LiveVoucherExists);

		// Other recipients are unaffected.
		engine.issue_to(Address::repeat_byte(0x01)).await.unwrap();

		// Consuming the live voucher frees the recipient.
		engine.report_used(&first.nonce).await.unwrap();
		engine.issue(RECIPIENT).await.unwrap();
	}

	#[tokio::test]
	async fn test_multiple_policy_allows_repeat_recipient() {
		let engine = build(ConfigBuilder::new().build()).await;

		let a = engine.issue(RECIPIENT).await.unwrap();
		let b = engine.issue(RECIPIENT).await.unwrap();
		assert_ne!(a.nonce, b.nonce);
	}

	#[tokio::test]
	async fn test_signing_failure_leaves_reserved_nonce() {
		let mut account = MockSigner::new();
		account
			.expect_sign_message()
			.returning(|_| Err(AccountError::SigningFailed("key unavailable".into())));

		let memory = voucher_storage::implementations::memory::MemoryLedger::new();
		let engine = engine_with_doubles(Box::new(memory), Box::new(account));

		let err = engine.issue(RECIPIENT).await.unwrap_err();
		assert!(matches!(err, IssuanceError::Signing(_)));
		assert_eq!(APIError::from(err), APIError::Internal);

		// The reserved record is not rolled back; it expires unused.
		assert_eq!(engine.ledger().count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_ledger_failure_is_unavailable() {
		let mut ledger = MockLedger::new();
		ledger
			.expect_insert()
			.returning(|_, _| Err(LedgerError::Backend("disk I/O error".into())));
		ledger
			.expect_mark_used()
			.returning(|_| Err(LedgerError::Backend("disk I/O error".into())));

		let mut account = MockSigner::new();
		account.expect_sign_message().never();

		let engine = engine_with_doubles(Box::new(ledger), Box::new(account));

		let err = engine.issue(RECIPIENT).await.unwrap_err();
		assert!(matches!(err, IssuanceError::LedgerUnavailable(_)));
		assert_eq!(APIError::from(err), APIError::LedgerUnavailable);

		let err = engine.report_used(&B256::repeat_byte(1)).await.unwrap_err();
		assert!(matches!(err, IssuanceError::LedgerUnavailable(_)));
	}

	#[tokio::test]
	async fn test_failed_reap_is_swallowed() {
		let mut ledger = MockLedger::new();
		ledger
			.expect_reap()
			.returning(|_| Err(LedgerError::Backend("database is locked".into())));

		let engine = engine_with_doubles(Box::new(ledger), Box::new(MockSigner::new()));
		assert_eq!(engine.reap_once().await, 0);
	}

	#[tokio::test]
	async fn test_reap_removes_consumed_and_stale_records() {
		let config = ConfigBuilder::new()
			.reap_grace_seconds(0)
			.reap_after_issue(false)
			.build();
		let engine = build(config).await;

		let consumed = engine.issue(RECIPIENT).await.unwrap();
		engine.report_used(&consumed.nonce).await.unwrap();
		let live = engine.issue(RECIPIENT).await.unwrap();
		let now = current_timestamp();
		let stale = engine
			.ledger()
			.reserve_until(
				Address::repeat_byte(0x02),
				now.saturating_sub(1),
				IssuancePolicy::Multiple,
			)
			.await
			.unwrap();

		assert_eq!(engine.reap_once().await, 2);
		assert!(engine.ledger().get(&live.nonce).await.unwrap().is_some());
		assert!(engine.ledger().get(&stale.nonce).await.unwrap().is_none());
		assert_eq!(engine.ledger().count().await.unwrap(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_until_reaps_on_first_tick() {
		let config = ConfigBuilder::new()
			.reap_interval_seconds(60)
			.reap_after_issue(false)
			.build();
		let engine = build(config).await;

		let voucher = engine.issue(RECIPIENT).await.unwrap();
		engine.report_used(&voucher.nonce).await.unwrap();

		engine
			.run_until(tokio::time::sleep(Duration::from_secs(1)))
			.await
			.unwrap();
		assert_eq!(engine.ledger().count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_nonces_stay_unique_across_restarts() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nonce.sqlite");
		let path = path.to_str().unwrap().to_string();

		let mut seen = HashSet::new();
		for _ in 0..2 {
			let engine = build(ConfigBuilder::new().sqlite_ledger(path.clone()).build()).await;
			for i in 0..5u8 {
				let voucher = engine.issue_to(Address::repeat_byte(i)).await.unwrap();
				assert!(seen.insert(voucher.nonce));
			}
		}

		let engine = build(ConfigBuilder::new().sqlite_ledger(path).build()).await;
		assert_eq!(engine.ledger().count().await.unwrap(), 10);
	}
}
