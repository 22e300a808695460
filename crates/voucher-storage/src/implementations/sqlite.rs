//! Durable ledger backend on SQLite.
//!
//! # Schema
//!
//! The `vouchers` table has columns `nonce` (32-byte blob, primary key),
//! `recipient` (20-byte blob), `expiry`, `used` and `created_at`, with indexes
//! on `expiry` for reaping and on `recipient` for the single-live policy.
//! `retired_nonces` keeps every reaped nonce so it can never be reissued.
//!
//! One connection is shared behind a mutex and driven from the blocking
//! thread pool. Multi-statement operations run inside `BEGIN IMMEDIATE`
//! transactions, so they also hold when several processes share the file.

use crate::{InsertOutcome, LedgerError, LedgerInterface, LedgerRegistry};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voucher_types::{
	current_timestamp, Address, ConfigSchema, Field, FieldType, ImplementationRegistry,
	IssuancePolicy, MarkOutcome, Nonce, Schema, ValidationError, VoucherRecord, B256,
};

const DEFAULT_PATH: &str = "./data/nonce.sqlite";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// `retired_nonces` keeps one row per reaped record and is never pruned, so
/// it grows for the lifetime of the database file. Uniqueness of nonces
/// across reaps and restarts depends on it.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vouchers (
    nonce       BLOB PRIMARY KEY,
    recipient   BLOB NOT NULL,
    expiry      INTEGER NOT NULL,
    used        INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vouchers_expiry ON vouchers(expiry);
CREATE INDEX IF NOT EXISTS idx_vouchers_recipient ON vouchers(recipient);
CREATE TABLE IF NOT EXISTS retired_nonces (
    nonce       BLOB PRIMARY KEY,
    retired_at  INTEGER NOT NULL
);
";

/// SQLite stores signed 64-bit integers; timestamps fit comfortably.
fn to_sql_int(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
	u64::try_from(value).unwrap_or(0)
}

fn backend_error(err: rusqlite::Error) -> LedgerError {
	LedgerError::Backend(err.to_string())
}

struct RawRow {
	nonce: Vec<u8>,
	recipient: Vec<u8>,
	expiry: i64,
	used: bool,
	created_at: i64,
}

impl RawRow {
	fn into_record(self) -> Result<VoucherRecord, LedgerError> {
		if self.nonce.len() != 32 || self.recipient.len() != 20 {
			return Err(LedgerError::Serialization(format!(
				"malformed voucher row: nonce {} bytes, recipient {} bytes",
				self.nonce.len(),
				self.recipient.len()
			)));
		}
		Ok(VoucherRecord {
			nonce: B256::from_slice(&self.nonce),
			recipient: Address::from_slice(&self.recipient),
			expiry: from_sql_int(self.expiry),
			used: self.used,
			created_at: from_sql_int(self.created_at),
		})
	}
}

/// SQLite ledger implementation.
pub struct SqliteLedger {
	conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
	/// Opens (or creates) the ledger file at `path`.
	pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, LedgerError> {
		let conn = Connection::open(path.as_ref()).map_err(backend_error)?;
		conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
			.map_err(backend_error)?;
		Self::from_connection(conn, busy_timeout)
	}

	/// A private in-memory database, lost when the ledger is dropped.
	pub fn open_in_memory() -> Result<Self, LedgerError> {
		let conn = Connection::open_in_memory().map_err(backend_error)?;
		Self::from_connection(conn, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
	}

	fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, LedgerError> {
		conn.busy_timeout(busy_timeout).map_err(backend_error)?;
		conn.execute_batch(SCHEMA).map_err(backend_error)?;
		Ok(Self {
			conn: Arc::new(Mutex::new(conn)),
		})
	}

	/// Runs `op` on the shared connection from the blocking pool.
	async fn with_conn<T, F>(&self, op: F) -> Result<T, LedgerError>
	where
		T: Send + 'static,
		F: FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
	{
		let conn = Arc::clone(&self.conn);
		tokio::task::spawn_blocking(move || {
			let mut guard = conn
				.lock()
				.map_err(|_| LedgerError::Backend("sqlite connection mutex poisoned".into()))?;
			op(&mut *guard)
		})
		.await
		.map_err(|e| LedgerError::Backend(format!("ledger task failed: {e}")))?
	}
}

fn insert_record(
	conn: &mut Connection,
	record: &VoucherRecord,
	policy: IssuancePolicy,
) -> rusqlite::Result<InsertOutcome> {
	let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

	let retired = tx
		.query_row(
			"SELECT 1 FROM retired_nonces WHERE nonce = ?1",
			params![record.nonce.as_slice()],
			|_| Ok(()),
		)
		.optional()?
		.is_some();
	if retired {
		return Ok(InsertOutcome::NonceTaken);
	}

	if policy == IssuancePolicy::SingleLive {
		let live = tx
			.query_row(
				"SELECT 1 FROM vouchers \
				 WHERE recipient = ?1 AND used = 0 AND expiry > ?2 LIMIT 1",
				params![record.recipient.as_slice(), to_sql_int(record.created_at)],
				|_| Ok(()),
			)
			.optional()?
			.is_some();
		if live {
			return Ok(InsertOutcome::RecipientHasLiveVoucher);
		}
	}

	let inserted = tx.execute(
		"INSERT OR IGNORE INTO vouchers (nonce, recipient, expiry, used, created_at) \
		 VALUES (?1, ?2, ?3, 0, ?4)",
		params![
			record.nonce.as_slice(),
			record.recipient.as_slice(),
			to_sql_int(record.expiry),
			to_sql_int(record.created_at),
		],
	)?;
	tx.commit()?;

	Ok(if inserted == 1 {
		InsertOutcome::Inserted
	} else {
		InsertOutcome::NonceTaken
	})
}

fn mark_record_used(conn: &mut Connection, nonce: &Nonce) -> rusqlite::Result<MarkOutcome> {
	// The conditional update is the compare-and-set.
	let changed = conn.execute(
		"UPDATE vouchers SET used = 1 WHERE nonce = ?1 AND used = 0",
		params![nonce.as_slice()],
	)?;
	if changed == 1 {
		return Ok(MarkOutcome::Consumed);
	}

	let exists = conn
		.query_row(
			"SELECT used FROM vouchers WHERE nonce = ?1",
			params![nonce.as_slice()],
			|row| row.get::<_, bool>(0),
		)
		.optional()?;
	Ok(match exists {
		Some(_) => MarkOutcome::AlreadyConsumed,
		None => MarkOutcome::NotFound,
	})
}

fn reap_records(conn: &mut Connection, cutoff: u64, now: u64) -> rusqlite::Result<usize> {
	let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
	tx.execute(
		"INSERT OR IGNORE INTO retired_nonces (nonce, retired_at) \
		 SELECT nonce, ?2 FROM vouchers WHERE used = 1 OR expiry < ?1",
		params![to_sql_int(cutoff), to_sql_int(now)],
	)?;
	let removed = tx.execute(
		"DELETE FROM vouchers WHERE used = 1 OR expiry < ?1",
		params![to_sql_int(cutoff)],
	)?;
	tx.commit()?;
	Ok(removed)
}

#[async_trait]
impl LedgerInterface for SqliteLedger {
	async fn insert(
		&self,
		record: &VoucherRecord,
		policy: IssuancePolicy,
	) -> Result<InsertOutcome, LedgerError> {
		let record = record.clone();
		self.with_conn(move |conn| insert_record(conn, &record, policy).map_err(backend_error))
			.await
	}

	async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, LedgerError> {
		let nonce = *nonce;
		self.with_conn(move |conn| mark_record_used(conn, &nonce).map_err(backend_error))
			.await
	}

	async fn reap(&self, cutoff: u64) -> Result<usize, LedgerError> {
		let now = current_timestamp();
		self.with_conn(move |conn| reap_records(conn, cutoff, now).map_err(backend_error))
			.await
	}

	async fn get(&self, nonce: &Nonce) -> Result<Option<VoucherRecord>, LedgerError> {
		let nonce = *nonce;
		let raw = self
			.with_conn(move |conn| {
				conn.query_row(
					"SELECT nonce, recipient, expiry, used, created_at \
					 FROM vouchers WHERE nonce = ?1",
					params![nonce.as_slice()],
					|row| {
						Ok(RawRow {
							nonce: row.get(0)?,
							recipient: row.get(1)?,
							expiry: row.get(2)?,
							used: row.get(3)?,
							created_at: row.get(4)?,
						})
					},
				)
				.optional()
				.map_err(backend_error)
			})
			.await?;
		raw.map(RawRow::into_record).transpose()
	}

	async fn count(&self) -> Result<usize, LedgerError> {
		self.with_conn(|conn| {
			conn.query_row("SELECT COUNT(*) FROM vouchers", [], |row| row.get::<_, i64>(0))
				.map(|n| usize::try_from(n).unwrap_or(0))
				.map_err(backend_error)
		})
		.await
	}
}

/// Configuration schema for SqliteLedger.
pub struct SqliteLedgerSchema;

impl ConfigSchema for SqliteLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(s) if !s.trim().is_empty() => Ok(()),
						_ => Err("path cannot be empty".to_string()),
					}
				}),
				Field::new(
					"busy_timeout_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an SQLite ledger from configuration.
///
/// Configuration parameters:
/// - `path`: database file, or `:memory:` (default: "./data/nonce.sqlite")
/// - `busy_timeout_ms`: how long to wait on a locked database (default: 5000)
pub fn create_ledger(config: &toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	SqliteLedgerSchema
		.validate(config)
		.map_err(|e| LedgerError::Configuration(e.to_string()))?;

	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_PATH);
	let busy_timeout = config
		.get("busy_timeout_ms")
		.and_then(|v| v.as_integer())
		.map(|ms| Duration::from_millis(ms as u64))
		.unwrap_or(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

	if path == ":memory:" {
		return Ok(Box::new(SqliteLedger::open_in_memory()?));
	}

	if let Some(parent) = Path::new(path).parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent).map_err(|e| {
				LedgerError::Configuration(format!(
					"cannot create ledger directory {}: {}",
					parent.display(),
					e
				))
			})?;
		}
	}

	Ok(Box::new(SqliteLedger::open(path, busy_timeout)?))
}

/// Registry for the SQLite ledger implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "sqlite";
	type Factory = crate::LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::LedgerService;
	use futures::future::join_all;
	use std::collections::HashSet;
	use tempfile::TempDir;

	const RECIPIENT: Address = Address::repeat_byte(0xaa);

	fn file_ledger(dir: &TempDir) -> SqliteLedger {
		SqliteLedger::open(dir.path().join("nonce.sqlite"), Duration::from_secs(5)).unwrap()
	}

	fn record(byte: u8, expiry: u64) -> VoucherRecord {
		VoucherRecord::new(B256::repeat_byte(byte), RECIPIENT, expiry, 1_000)
	}

	#[test]
	fn test_schema_is_idempotent() {
		let conn = Connection::open_in_memory().unwrap();
		conn.execute_batch(SCHEMA).unwrap();
		conn.execute_batch(SCHEMA).unwrap();
	}

	#[tokio::test]
	async fn test_round_trip_and_idempotent_mark() {
		let ledger = SqliteLedger::open_in_memory().unwrap();
		let r = record(1, 2_000);

		assert_eq!(
			ledger.insert(&r, IssuancePolicy::Multiple).await.unwrap(),
			InsertOutcome::Inserted
		);
		assert_eq!(ledger.get(&r.nonce).await.unwrap(), Some(r.clone()));

		assert_eq!(ledger.mark_used(&r.nonce).await.unwrap(), MarkOutcome::Consumed);
		assert_eq!(
			ledger.mark_used(&r.nonce).await.unwrap(),
			MarkOutcome::AlreadyConsumed
		);
		assert_eq!(
			ledger.mark_used(&B256::repeat_byte(0xee)).await.unwrap(),
			MarkOutcome::NotFound
		);

		let stored = ledger.get(&r.nonce).await.unwrap().unwrap();
		assert!(stored.used);
		assert_eq!(ledger.count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_duplicate_nonce_is_not_overwritten() {
		let ledger = SqliteLedger::open_in_memory().unwrap();
		let original = record(2, 2_000);
		ledger.insert(&original, IssuancePolicy::Multiple).await.unwrap();

		let clash = record(2, 9_999);
		assert_eq!(
			ledger.insert(&clash, IssuancePolicy::Multiple).await.unwrap(),
			InsertOutcome::NonceTaken
		);
		assert_eq!(ledger.get(&original.nonce).await.unwrap().unwrap().expiry, 2_000);
	}

	#[tokio::test]
	async fn test_reap_boundary_and_retirement() {
		let ledger = SqliteLedger::open_in_memory().unwrap();
		let used = record(3, 5_000);
		let stale = record(4, 1_199);
		let edge = record(5, 1_200);
		for r in [&used, &stale, &edge] {
			ledger.insert(r, IssuancePolicy::Multiple).await.unwrap();
		}
		ledger.mark_used(&used.nonce).await.unwrap();

		// `expiry < cutoff` is strict: the record expiring exactly at the cutoff stays.
		assert_eq!(ledger.reap(1_200).await.unwrap(), 2);
		assert!(ledger.get(&edge.nonce).await.unwrap().is_some());

		assert_eq!(
			ledger.insert(&used, IssuancePolicy::Multiple).await.unwrap(),
			InsertOutcome::NonceTaken
		);
		assert_eq!(
			ledger.mark_used(&stale.nonce).await.unwrap(),
			MarkOutcome::NotFound
		);
	}

	#[tokio::test]
	async fn test_single_live_policy() {
		let ledger = SqliteLedger::open_in_memory().unwrap();
		ledger
			.insert(&record(6, 2_000), IssuancePolicy::SingleLive)
			.await
			.unwrap();

		assert_eq!(
			ledger
				.insert(&record(7, 2_000), IssuancePolicy::SingleLive)
				.await
				.unwrap(),
			InsertOutcome::RecipientHasLiveVoucher
		);
		assert_eq!(
			ledger
				.insert(&record(7, 2_000), IssuancePolicy::Multiple)
				.await
				.unwrap(),
			InsertOutcome::Inserted
		);
	}

	#[tokio::test]
	async fn test_records_survive_reopen() {
		let dir = TempDir::new().unwrap();
		let r = record(8, 2_000);
		{
			let ledger = file_ledger(&dir);
			ledger.insert(&r, IssuancePolicy::Multiple).await.unwrap();
			ledger.mark_used(&r.nonce).await.unwrap();
			ledger.reap(0).await.unwrap();
		}

		let reopened = file_ledger(&dir);
		assert_eq!(reopened.count().await.unwrap(), 0);
		// Uniqueness holds across process restarts.
		assert_eq!(
			reopened.insert(&r, IssuancePolicy::Multiple).await.unwrap(),
			InsertOutcome::NonceTaken
		);
	}

	#[tokio::test]
	async fn test_concurrent_reserve_yields_distinct_nonces() {
		let dir = TempDir::new().unwrap();
		let service = Arc::new(LedgerService::new(Box::new(file_ledger(&dir))));

		let results = join_all((0..128u8).map(|i| {
			let service = Arc::clone(&service);
			tokio::spawn(async move {
				service
					.reserve(Address::repeat_byte(i), 300, IssuancePolicy::Multiple)
					.await
					.unwrap()
			})
		}))
		.await;

		let nonces: HashSet<Nonce> = results.into_iter().map(|r| r.unwrap().nonce).collect();
		assert_eq!(nonces.len(), 128);
		assert_eq!(service.count().await.unwrap(), 128);
	}

	#[tokio::test]
	async fn test_concurrent_mark_used_consumes_once() {
		let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
		let r = record(9, 2_000);
		ledger.insert(&r, IssuancePolicy::Multiple).await.unwrap();

		let outcomes = join_all((0..100).map(|_| {
			let ledger = Arc::clone(&ledger);
			let nonce = r.nonce;
			tokio::spawn(async move { ledger.mark_used(&nonce).await.unwrap() })
		}))
		.await;

		let consumed = outcomes
			.into_iter()
			.filter(|o| matches!(o, Ok(MarkOutcome::Consumed)))
			.count();
		assert_eq!(consumed, 1);
	}

	#[tokio::test]
	async fn test_reap_concurrent_with_reserve_and_mark_used() {
		let dir = TempDir::new().unwrap();
		let service = Arc::new(LedgerService::new(Box::new(file_ledger(&dir))));

		let writers = join_all((0..100u8).map(|i| {
			let service = Arc::clone(&service);
			tokio::spawn(async move {
				let reserved = service
					.reserve(Address::repeat_byte(i), 300, IssuancePolicy::Multiple)
					.await
					.unwrap();
				let consume = i % 2 == 0;
				if consume {
					// A concurrent reap must not have removed the fresh record.
					assert_eq!(
						service.mark_used(&reserved.nonce).await.unwrap(),
						MarkOutcome::Consumed
					);
				}
				(reserved.nonce, consume)
			})
		}));
		let reapers = join_all((0..20).map(|_| {
			let service = Arc::clone(&service);
			tokio::spawn(async move { service.reap(0).await.unwrap() })
		}));

		let (written, reaped) = tokio::join!(writers, reapers);
		let reaped: usize = reaped.into_iter().map(|r| r.unwrap()).sum();
		assert!(reaped <= 50);

		for result in written {
			let (nonce, consumed) = result.unwrap();
			let stored = service.get(&nonce).await.unwrap();
			if consumed {
				if let Some(stored) = stored {
					assert!(stored.used);
				}
			} else {
				assert!(!stored.unwrap().used);
			}
		}

		service.reap(0).await.unwrap();
		assert_eq!(service.count().await.unwrap(), 50);
	}

	#[test]
	fn test_factory_creates_parent_directory() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested/dir/nonce.sqlite");
		let mut table = toml::map::Map::new();
		table.insert(
			"path".to_string(),
			toml::Value::String(path.to_string_lossy().into_owned()),
		);

		assert!(create_ledger(&toml::Value::Table(table)).is_ok());
		assert!(path.exists());
	}

	#[test]
	fn test_schema_rejects_bad_values() {
		let bad: toml::Value = toml::from_str("path = \"\"").unwrap();
		assert!(SqliteLedgerSchema.validate(&bad).is_err());

		let bad_timeout: toml::Value = toml::from_str("busy_timeout_ms = -1").unwrap();
		assert!(SqliteLedgerSchema.validate(&bad_timeout).is_err());
	}
}
