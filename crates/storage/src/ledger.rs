//! Durable per-company follow-up ledger.
//!
//! The backing store only supports whole-object reads and whole-object
//! conditional overwrites, so appending is an optimistic read-modify-write:
//! read content plus version token, rebuild the full object, and write it
//! back only if the token is still current. A lost race is retried from the
//! read; the row is never silently dropped.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, warn};

use fbp_core::ledger::{format_row, object_key, HEADER};
use fbp_core::types::FollowUpEvent;

/// Opaque version token returned by reads and checked by conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(i64);

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Conflict,
}

/// Whole-object blob store with conditional overwrite.
///
/// `read` returns the full content together with its current version token;
/// `write_if` replaces the full content only when the token is unchanged.
/// Passing `expected = None` asserts the object does not exist yet, so a
/// concurrent creation surfaces as a conflict instead of an overwrite.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, LedgerStoreError>;

    async fn write_if(
        &self,
        key: &str,
        content: &str,
        expected: Option<Version>,
    ) -> Result<WriteOutcome, LedgerStoreError>;
}

/// Errors raised by ledger store implementations.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// In-memory ledger store for tests and embedding.
///
/// The conditional write is a genuine compare-and-swap on a per-object
/// generation counter, so concurrent appenders race exactly as they would
/// against a remote blob store.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    objects: RwLock<HashMap<String, (String, i64)>>,
}

impl MemoryLedgerStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("ledger lock poisoned").len()
    }

    /// Returns `true` when no object has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, LedgerStoreError> {
        let objects = self.objects.read().expect("ledger lock poisoned");
        Ok(objects
            .get(key)
            .map(|(content, version)| (content.clone(), Version(*version))))
    }

    async fn write_if(
        &self,
        key: &str,
        content: &str,
        expected: Option<Version>,
    ) -> Result<WriteOutcome, LedgerStoreError> {
        let mut objects = self.objects.write().expect("ledger lock poisoned");
        let current = objects.get(key).map(|(_, version)| *version);
        let outcome = match (current, expected) {
            (None, None) => {
                objects.insert(key.to_string(), (content.to_string(), 1));
                WriteOutcome::Written
            }
            (Some(version), Some(Version(expected))) if version == expected => {
                objects.insert(key.to_string(), (content.to_string(), version + 1));
                WriteOutcome::Written
            }
            _ => WriteOutcome::Conflict,
        };
        Ok(outcome)
    }
}

/// Ledger store backed by the `ledger_objects` table.
///
/// SQLite has no native blob versioning, so the version token is synthesized
/// from a monotonically increasing `version` column: the conditional update
/// matches on the expected value and a zero-row update means another writer
/// got there first.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, LedgerStoreError> {
        let row = sqlx::query("SELECT content, version FROM ledger_objects WHERE object_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            (
                row.get::<String, _>("content"),
                Version(row.get::<i64, _>("version")),
            )
        }))
    }

    async fn write_if(
        &self,
        key: &str,
        content: &str,
        expected: Option<Version>,
    ) -> Result<WriteOutcome, LedgerStoreError> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO ledger_objects (object_key, content, version) VALUES (?, ?, 1) \
                     ON CONFLICT (object_key) DO NOTHING",
                )
                .bind(key)
                .bind(content)
                .execute(&self.pool)
                .await?
            }
            Some(Version(version)) => {
                sqlx::query(
                    "UPDATE ledger_objects SET content = ?, version = version + 1 \
                     WHERE object_key = ? AND version = ?",
                )
                .bind(content)
                .bind(key)
                .bind(version)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 1 {
            Ok(WriteOutcome::Written)
        } else {
            Ok(WriteOutcome::Conflict)
        }
    }
}

/// Retry policy for the optimistic append loop.
#[derive(Debug, Clone, Copy)]
pub struct LedgerRetry {
    /// Attempt budget, including the first try.
    pub max_attempts: u32,
    /// Base backoff; each retry waits `attempt * backoff` plus jitter.
    pub backoff: Duration,
}

impl Default for LedgerRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(25),
        }
    }
}

/// Receipt for a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Attempts consumed, `1` when the first conditional write landed.
    pub attempts: u32,
}

/// Errors surfaced by [`LedgerAppender::append`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger append for {key} lost {attempts} races, giving up")]
    Contention { key: String, attempts: u32 },
    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

/// Appends follow-up rows to per-company ledger objects.
///
/// Appends are not idempotent against duplicate events: at-least-once
/// delivery of the same event produces one row per delivery. What the
/// retry loop guarantees is that a row acknowledged as appended is never
/// lost to a concurrent writer.
#[derive(Clone)]
pub struct LedgerAppender<S> {
    store: S,
    retry: LedgerRetry,
}

impl<S: LedgerStore> LedgerAppender<S> {
    pub fn new(store: S, retry: LedgerRetry) -> Self {
        Self { store, retry }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Durably appends one ledger row for the event.
    ///
    /// Each pass reads the object with its version token, rebuilds the full
    /// content (header first when the object is missing) and issues a
    /// conditional write. Version conflicts and transient store failures
    /// both consume one attempt; once the budget is spent the append fails
    /// with [`LedgerError::Contention`] or the last store error.
    pub async fn append(&self, event: &FollowUpEvent) -> Result<AppendReceipt, LedgerError> {
        let key = object_key(event.company_id);
        let row = format_row(event);

        for attempt in 1..=self.retry.max_attempts {
            let current = match self.store.read(&key).await {
                Ok(current) => current,
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(stage = "ledger", %key, attempt, error = %err, "ledger read failed, retrying");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let (content, expected) = match current {
                Some((existing, version)) => {
                    let mut content = existing;
                    if !content.ends_with('\n') {
                        content.push('\n');
                    }
                    content.push_str(&row);
                    content.push('\n');
                    (content, Some(version))
                }
                None => (format!("{HEADER}\n{row}\n"), None),
            };

            match self.store.write_if(&key, &content, expected).await {
                Ok(WriteOutcome::Written) => {
                    if attempt > 1 {
                        debug!(stage = "ledger", %key, attempt, "append landed after retries");
                    }
                    return Ok(AppendReceipt { attempts: attempt });
                }
                Ok(WriteOutcome::Conflict) => {
                    debug!(stage = "ledger", %key, attempt, "version conflict, retrying append");
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(stage = "ledger", %key, attempt, error = %err, "ledger write failed, retrying");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LedgerError::Contention {
            key,
            attempts: self.retry.max_attempts,
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.backoff.saturating_mul(attempt);
        let jitter_ceiling = self.retry.backoff.as_millis().max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        base + Duration::from_millis(jitter)
    }
}
