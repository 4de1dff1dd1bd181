use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

use fbp_core::types::{FeedbackRecord, FollowUpEvent};

pub mod ledger;

pub use ledger::{
    AppendReceipt, LedgerAppender, LedgerError, LedgerRetry, LedgerStore, LedgerStoreError,
    MemoryLedgerStore, SqliteLedgerStore, Version, WriteOutcome,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for the feedback document store.
    pub fn feedback(&self) -> FeedbackRepository {
        FeedbackRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the durable follow-up queue.
    pub fn follow_up_queue(&self) -> FollowUpQueueRepository {
        FollowUpQueueRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a ledger store backed by this database.
    pub fn ledger_objects(&self) -> SqliteLedgerStore {
        SqliteLedgerStore::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|parsed| parsed.with_timezone(&Utc))
}

/// Repository for the `feedback` table.
///
/// Records are written once and never updated; `company_id` acts as the
/// partition key for all queries.
#[derive(Clone)]
pub struct FeedbackRepository {
    pool: SqlitePool,
}

impl FeedbackRepository {
    /// Persists a new feedback record.
    pub async fn create(&self, record: &FeedbackRecord) -> Result<(), FeedbackError> {
        sqlx::query(
            "INSERT INTO feedback (id, company_id, user_name, comments, rating, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.company_id)
        .bind(&record.user_name)
        .bind(&record.comments)
        .bind(record.rating)
        .bind(to_rfc3339(record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns every feedback record for the company (full partition scan).
    pub async fn list_for_company(
        &self,
        company_id: i64,
    ) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let rows = sqlx::query(
            "SELECT id, company_id, user_name, comments, rating, created_at \
             FROM feedback WHERE company_id = ? ORDER BY created_at",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_feedback).collect()
    }

    /// Fetches a single record. The company id is required alongside the
    /// record id because it is the partition key.
    pub async fn fetch_by_id(
        &self,
        id: Uuid,
        company_id: i64,
    ) -> Result<Option<FeedbackRecord>, FeedbackError> {
        let row = sqlx::query(
            "SELECT id, company_id, user_name, comments, rating, created_at \
             FROM feedback WHERE id = ? AND company_id = ?",
        )
        .bind(id.to_string())
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_feedback).transpose()
    }
}

fn decode_feedback(row: &sqlx::sqlite::SqliteRow) -> Result<FeedbackRecord, FeedbackError> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(FeedbackRecord {
        id: Uuid::parse_str(&id)?,
        user_name: row.get("user_name"),
        comments: row.get("comments"),
        rating: row.get::<i64, _>("rating") as i32,
        company_id: row.get("company_id"),
        created_at: parse_rfc3339(&created_at)?,
    })
}

/// Errors raised by the feedback repository.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("invalid feedback id in row: {0}")]
    InvalidId(#[from] uuid::Error),
    #[error("invalid timestamp in row: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const STATUS_QUEUED: &str = "QUEUED";
const STATUS_DEAD: &str = "DEAD";

/// Durable follow-up queue with lease-based, at-least-once delivery.
///
/// Claiming a message pushes its `available_at` past the lease window and
/// bumps the delivery counter; only an explicit `complete` removes it, so a
/// consumer crash re-delivers the message once the lease lapses.
#[derive(Clone)]
pub struct FollowUpQueueRepository {
    pool: SqlitePool,
}

/// A queue message claimed for processing. The payload is kept raw so a
/// poison message can be routed to dead-lettering instead of failing the
/// whole batch.
#[derive(Debug, Clone)]
pub struct ClaimedFollowUp {
    pub id: Uuid,
    pub payload_json: String,
    pub attempts: i64,
}

impl FollowUpQueueRepository {
    /// Enqueues a follow-up event, immediately available for delivery.
    pub async fn enqueue(
        &self,
        event: &FollowUpEvent,
        now: DateTime<Utc>,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_string(event)?;
        sqlx::query(
            "INSERT INTO follow_up_queue (id, payload_json, enqueued_at, available_at, attempts, status) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(id.to_string())
        .bind(payload)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .bind(STATUS_QUEUED)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Claims up to `limit` due messages, leasing each until `now + lease`.
    ///
    /// The per-row guarded update keeps concurrent claimers from leasing the
    /// same message twice.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedFollowUp>, QueueError> {
        let candidates = sqlx::query(
            "SELECT id, payload_json, attempts FROM follow_up_queue \
             WHERE status = ? AND available_at <= ? ORDER BY available_at LIMIT ?",
        )
        .bind(STATUS_QUEUED)
        .bind(to_rfc3339(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let leased_until = to_rfc3339(now + lease);
        let mut claimed = Vec::with_capacity(candidates.len());
        for row in candidates {
            let id: String = row.get("id");
            let result = sqlx::query(
                "UPDATE follow_up_queue SET available_at = ?, attempts = attempts + 1 \
                 WHERE id = ? AND status = ? AND available_at <= ?",
            )
            .bind(&leased_until)
            .bind(&id)
            .bind(STATUS_QUEUED)
            .bind(to_rfc3339(now))
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                claimed.push(ClaimedFollowUp {
                    id: Uuid::parse_str(&id)?,
                    payload_json: row.get("payload_json"),
                    attempts: row.get::<i64, _>("attempts") + 1,
                });
            }
        }
        Ok(claimed)
    }

    /// Removes a successfully processed message.
    pub async fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM follow_up_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Parks a message that will never be processed (undecodable payload or
    /// delivery budget exhausted). Dead messages stay in the table for
    /// inspection.
    pub async fn mark_dead(&self, id: Uuid) -> Result<(), QueueError> {
        sqlx::query("UPDATE follow_up_queue SET status = ? WHERE id = ?")
            .bind(STATUS_DEAD)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of messages still queued (leased or due).
    pub async fn pending_count(&self) -> Result<i64, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM follow_up_queue WHERE status = ?")
            .bind(STATUS_QUEUED)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Number of dead-lettered messages.
    pub async fn dead_count(&self) -> Result<i64, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM follow_up_queue WHERE status = ?")
            .bind(STATUS_DEAD)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

/// Errors raised by the follow-up queue repository.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode queue payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid message id in row: {0}")]
    InvalidId(#[from] uuid::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
