//! # Sync Task Repository
//!
//! Persists one [`SyncTask`] row per `(domain, data_date)`.
//!
//! ## Overview
//!
//! Producer and consumer sides share nothing but this table, so every status
//! change is a single conditional statement whose `WHERE` clause encodes the
//! state machine of [`crate::task`]. A statement that matches no row means the
//! transition did not apply; callers receive `None` and decide what that
//! means for them. No in-process lock is involved, which keeps the transitions
//! correct when producers and consumers live in different processes.
//!
//! Every transition uses `RETURNING`, so the caller sees exactly the row its
//! own statement produced.

use crate::task::{current_timestamp, truncate_message, SyncStatus, SyncTask, TaskKey};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync task persistence
#[async_trait]
pub trait SyncTaskRepository: Send + Sync {
    /// Enter RUNNING for a new run: create the row, or reset its counters,
    /// clear the previous error and bump `retry_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn begin_run(&self, key: &TaskKey) -> Result<SyncTask>;

    /// RUNNING → MESSAGES_SENT, recording what was published.
    ///
    /// Returns `None` when the task is not RUNNING.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn mark_messages_sent(
        &self,
        key: &TaskKey,
        batch_count: i64,
        total_records: i64,
    ) -> Result<Option<SyncTask>>;

    /// MESSAGES_SENT → SUCCESS for a task that published no batch at all.
    ///
    /// Returns `None` unless the task is MESSAGES_SENT with `batch_count = 0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn complete_empty(&self, key: &TaskKey) -> Result<Option<SyncTask>>;

    /// Any non-terminal status → FAILED with a truncated message and an end time.
    ///
    /// Returns `None` when the task is missing or already terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn mark_failed(&self, key: &TaskKey, message: &str) -> Result<Option<SyncTask>>;

    /// Count one written batch; flips to SUCCESS when the last one lands.
    ///
    /// Applies only while the task is MESSAGES_SENT with batches outstanding.
    /// Returns `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn increment_completed(&self, key: &TaskKey) -> Result<Option<SyncTask>>;

    /// Find the task of one domain and day
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find(&self, key: &TaskKey) -> Result<Option<SyncTask>>;

    /// Get tasks by status, oldest day first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<SyncTask>>;

    /// Get every domain's task for one day
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_date(&self, data_date: NaiveDate) -> Result<Vec<SyncTask>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncTaskRepository
pub struct SqliteSyncTaskRepository {
    pool: SqlitePool,
    error_message_limit: usize,
}

impl SqliteSyncTaskRepository {
    /// Create a new repository keeping at most `error_message_limit` characters of an error
    pub fn new(pool: SqlitePool, error_message_limit: usize) -> Self {
        Self {
            pool,
            error_message_limit,
        }
    }

    /// Create the table and indexes
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_task (
                domain TEXT NOT NULL,
                data_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                batch_count INTEGER NOT NULL DEFAULT 0,
                completed_batch_count INTEGER NOT NULL DEFAULT 0,
                total_records INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                start_time INTEGER,
                end_time INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (domain, data_date),
                CONSTRAINT sync_task_status_check CHECK (
                    status IN ('pending', 'running', 'messages_sent', 'success', 'failed')
                ),
                CONSTRAINT sync_task_progress_check CHECK (
                    completed_batch_count <= batch_count
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_task_status
            ON sync_task(status, data_date)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

/// Database row representation of a sync task
#[derive(Debug, FromRow)]
struct SyncTaskRow {
    domain: String,
    data_date: String,
    status: String,
    batch_count: i64,
    completed_batch_count: i64,
    total_records: i64,
    retry_count: i64,
    error_message: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SyncTaskRow> for SyncTask {
    type Error = SyncError;

    fn try_from(row: SyncTaskRow) -> Result<Self> {
        let data_date = NaiveDate::parse_from_str(&row.data_date, DATE_FORMAT)
            .map_err(|e| SyncError::Database(format!("Invalid data_date {}: {}", row.data_date, e)))?;

        Ok(SyncTask {
            domain: row.domain,
            data_date,
            status: row.status.parse()?,
            batch_count: row.batch_count,
            completed_batch_count: row.completed_batch_count,
            total_records: row.total_records,
            retry_count: row.retry_count,
            error_message: row.error_message,
            start_time: row.start_time,
            end_time: row.end_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "domain, data_date, status, batch_count, completed_batch_count, \
     total_records, retry_count, error_message, start_time, end_time, created_at, updated_at";

#[async_trait]
impl SyncTaskRepository for SqliteSyncTaskRepository {
    async fn begin_run(&self, key: &TaskKey) -> Result<SyncTask> {
        let now = current_timestamp();
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            r#"
            INSERT INTO sync_task (
                domain, data_date, status, batch_count, completed_batch_count,
                total_records, retry_count, error_message, start_time, end_time,
                created_at, updated_at
            ) VALUES (?, ?, 'running', 0, 0, 0, 0, NULL, ?, NULL, ?, ?)
            ON CONFLICT (domain, data_date) DO UPDATE SET
                status = 'running',
                batch_count = 0,
                completed_batch_count = 0,
                total_records = 0,
                retry_count = sync_task.retry_count + 1,
                error_message = NULL,
                start_time = excluded.start_time,
                end_time = NULL,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        SyncTask::try_from(row)
    }

    async fn mark_messages_sent(
        &self,
        key: &TaskKey,
        batch_count: i64,
        total_records: i64,
    ) -> Result<Option<SyncTask>> {
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            r#"
            UPDATE sync_task SET
                status = 'messages_sent',
                batch_count = ?,
                total_records = ?,
                updated_at = ?
            WHERE domain = ? AND data_date = ? AND status = 'running'
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(batch_count)
        .bind(total_records)
        .bind(current_timestamp())
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncTask::try_from).transpose()
    }

    async fn complete_empty(&self, key: &TaskKey) -> Result<Option<SyncTask>> {
        let now = current_timestamp();
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            r#"
            UPDATE sync_task SET
                status = 'success',
                end_time = ?,
                updated_at = ?
            WHERE domain = ? AND data_date = ?
              AND status = 'messages_sent' AND batch_count = 0
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncTask::try_from).transpose()
    }

    async fn mark_failed(&self, key: &TaskKey, message: &str) -> Result<Option<SyncTask>> {
        let now = current_timestamp();
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            r#"
            UPDATE sync_task SET
                status = 'failed',
                error_message = ?,
                end_time = ?,
                updated_at = ?
            WHERE domain = ? AND data_date = ?
              AND status IN ('pending', 'running', 'messages_sent')
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(truncate_message(message, self.error_message_limit))
        .bind(now)
        .bind(now)
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncTask::try_from).transpose()
    }

    async fn increment_completed(&self, key: &TaskKey) -> Result<Option<SyncTask>> {
        let now = current_timestamp();

        // SET expressions read the pre-update row
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            r#"
            UPDATE sync_task SET
                completed_batch_count = completed_batch_count + 1,
                status = CASE
                    WHEN completed_batch_count + 1 = batch_count THEN 'success'
                    ELSE status
                END,
                end_time = CASE
                    WHEN completed_batch_count + 1 = batch_count THEN ?
                    ELSE end_time
                END,
                updated_at = ?
            WHERE domain = ? AND data_date = ?
              AND status = 'messages_sent'
              AND completed_batch_count < batch_count
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if row.is_none() {
            debug!(domain = %key.domain, data_date = %key.data_date, "Increment matched no task row");
        }

        row.map(SyncTask::try_from).transpose()
    }

    async fn find(&self, key: &TaskKey) -> Result<Option<SyncTask>> {
        let row = sqlx::query_as::<_, SyncTaskRow>(&format!(
            "SELECT {} FROM sync_task WHERE domain = ? AND data_date = ?",
            SELECT_COLUMNS
        ))
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncTask::try_from).transpose()
    }

    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<SyncTask>> {
        let rows = sqlx::query_as::<_, SyncTaskRow>(&format!(
            "SELECT {} FROM sync_task WHERE status = ? ORDER BY data_date ASC, domain ASC",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncTask::try_from).collect()
    }

    async fn find_by_date(&self, data_date: NaiveDate) -> Result<Vec<SyncTask>> {
        let rows = sqlx::query_as::<_, SyncTaskRow>(&format!(
            "SELECT {} FROM sync_task WHERE data_date = ? ORDER BY domain ASC",
            SELECT_COLUMNS
        ))
        .bind(data_date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncTask::try_from).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
