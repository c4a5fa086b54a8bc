//! # Fault Record Store
//!
//! Storage of replicated fault records, unique per `(domain, data_date, rank)`.
//!
//! Writes are idempotent: [`FaultRecordRepository::insert_ignore`] skips rows
//! whose unique key already exists, so a redelivered batch leaves the table
//! unchanged. A resync clears the whole `(domain, data_date)` slice first with
//! [`FaultRecordRepository::delete_by_key`].

use crate::repository::DATE_FORMAT;
use crate::task::{current_timestamp, TaskKey};
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::FaultRecord;
use chrono::NaiveDate;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

/// Columns bound per inserted row
const COLUMNS_PER_ROW: usize = 7;

/// Rows per INSERT statement, kept under SQLite's bound-parameter limit
const MAX_ROWS_PER_STATEMENT: usize = 32_766 / COLUMNS_PER_ROW;

/// Repository trait for fault record persistence
#[async_trait]
pub trait FaultRecordRepository: Send + Sync {
    /// Insert records, silently skipping keys that already exist.
    ///
    /// Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert_ignore(&self, records: &[FaultRecord]) -> Result<u64>;

    /// Remove every record of one domain and day; returns the number removed
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn delete_by_key(&self, key: &TaskKey) -> Result<u64>;

    /// Count the records of one domain and day
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn count(&self, key: &TaskKey) -> Result<i64>;

    /// Records of one domain and day, ordered by rank
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find(&self, key: &TaskKey) -> Result<Vec<FaultRecord>>;
}

/// SQLite implementation of FaultRecordRepository
pub struct SqliteFaultRecordRepository {
    pool: SqlitePool,
}

impl SqliteFaultRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the table
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fault_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                data_date TEXT NOT NULL,
                rank INTEGER NOT NULL,
                fault_type TEXT NOT NULL,
                device_id TEXT NOT NULL,
                fault_detail TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (domain, data_date, rank)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct FaultRecordRow {
    domain: String,
    data_date: String,
    rank: i64,
    fault_type: String,
    device_id: String,
    fault_detail: String,
}

impl TryFrom<FaultRecordRow> for FaultRecord {
    type Error = SyncError;

    fn try_from(row: FaultRecordRow) -> Result<Self> {
        let data_date = NaiveDate::parse_from_str(&row.data_date, DATE_FORMAT)
            .map_err(|e| SyncError::Database(format!("Invalid data_date {}: {}", row.data_date, e)))?;

        Ok(FaultRecord {
            domain: row.domain,
            data_date,
            rank: row.rank,
            fault_type: row.fault_type,
            device_id: row.device_id,
            fault_detail: row.fault_detail,
        })
    }
}

#[async_trait]
impl FaultRecordRepository for SqliteFaultRecordRepository {
    async fn insert_ignore(&self, records: &[FaultRecord]) -> Result<u64> {
        let now = current_timestamp();
        let mut inserted = 0;

        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO fault_record \
                 (domain, data_date, rank, fault_type, device_id, fault_detail, created_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.domain.clone())
                    .push_bind(record.data_date.format(DATE_FORMAT).to_string())
                    .push_bind(record.rank)
                    .push_bind(record.fault_type.clone())
                    .push_bind(record.device_id.clone())
                    .push_bind(record.fault_detail.clone())
                    .push_bind(now);
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn delete_by_key(&self, key: &TaskKey) -> Result<u64> {
        let result = sqlx::query("DELETE FROM fault_record WHERE domain = ? AND data_date = ?")
            .bind(&key.domain)
            .bind(key.data_date.format(DATE_FORMAT).to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count(&self, key: &TaskKey) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM fault_record WHERE domain = ? AND data_date = ?",
        )
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))
    }

    async fn find(&self, key: &TaskKey) -> Result<Vec<FaultRecord>> {
        let rows = sqlx::query_as::<_, FaultRecordRow>(
            r#"
            SELECT domain, data_date, rank, fault_type, device_id, fault_detail
            FROM fault_record
            WHERE domain = ? AND data_date = ?
            ORDER BY rank ASC
            "#,
        )
        .bind(&key.domain)
        .bind(key.data_date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(FaultRecord::try_from).collect()
    }
}
