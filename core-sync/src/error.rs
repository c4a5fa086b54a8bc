use bridge_traits::BridgeError;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source pull failed: {0}")]
    Source(#[source] BridgeError),

    #[error("Batch publish failed: {0}")]
    Publish(#[source] BridgeError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cursor violation: rank {rank} is not greater than {previous}")]
    CursorViolation { previous: i64, rank: i64 },

    #[error("Source returned {len} records for a page of {page_size}")]
    PageTooLarge { len: usize, page_size: u32 },

    #[error("Sync task {domain} {data_date} not found")]
    TaskNotFound { domain: String, data_date: NaiveDate },

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync task {domain} {data_date} has not finished publishing yet")]
    DeliveryNotReady { domain: String, data_date: NaiveDate },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
