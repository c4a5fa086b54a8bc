//! # Fault Sync Configuration
//!
//! Tuning knobs for the sync pipeline.
//!
//! ## Overview
//!
//! [`FaultSyncConfig`] can be built in code through [`FaultSyncConfigBuilder`]
//! or deserialized from JSON, where every missing field falls back to its
//! default. Both paths end in [`FaultSyncConfig::validate`], which fails fast
//! on values the pipeline cannot run with.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::FaultSyncConfig;
//!
//! let config = FaultSyncConfig::builder()
//!     .default_domains(["d1", "d2"])
//!     .worker_pool_size(4)
//!     .page_size(5000)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Defaults
//!
//! | Knob | Default |
//! |------|---------|
//! | `worker_pool_size` | 20 |
//! | `queue_capacity` | 100 |
//! | `page_size` | 5000 |
//! | `write_batch_size` | 1000 |
//! | `max_redelivery` | 3 |
//! | `sync_days` | 5 |
//! | `max_sync_days` | 366 |
//! | `topic` | `fault-data-sync-topic` |
//! | `consumer_group` | `fault-data-sync-consumer` |
//! | `error_message_limit` | 500 |
//! | `database_url` | `sqlite::memory:` |
//! | `source_timeout_secs` | 30 |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 5000;
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_REDELIVERY: u32 = 3;
pub const DEFAULT_SYNC_DAYS: u32 = 5;
pub const DEFAULT_MAX_SYNC_DAYS: u32 = 366;
pub const DEFAULT_TOPIC: &str = "fault-data-sync-topic";
pub const DEFAULT_CONSUMER_GROUP: &str = "fault-data-sync-consumer";
pub const DEFAULT_ERROR_MESSAGE_LIMIT: usize = 500;
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;

/// Configuration of the fault sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSyncConfig {
    /// Number of sync jobs running in parallel
    pub worker_pool_size: usize,

    /// Bounded submission queue in front of the workers; when full the
    /// submitting caller runs the job itself
    pub queue_capacity: usize,

    /// Records requested per source pull, and so the maximum records per batch message
    pub page_size: u32,

    /// Records per bulk insert inside the consumer
    pub write_batch_size: usize,

    /// Redeliveries of a failing batch before it is dead-lettered
    pub max_redelivery: u32,

    /// Trailing days resynced per trigger (yesterday back to `sync_days` ago)
    pub sync_days: u32,

    /// Largest window a trigger may ask for
    pub max_sync_days: u32,

    /// Domains synced when the trigger names none
    pub default_domains: Vec<String>,

    /// Topic carrying batch messages
    pub topic: String,

    /// Consumer group of the batch consumer; also names the dead-letter topic
    pub consumer_group: String,

    /// Maximum characters of an error message persisted on a failed task
    pub error_message_limit: usize,

    /// SQLite connection string
    pub database_url: String,

    /// Base URL of the upstream fault service (HTTP source only)
    pub source_base_url: Option<String>,

    /// Per-request timeout of the HTTP source
    pub source_timeout_secs: u64,
}

impl Default for FaultSyncConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            max_redelivery: DEFAULT_MAX_REDELIVERY,
            sync_days: DEFAULT_SYNC_DAYS,
            max_sync_days: DEFAULT_MAX_SYNC_DAYS,
            default_domains: Vec::new(),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            error_message_limit: DEFAULT_ERROR_MESSAGE_LIMIT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            source_base_url: None,
            source_timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
        }
    }
}

impl FaultSyncConfig {
    /// Creates a new builder starting from the defaults.
    pub fn builder() -> FaultSyncConfigBuilder {
        FaultSyncConfigBuilder::default()
    }

    /// Parses a JSON document; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidDocument` if the document is malformed and
    /// `Error::Config` if the result fails [`validate`](Self::validate).
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidDocument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Pool size, queue capacity, page size, write batch size and sync days are non-zero
    /// - Topic and consumer group are non-empty
    /// - Sync days do not exceed `max_sync_days`
    /// - The error message limit is non-zero
    ///
    /// An empty `default_domains` is accepted here; a run without any
    /// resolvable domain is rejected when it is triggered.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(Error::Config(
                "Worker pool size must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 {
            return Err(Error::Config("Page size must be greater than 0".to_string()));
        }

        if self.write_batch_size == 0 {
            return Err(Error::Config(
                "Write batch size must be greater than 0".to_string(),
            ));
        }

        if self.sync_days == 0 {
            return Err(Error::Config("Sync days must be greater than 0".to_string()));
        }

        if self.sync_days > self.max_sync_days {
            return Err(Error::Config(format!(
                "Sync days ({}) exceeds the maximum window of {} days",
                self.sync_days, self.max_sync_days
            )));
        }

        if self.error_message_limit == 0 {
            return Err(Error::Config(
                "Error message limit must be greater than 0".to_string(),
            ));
        }

        if self.topic.trim().is_empty() {
            return Err(Error::Config("Topic cannot be empty".to_string()));
        }

        if self.consumer_group.trim().is_empty() {
            return Err(Error::Config("Consumer group cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Request timeout of the HTTP source
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// Builder for constructing [`FaultSyncConfig`] instances.
///
/// Unset values keep their defaults; [`build()`](FaultSyncConfigBuilder::build)
/// validates the result.
#[derive(Debug, Default)]
pub struct FaultSyncConfigBuilder {
    config: FaultSyncConfig,
}

impl FaultSyncConfigBuilder {
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn write_batch_size(mut self, size: usize) -> Self {
        self.config.write_batch_size = size;
        self
    }

    pub fn max_redelivery(mut self, attempts: u32) -> Self {
        self.config.max_redelivery = attempts;
        self
    }

    pub fn sync_days(mut self, days: u32) -> Self {
        self.config.sync_days = days;
        self
    }

    pub fn max_sync_days(mut self, days: u32) -> Self {
        self.config.max_sync_days = days;
        self
    }

    /// Sets the domains synced when a trigger names none.
    pub fn default_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.config.consumer_group = group.into();
        self
    }

    pub fn error_message_limit(mut self, limit: usize) -> Self {
        self.config.error_message_limit = limit;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn source_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.source_base_url = Some(url.into());
        self
    }

    pub fn source_timeout_secs(mut self, secs: u64) -> Self {
        self.config.source_timeout_secs = secs;
        self
    }

    /// Builds and validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` with an actionable message when a value is out of range.
    pub fn build(self) -> Result<FaultSyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
