//! # Fault Data Sync Pipeline
//!
//! Replicates per-domain, per-day fault record sets from an upstream source
//! into the local store.
//!
//! ## Overview
//!
//! A run covers every `(domain, data_date)` pair of its window. For each pair
//! a sync job clears the stored records, pulls the source page by page and
//! publishes each page as one batch message. Consumers, decoupled by the
//! broker, write batches idempotently and count them on the task row, which
//! turns SUCCESS once every batch has landed. A batch that exhausts
//! redelivery reaches the dead-letter handler and fails the task.
//!
//! ## Components
//!
//! - **Task State Machine** (`task`): Statuses, keys and transition rules
//! - **Repositories** (`repository`, `record_store`): SQLite persistence of tasks and records
//! - **Progress Tracker** (`tracker`): Conditional task transitions and lifecycle events
//! - **Batch Producer** (`producer`): One page in, one ordered broker message out
//! - **Batch Consumer** (`consumer`): Idempotent writes followed by a progress increment
//! - **Dead-Letter Handler** (`dead_letter`): Fails tasks whose batch exhausted redelivery
//! - **Sync Job** (`sync_job`): Cursor pull loop of one task
//! - **Worker Pool** (`worker_pool`): Bounded queue with caller-runs backpressure
//! - **Sync Orchestrator** (`orchestrator`): Runs every job of a run and aggregates results
//! - **Trigger** (`trigger`): Scheduler parameters and the date window

pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod producer;
pub mod record_store;
pub mod repository;
pub mod sync_job;
pub mod task;
pub mod tracker;
pub mod trigger;
pub mod worker_pool;

pub use consumer::BatchConsumer;
pub use dead_letter::DeadLetterHandler;
pub use error::{Result, SyncError};
pub use message::BatchMessage;
pub use orchestrator::{JobFailure, RunSummary, SyncOrchestrator};
pub use producer::BatchProducer;
pub use record_store::{FaultRecordRepository, SqliteFaultRecordRepository};
pub use repository::{SqliteSyncTaskRepository, SyncTaskRepository};
pub use sync_job::{JobReport, SyncJob};
pub use task::{SyncStatus, SyncTask, TaskKey};
pub use tracker::{IncrementOutcome, ProgressTracker};
pub use trigger::{RunPlan, SyncParams};
pub use worker_pool::{JobHandle, WorkerPool};
