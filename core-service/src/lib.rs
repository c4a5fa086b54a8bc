//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (fault source,
//! message broker, clock) and a SQLite pool into a ready sync pipeline.
//! Desktop hosts typically enable the `desktop-shims` feature (which depends
//! on `bridge-desktop`) and call [`bootstrap_desktop`]; other hosts build
//! their own [`SyncDependencies`] and call [`FaultSyncService::bootstrap`].

pub mod error;

pub use error::{CoreError, Result};

pub use core_runtime::events::{EventBus, SyncEvent};
pub use core_runtime::FaultSyncConfig;
pub use core_sync::{RunSummary, SyncParams, SyncStatus, SyncTask};

use std::sync::Arc;

use bridge_traits::{
    dead_letter_topic, Clock, FaultSource, MessageBroker, Subscription, SystemClock,
};
use chrono::NaiveDate;
use core_runtime::events::Receiver;
use core_sync::{
    BatchConsumer, BatchProducer, DeadLetterHandler, FaultRecordRepository, ProgressTracker,
    SqliteFaultRecordRepository, SqliteSyncTaskRepository, SyncJob, SyncOrchestrator,
    SyncTaskRepository, TaskKey, WorkerPool,
};
use sqlx::SqlitePool;
use tracing::info;

#[cfg(feature = "desktop-shims")]
mod desktop;
#[cfg(feature = "desktop-shims")]
pub use desktop::{bootstrap_desktop, DesktopSync};

/// Aggregated handle to all bridge dependencies the pipeline requires.
pub struct SyncDependencies {
    pub source: Arc<dyn FaultSource>,
    pub broker: Arc<dyn MessageBroker>,
    pub pool: SqlitePool,
    pub clock: Arc<dyn Clock>,
}

impl SyncDependencies {
    /// Construct a dependency bundle using the system clock.
    pub fn new(
        source: Arc<dyn FaultSource>,
        broker: Arc<dyn MessageBroker>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            source,
            broker,
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Consumer group of the dead-letter handler for a main consumer group.
pub fn dead_letter_group(consumer_group: &str) -> String {
    format!("{}-dlq", consumer_group)
}

/// Primary façade exposed to host applications.
pub struct FaultSyncService {
    config: FaultSyncConfig,
    tasks: Arc<SqliteSyncTaskRepository>,
    records: Arc<SqliteFaultRecordRepository>,
    orchestrator: SyncOrchestrator,
    events: EventBus,
}

impl FaultSyncService {
    /// Validate the config, create the schema and subscribe the consumer and
    /// dead-letter handler to the broker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bootstrap(config: FaultSyncConfig, deps: SyncDependencies) -> Result<Self> {
        config.validate()?;

        let tasks = Arc::new(SqliteSyncTaskRepository::new(
            deps.pool.clone(),
            config.error_message_limit,
        ));
        tasks.initialize().await?;
        let records = Arc::new(SqliteFaultRecordRepository::new(deps.pool.clone()));
        records.initialize().await?;

        let events = EventBus::default();
        let tracker = Arc::new(ProgressTracker::new(tasks.clone()).with_event_bus(events.clone()));

        let consumer = Arc::new(BatchConsumer::new(
            records.clone(),
            tracker.clone(),
            config.write_batch_size,
        ));
        deps.broker
            .subscribe(
                Subscription::new(
                    config.topic.as_str(),
                    config.consumer_group.as_str(),
                    config.max_redelivery,
                ),
                consumer,
            )
            .await?;

        let dead_letters = Arc::new(DeadLetterHandler::new(tracker.clone()));
        deps.broker
            .subscribe(
                Subscription::new(
                    dead_letter_topic(&config.consumer_group),
                    dead_letter_group(&config.consumer_group),
                    config.max_redelivery,
                ),
                dead_letters,
            )
            .await?;

        let producer = Arc::new(BatchProducer::new(deps.broker.clone(), config.topic.as_str()));
        let job = Arc::new(SyncJob::new(
            deps.source,
            producer,
            records.clone(),
            tracker,
            config.page_size,
        ));
        let orchestrator = SyncOrchestrator::new(
            job,
            WorkerPool::new(config.worker_pool_size, config.queue_capacity),
            deps.clock,
            config.default_domains.clone(),
            config.sync_days,
        )
        .with_max_sync_days(config.max_sync_days)
        .with_event_bus(events.clone());

        info!(
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            workers = config.worker_pool_size,
            page_size = config.page_size,
            "Fault sync service ready"
        );

        Ok(Self {
            config,
            tasks,
            records,
            orchestrator,
            events,
        })
    }

    pub fn config(&self) -> &FaultSyncConfig {
        &self.config
    }

    /// Run every job of the resolved window and return the aggregate summary.
    pub async fn run(&self, params: &SyncParams) -> Result<RunSummary> {
        Ok(self.orchestrator.run(params).await?)
    }

    /// Run with the scheduler's raw JSON parameter string.
    pub async fn run_json(&self, raw: &str) -> Result<RunSummary> {
        self.run(&SyncParams::parse(raw)).await
    }

    /// Persisted status of one domain and day.
    pub async fn task_status(&self, domain: &str, data_date: NaiveDate) -> Result<Option<SyncTask>> {
        Ok(self.tasks.find(&TaskKey::new(domain, data_date)).await?)
    }

    pub async fn tasks_for_date(&self, data_date: NaiveDate) -> Result<Vec<SyncTask>> {
        Ok(self.tasks.find_by_date(data_date).await?)
    }

    pub async fn tasks_with_status(&self, status: SyncStatus) -> Result<Vec<SyncTask>> {
        Ok(self.tasks.find_by_status(status).await?)
    }

    /// Number of stored records of one domain and day.
    pub async fn record_count(&self, domain: &str, data_date: NaiveDate) -> Result<i64> {
        Ok(self.records.count(&TaskKey::new(domain, data_date)).await?)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the worker pool once in-flight jobs are done.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
