use std::sync::Arc;

use async_trait::async_trait;
use bridge_desktop::{InMemoryBroker, SyntheticFaultSource};
use bridge_traits::{
    FixedClock, MessageBroker, MessageHandler, MessageId, OutboundMessage, PublishReceipt,
    Subscription,
};
use chrono::NaiveDate;
use core_service::{
    dead_letter_group, CoreError, FaultSyncConfig, FaultSyncService, SyncDependencies, SyncEvent,
    SyncStatus,
};
use core_sync::SyncError;
use mockall::mock;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

mock! {
    Broker {}

    #[async_trait]
    impl MessageBroker for Broker {
        async fn publish(&self, message: OutboundMessage) -> bridge_traits::error::Result<PublishReceipt>;
        async fn subscribe(
            &self,
            subscription: Subscription,
            handler: Arc<dyn MessageHandler>,
        ) -> bridge_traits::error::Result<()>;
    }
}

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 4).unwrap()
}

fn config() -> FaultSyncConfig {
    FaultSyncConfig::builder()
        .worker_pool_size(2)
        .queue_capacity(4)
        .page_size(100)
        .write_batch_size(40)
        .sync_days(2)
        .default_domains(["d1", "d2"])
        .build()
        .unwrap()
}

async fn service(broker: Arc<InMemoryBroker>, total_per_key: i64) -> FaultSyncService {
    let deps = SyncDependencies::new(
        Arc::new(SyntheticFaultSource::new(total_per_key)),
        broker,
        memory_pool().await,
    )
    .with_clock(Arc::new(FixedClock::on(today())));

    FaultSyncService::bootstrap(config(), deps).await.unwrap()
}

#[tokio::test]
async fn test_run_json_syncs_every_domain_and_day() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(broker.clone(), 250).await;

    let summary = service.run_json("").await.unwrap();
    assert_eq!(summary.success_count, 4);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(summary.total_records, 1000);

    // 250 records at 100 per page
    assert_eq!(broker.drain().await, 12);

    for day in [3, 2] {
        let date = NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        for domain in ["d1", "d2"] {
            let task = service.task_status(domain, date).await.unwrap().unwrap();
            assert_eq!(task.status, SyncStatus::Success);
            assert_eq!(task.batch_count, 3);
            assert_eq!(service.record_count(domain, date).await.unwrap(), 250);
        }
    }

    let today_task = service.task_status("d1", today()).await.unwrap();
    assert!(today_task.is_none());
}

#[tokio::test]
async fn test_params_override_config_defaults() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(broker.clone(), 10).await;

    let summary = service
        .run_json(r#"{"domains": ["x"], "syncDays": 1}"#)
        .await
        .unwrap();
    assert_eq!(summary.success_count, 1);
    broker.drain().await;

    let date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
    let tasks = service.tasks_for_date(date).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].domain, "x");
    assert_eq!(tasks[0].status, SyncStatus::Success);
}

#[tokio::test]
async fn test_run_without_any_domain_fails_fast() {
    let deps = SyncDependencies::new(
        Arc::new(SyntheticFaultSource::new(10)),
        Arc::new(InMemoryBroker::new()),
        memory_pool().await,
    );
    let config = FaultSyncConfig::builder().build().unwrap();
    let service = FaultSyncService::bootstrap(config, deps).await.unwrap();

    let err = service.run_json("").await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::Config(_))));
}

#[tokio::test]
async fn test_events_report_run_and_tasks() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(broker.clone(), 5).await;
    let mut events = service.subscribe_events();

    service.run_json(r#"{"domains": ["d1"], "syncDays": 1}"#).await.unwrap();
    broker.drain().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(SyncEvent::RunStarted { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SyncEvent::MessagesSent { batch_count: 1, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SyncEvent::TaskSucceeded { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SyncEvent::RunFinished { success_count: 1, .. })));
}

#[tokio::test]
async fn test_bootstrap_subscribes_consumer_and_dead_letter_handler() {
    let mut broker = MockBroker::new();
    broker
        .expect_subscribe()
        .withf(|s, _| {
            s.topic == "fault-data-sync-topic"
                && s.consumer_group == "fault-data-sync-consumer"
                && s.max_redelivery == 3
        })
        .times(1)
        .returning(|_, _| Ok(()));
    broker
        .expect_subscribe()
        .withf(|s, _| {
            s.topic == "%DLQ%fault-data-sync-consumer"
                && s.consumer_group == dead_letter_group("fault-data-sync-consumer")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    broker.expect_publish().never().returning(|_| {
        Ok(PublishReceipt {
            message_id: MessageId::new(),
        })
    });

    let deps = SyncDependencies::new(
        Arc::new(SyntheticFaultSource::new(10)),
        Arc::new(broker),
        memory_pool().await,
    );
    FaultSyncService::bootstrap(FaultSyncConfig::default(), deps)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let deps = SyncDependencies::new(
        Arc::new(SyntheticFaultSource::new(10)),
        Arc::new(InMemoryBroker::new()),
        memory_pool().await,
    );
    let config = FaultSyncConfig {
        page_size: 0,
        ..FaultSyncConfig::default()
    };

    let result = FaultSyncService::bootstrap(config, deps).await;
    assert!(matches!(result, Err(CoreError::Runtime(_))));
}

#[cfg(feature = "desktop-shims")]
#[tokio::test]
async fn test_desktop_bootstrap_requires_source_url() {
    let result = core_service::bootstrap_desktop(FaultSyncConfig::default()).await;
    assert!(matches!(
        result,
        Err(CoreError::CapabilityMissing { .. })
    ));
}
