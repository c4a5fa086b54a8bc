//! # Batch Consumer
//!
//! Writes one delivered [`BatchMessage`] into the record store and reports it
//! to the [`ProgressTracker`].
//!
//! Records are written in sub-batches of `write_batch_size` with
//! insert-or-ignore, so a redelivered message leaves the stored rows as they
//! were. The tracker increment after the writes has no such guard: a batch
//! delivered twice is counted twice while the task is MESSAGES_SENT, which can
//! complete a task before every distinct batch has landed. The only cap is
//! that `completed_batch_count` never exceeds `batch_count`.
//!
//! A batch can reach the consumer before its own job has published the last
//! page. The increment is then a no-op, and the handler answers
//! [`HandlerError::NotReady`] so the broker retries the batch later without
//! spending its failure budget.

use crate::message::BatchMessage;
use crate::record_store::FaultRecordRepository;
use crate::tracker::{IncrementOutcome, ProgressTracker};
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{Delivery, HandlerError, MessageHandler};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct BatchConsumer {
    records: Arc<dyn FaultRecordRepository>,
    tracker: Arc<ProgressTracker>,
    write_batch_size: usize,
}

impl BatchConsumer {
    pub fn new(
        records: Arc<dyn FaultRecordRepository>,
        tracker: Arc<ProgressTracker>,
        write_batch_size: usize,
    ) -> Self {
        Self {
            records,
            tracker,
            write_batch_size: write_batch_size.max(1),
        }
    }

    /// Write the batch and count it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DeliveryNotReady` when the batch overtook its own
    /// producer (the task is still RUNNING). The records are already written
    /// and the task is unchanged; a later delivery counts the batch once the
    /// task reaches MESSAGES_SENT. Database failures are returned as-is.
    pub async fn process(&self, message: &BatchMessage) -> Result<IncrementOutcome> {
        let key = message.key();

        let mut inserted = 0;
        for chunk in message.records.chunks(self.write_batch_size) {
            inserted += self.records.insert_ignore(chunk).await?;
        }

        debug!(
            domain = %key.domain,
            data_date = %key.data_date,
            batch_index = message.batch_index,
            records = message.records.len(),
            inserted,
            "Batch written"
        );

        let outcome = self.tracker.increment(&key).await?;
        match outcome {
            IncrementOutcome::Applied { .. } => {}
            IncrementOutcome::NotReady => {
                return Err(SyncError::DeliveryNotReady {
                    domain: key.domain,
                    data_date: key.data_date,
                });
            }
            IncrementOutcome::Ignored(status) => {
                debug!(
                    domain = %key.domain,
                    data_date = %key.data_date,
                    batch_index = message.batch_index,
                    status = %status,
                    "Batch acknowledged without progress"
                );
            }
            IncrementOutcome::Missing => {
                warn!(
                    domain = %key.domain,
                    data_date = %key.data_date,
                    batch_index = message.batch_index,
                    "Batch for unknown task"
                );
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for BatchConsumer {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let message: BatchMessage = delivery.json().map_err(HandlerError::failed)?;

        if delivery.redelivery_count > 0 {
            debug!(
                message_key = %delivery.message_key,
                redelivery_count = delivery.redelivery_count,
                "Redelivered batch"
            );
        }

        match self.process(&message).await {
            Ok(_) => Ok(()),
            Err(e @ SyncError::DeliveryNotReady { .. }) => {
                Err(HandlerError::NotReady(e.to_string()))
            }
            Err(e) => Err(HandlerError::failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::SqliteFaultRecordRepository;
    use crate::repository::{SqliteSyncTaskRepository, SyncTaskRepository};
    use crate::task::{SyncStatus, TaskKey};
    use bridge_traits::{FaultRecord, MessageId, OutboundMessage};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    struct Fixture {
        consumer: BatchConsumer,
        tasks: Arc<SqliteSyncTaskRepository>,
        records: Arc<SqliteFaultRecordRepository>,
    }

    async fn fixture(write_batch_size: usize) -> Fixture {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let tasks = Arc::new(SqliteSyncTaskRepository::new(pool.clone(), 500));
        tasks.initialize().await.unwrap();
        let records = Arc::new(SqliteFaultRecordRepository::new(pool));
        records.initialize().await.unwrap();

        let tracker = Arc::new(ProgressTracker::new(tasks.clone()));
        let consumer = BatchConsumer::new(records.clone(), tracker, write_batch_size);

        Fixture {
            consumer,
            tasks,
            records,
        }
    }

    fn key() -> TaskKey {
        TaskKey::new("d1", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    fn batch(index: u32, ranks: std::ops::RangeInclusive<i64>) -> BatchMessage {
        let records = ranks
            .map(|rank| FaultRecord {
                domain: "d1".to_string(),
                data_date: key().data_date,
                rank,
                fault_type: format!("FAULT_TYPE_{}", rank % 10),
                device_id: format!("DEVICE_{}", rank),
                fault_detail: "detail".to_string(),
            })
            .collect();
        BatchMessage::new(&key(), index, records)
    }

    fn delivery(message: &BatchMessage) -> Delivery {
        let outbound = OutboundMessage::json("t", "k", "k", message).unwrap();
        Delivery {
            message_id: MessageId::new(),
            topic: outbound.topic,
            ordering_key: outbound.ordering_key,
            message_key: outbound.message_key,
            payload: outbound.payload,
            redelivery_count: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_writes_in_sub_batches_and_counts_once() {
        let f = fixture(3).await;
        f.tasks.begin_run(&key()).await.unwrap();
        f.tasks.mark_messages_sent(&key(), 2, 20).await.unwrap();

        let outcome = f.consumer.process(&batch(0, 1..=10)).await.unwrap();
        assert_eq!(
            outcome,
            IncrementOutcome::Applied {
                completed: 1,
                batch_count: 2,
                finished: false
            }
        );
        assert_eq!(f.records.count(&key()).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_early_batch_is_written_then_rejected() {
        let f = fixture(100).await;
        f.tasks.begin_run(&key()).await.unwrap();

        let err = f.consumer.process(&batch(0, 1..=5)).await.unwrap_err();
        assert!(matches!(err, SyncError::DeliveryNotReady { .. }));
        assert_eq!(f.records.count(&key()).await.unwrap(), 5);

        // redelivery after the producer finished counts it
        f.tasks.mark_messages_sent(&key(), 1, 5).await.unwrap();
        let outcome = f.consumer.process(&batch(0, 1..=5)).await.unwrap();
        assert!(matches!(outcome, IncrementOutcome::Applied { finished: true, .. }));
        assert_eq!(f.records.count(&key()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_late_batch_after_failure_is_acknowledged() {
        let f = fixture(100).await;
        f.tasks.begin_run(&key()).await.unwrap();
        f.tasks.mark_messages_sent(&key(), 2, 10).await.unwrap();
        f.tasks.mark_failed(&key(), "dead-lettered").await.unwrap();

        let outcome = f.consumer.process(&batch(1, 6..=10)).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Ignored(SyncStatus::Failed));

        let task = f.tasks.find(&key()).await.unwrap().unwrap();
        assert_eq!(task.status, SyncStatus::Failed);
        assert_eq!(task.completed_batch_count, 0);
    }

    #[tokio::test]
    async fn test_handler_rejects_undecodable_payload() {
        let f = fixture(100).await;
        let mut bad = delivery(&batch(0, 1..=1));
        bad.payload = bytes::Bytes::from_static(b"{not json");

        assert!(matches!(
            f.consumer.handle(&bad).await,
            Err(HandlerError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_defers_batch_of_running_task() {
        let f = fixture(100).await;
        f.tasks.begin_run(&key()).await.unwrap();

        let err = f.consumer.handle(&delivery(&batch(0, 1..=4))).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotReady(_)));

        let task = f.tasks.find(&key()).await.unwrap().unwrap();
        assert_eq!(task.status, SyncStatus::Running);
        assert_eq!(task.completed_batch_count, 0);
    }

    #[tokio::test]
    async fn test_handler_acknowledges_written_batch() {
        let f = fixture(100).await;
        f.tasks.begin_run(&key()).await.unwrap();
        f.tasks.mark_messages_sent(&key(), 1, 3).await.unwrap();

        f.consumer.handle(&delivery(&batch(0, 1..=3))).await.unwrap();

        let task = f.tasks.find(&key()).await.unwrap().unwrap();
        assert_eq!(task.status, SyncStatus::Success);
    }
}
