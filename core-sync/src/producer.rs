//! # Batch Producer
//!
//! Publishes one pulled page as one [`BatchMessage`]. All batches of a task
//! share the ordering key `{domain}_{data_date}`, so the broker never reorders
//! them relative to each other.

use crate::message::BatchMessage;
use crate::task::TaskKey;
use crate::{Result, SyncError};
use bridge_traits::{FaultRecord, MessageBroker, OutboundMessage, PublishReceipt};
use std::sync::Arc;
use tracing::debug;

pub struct BatchProducer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl BatchProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one page unmodified.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the page cannot be encoded and
    /// `SyncError::Publish` if the broker rejects it.
    pub async fn send(
        &self,
        key: &TaskKey,
        batch_index: u32,
        records: Vec<FaultRecord>,
    ) -> Result<PublishReceipt> {
        let record_count = records.len();
        let message = BatchMessage::new(key, batch_index, records);

        let outbound = OutboundMessage::json(
            self.topic.as_str(),
            key.ordering_key(),
            key.message_key(batch_index),
            &message,
        )
        .map_err(|e| SyncError::Serialization(e.to_string()))?;

        let receipt = self
            .broker
            .publish(outbound)
            .await
            .map_err(SyncError::Publish)?;

        debug!(
            domain = %key.domain,
            data_date = %key.data_date,
            batch_index,
            records = record_count,
            message_id = %receipt.message_id,
            "Batch published"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, MessageHandler, MessageId, Subscription};
    use chrono::NaiveDate;
    use mockall::mock;

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

    fn key() -> TaskKey {
        TaskKey::new("d1", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_send_uses_task_ordering_key() {
        let mut broker = MockBroker::new();
        broker
            .expect_publish()
            .withf(|m| {
                m.topic == "faults"
                    && m.ordering_key == "d1_2025-01-01"
                    && m.message_key == "d1_2025-01-01_4"
            })
            .times(1)
            .returning(|_| {
                Ok(PublishReceipt {
                    message_id: MessageId::new(),
                })
            });

        let producer = BatchProducer::new(Arc::new(broker), "faults");
        producer.send(&key(), 4, Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_carries_page() {
        let mut broker = MockBroker::new();
        broker.expect_publish().times(1).returning(|m| {
            let decoded: BatchMessage = serde_json::from_slice(&m.payload).unwrap();
            assert_eq!(decoded.batch_index, 0);
            assert_eq!(decoded.records.len(), 1);
            assert_eq!(decoded.records[0].rank, 7);
            Ok(PublishReceipt {
                message_id: MessageId::new(),
            })
        });

        let record = FaultRecord {
            domain: "d1".to_string(),
            data_date: key().data_date,
            rank: 7,
            fault_type: "FAULT_TYPE_7".to_string(),
            device_id: "DEVICE_7".to_string(),
            fault_detail: "detail".to_string(),
        };

        let producer = BatchProducer::new(Arc::new(broker), "faults");
        producer.send(&key(), 0, vec![record]).await.unwrap();
    }

    #[tokio::test]
    async fn test_broker_failure_is_publish_error() {
        let mut broker = MockBroker::new();
        broker
            .expect_publish()
            .returning(|_| Err(BridgeError::Broker("unavailable".to_string())));

        let producer = BatchProducer::new(Arc::new(broker), "faults");
        let err = producer.send(&key(), 0, Vec::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Publish(_)));
    }
}
