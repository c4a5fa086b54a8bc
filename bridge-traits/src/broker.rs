//! Message Broker Abstraction
//!
//! At-least-once topic broker with bounded redelivery and a dead-letter route.
//!
//! ## Delivery model
//!
//! - Messages sharing an ordering key are delivered in publish order
//! - A [`HandlerError::Failed`] triggers redelivery of the same message
//! - After the group's redelivery budget is exhausted the message is
//!   re-published to [`dead_letter_topic`] for that consumer group
//! - A [`HandlerError::NotReady`] retries later without spending that budget
//! - Dead-letter messages are never dead-lettered a second time
//! - A handler may see the same message more than once

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Reserved prefix of dead-letter topics.
pub const DEAD_LETTER_PREFIX: &str = "%DLQ%";

/// Dead-letter topic for a consumer group: the reserved prefix followed by the group name.
pub fn dead_letter_topic(consumer_group: &str) -> String {
    format!("{}{}", DEAD_LETTER_PREFIX, consumer_group)
}

/// Unique identifier assigned to a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message ready to be published.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partitioning key; messages with equal keys are never reordered.
    pub ordering_key: String,
    /// Free-form key used for tracing a single message.
    pub message_key: String,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(
        topic: impl Into<String>,
        ordering_key: impl Into<String>,
        message_key: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            ordering_key: ordering_key.into(),
            message_key: message_key.into(),
            payload,
        }
    }

    /// Encode a serializable body as JSON.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        ordering_key: impl Into<String>,
        message_key: impl Into<String>,
        body: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(body).map_err(|e| {
            crate::BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })?;
        Ok(Self::new(topic, ordering_key, message_key, Bytes::from(payload)))
    }
}

/// Broker acknowledgement of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: MessageId,
}

/// One delivery attempt of a message to a consumer group.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: MessageId,
    pub topic: String,
    pub ordering_key: String,
    pub message_key: String,
    pub payload: Bytes,
    /// Zero for the first delivery, incremented on each redelivery.
    pub redelivery_count: u32,
    /// Last handler error, set on dead-letter deliveries.
    pub last_error: Option<String>,
}

impl Delivery {
    /// Decode the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            crate::BridgeError::InvalidResponse(format!("JSON deserialization failed: {}", e))
        })
    }
}

/// Subscription settings for a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub consumer_group: String,
    /// Redeliveries allowed after the first failed attempt before dead-lettering.
    pub max_redelivery: u32,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>, max_redelivery: u32) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            max_redelivery,
        }
    }
}

/// Why a handler did not acknowledge a delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Processing failed; the redelivery counts against the group's budget.
    #[error("{0}")]
    Failed(String),

    /// The message depends on state that has not been reached yet; it is
    /// retried later without counting as a failed attempt.
    #[error("not ready: {0}")]
    NotReady(String),
}

impl HandlerError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Consumer callback invoked by the broker for each delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError>;
}

/// Whether a topic is a dead-letter topic.
pub fn is_dead_letter_topic(topic: &str) -> bool {
    topic.starts_with(DEAD_LETTER_PREFIX)
}

/// Publishing and subscription side of a topic broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish one message; returns once the broker has accepted it.
    async fn publish(&self, message: OutboundMessage) -> Result<PublishReceipt>;

    /// Register a handler for a topic under a consumer group.
    async fn subscribe(
        &self,
        subscription: Subscription,
        handler: std::sync::Arc<dyn MessageHandler>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_topic_naming() {
        assert_eq!(
            dead_letter_topic("fault-data-sync-consumer"),
            "%DLQ%fault-data-sync-consumer"
        );
    }

    #[test]
    fn test_dead_letter_topic_detection() {
        assert!(is_dead_letter_topic(&dead_letter_topic("g")));
        assert!(!is_dead_letter_topic("fault-data-sync-topic"));
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::failed("disk full").to_string(), "disk full");
        assert_eq!(
            HandlerError::NotReady("d1 still publishing".to_string()).to_string(),
            "not ready: d1 still publishing"
        );
    }

    #[test]
    fn test_outbound_json_round_trips_through_delivery() {
        let message = OutboundMessage::json("topic", "d1_2025-01-01", "d1_2025-01-01_0", &vec![1, 2, 3])
            .unwrap();

        let delivery = Delivery {
            message_id: MessageId::new(),
            topic: message.topic.clone(),
            ordering_key: message.ordering_key.clone(),
            message_key: message.message_key.clone(),
            payload: message.payload.clone(),
            redelivery_count: 0,
            last_error: None,
        };

        let decoded: Vec<i32> = delivery.json().unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn test_delivery_rejects_garbage() {
        let delivery = Delivery {
            message_id: MessageId::new(),
            topic: "t".to_string(),
            ordering_key: "k".to_string(),
            message_key: "k".to_string(),
            payload: Bytes::from_static(b"not json"),
            redelivery_count: 0,
            last_error: None,
        };

        let result: Result<Vec<i32>> = delivery.json();
        assert!(result.is_err());
    }
}
