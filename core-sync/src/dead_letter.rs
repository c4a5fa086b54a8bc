//! Dead-letter handling: a batch that exhausted redelivery fails its task for good.

use crate::message::BatchMessage;
use crate::tracker::ProgressTracker;
use crate::Result;
use async_trait::async_trait;
use bridge_traits::{Delivery, HandlerError, MessageHandler};
use core_runtime::events::FailureOrigin;
use std::sync::Arc;
use tracing::{error, warn};

pub struct DeadLetterHandler {
    tracker: Arc<ProgressTracker>,
}

impl DeadLetterHandler {
    pub fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self { tracker }
    }

    /// Mark the batch's task FAILED.
    ///
    /// Returns `false` when the task was already terminal.
    pub async fn process(&self, message: &BatchMessage, last_error: Option<&str>) -> Result<bool> {
        let key = message.key();
        let reason = format!(
            "Batch {} of {} ({} records) exhausted redelivery: {}",
            message.batch_index,
            key,
            message.records.len(),
            last_error.unwrap_or("unknown error")
        );

        error!(
            domain = %key.domain,
            data_date = %key.data_date,
            batch_index = message.batch_index,
            records = message.records.len(),
            "Batch dead-lettered"
        );

        let failed = self
            .tracker
            .fail(&key, &reason, FailureOrigin::DeadLetter)
            .await?;
        Ok(failed.is_some())
    }
}

#[async_trait]
impl MessageHandler for DeadLetterHandler {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let message: BatchMessage = match delivery.json() {
            Ok(message) => message,
            Err(e) => {
                // Nothing identifies a task; retrying cannot help
                warn!(
                    message_key = %delivery.message_key,
                    error = %e,
                    "Dropping undecodable dead letter"
                );
                return Ok(());
            }
        };

        self.process(&message, delivery.last_error.as_deref())
            .await
            .map(|_| ())
            .map_err(HandlerError::failed)
    }
}
