//! # Progress Tracker
//!
//! Owns the per-task state machine on behalf of the producer side (the sync
//! job), the consumer side and the dead-letter handler.
//!
//! Every mutation is one conditional statement in [`SyncTaskRepository`]; the
//! tracker only interprets the result, logs it and emits the matching
//! [`SyncEvent`]. When a conditional update matches nothing, the tracker
//! reads the row afterwards to explain why. That read never feeds back into
//! the update, so two processes sharing the table see the same transitions.

use crate::repository::SyncTaskRepository;
use crate::task::{SyncStatus, SyncTask, TaskKey};
use crate::{Result, SyncError};
use core_runtime::events::{EventBus, FailureOrigin, SyncEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a consumer increment did to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The batch was counted.
    Applied {
        completed: i64,
        batch_count: i64,
        /// This increment moved the task to SUCCESS.
        finished: bool,
    },
    /// The producer has not reached MESSAGES_SENT yet.
    NotReady,
    /// Nothing was counted; the task is terminal or already fully counted.
    Ignored(SyncStatus),
    /// No task row exists for the key.
    Missing,
}

pub struct ProgressTracker {
    tasks: Arc<dyn SyncTaskRepository>,
    events: Option<EventBus>,
}

impl ProgressTracker {
    pub fn new(tasks: Arc<dyn SyncTaskRepository>) -> Self {
        Self {
            tasks,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tasks(&self) -> &Arc<dyn SyncTaskRepository> {
        &self.tasks
    }

    /// Start a new run of the task, superseding whatever the last run left.
    pub async fn begin(&self, key: &TaskKey) -> Result<SyncTask> {
        let task = self.tasks.begin_run(key).await?;

        debug!(
            domain = %key.domain,
            data_date = %key.data_date,
            retry_count = task.retry_count,
            "Task running"
        );
        self.emit(SyncEvent::TaskRunning {
            domain: task.domain.clone(),
            data_date: task.data_date,
            retry_count: task.retry_count,
        });

        Ok(task)
    }

    /// Record that every page was published.
    ///
    /// A run that published nothing completes right away, since no consumer
    /// increment will ever arrive for it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidStateTransition` if the task left RUNNING
    /// while the job was publishing, for example because a dead-lettered
    /// batch already failed it.
    pub async fn messages_sent(
        &self,
        key: &TaskKey,
        batch_count: i64,
        total_records: i64,
    ) -> Result<SyncTask> {
        let task = match self
            .tasks
            .mark_messages_sent(key, batch_count, total_records)
            .await?
        {
            Some(task) => task,
            None => return Err(self.rejected(key, SyncStatus::MessagesSent).await),
        };

        info!(
            domain = %key.domain,
            data_date = %key.data_date,
            batch_count,
            total_records,
            "All batches published"
        );
        self.emit(SyncEvent::MessagesSent {
            domain: task.domain.clone(),
            data_date: task.data_date,
            batch_count,
            total_records,
        });

        if batch_count > 0 {
            return Ok(task);
        }

        match self.tasks.complete_empty(key).await? {
            Some(done) => {
                info!(domain = %key.domain, data_date = %key.data_date, "No records for day, task complete");
                self.succeeded(&done);
                Ok(done)
            }
            None => Err(self.rejected(key, SyncStatus::Success).await),
        }
    }

    /// Mark the task FAILED.
    ///
    /// Returns `None` when the task was already terminal or does not exist;
    /// a terminal task is never overwritten.
    pub async fn fail(
        &self,
        key: &TaskKey,
        message: &str,
        origin: FailureOrigin,
    ) -> Result<Option<SyncTask>> {
        let failed = self.tasks.mark_failed(key, message).await?;

        match &failed {
            Some(task) => {
                warn!(
                    domain = %key.domain,
                    data_date = %key.data_date,
                    origin = ?origin,
                    completed = task.completed_batch_count,
                    batch_count = task.batch_count,
                    error = message,
                    "Task failed"
                );
                self.emit(SyncEvent::TaskFailed {
                    domain: task.domain.clone(),
                    data_date: task.data_date,
                    message: task.error_message.clone().unwrap_or_default(),
                    origin,
                });
            }
            None => {
                debug!(
                    domain = %key.domain,
                    data_date = %key.data_date,
                    origin = ?origin,
                    "Failure not recorded; task missing or already terminal"
                );
            }
        }

        Ok(failed)
    }

    /// Count one written batch.
    pub async fn increment(&self, key: &TaskKey) -> Result<IncrementOutcome> {
        if let Some(task) = self.tasks.increment_completed(key).await? {
            let finished = task.status == SyncStatus::Success;

            debug!(
                domain = %key.domain,
                data_date = %key.data_date,
                completed = task.completed_batch_count,
                batch_count = task.batch_count,
                "Batch counted"
            );
            if finished {
                info!(domain = %key.domain, data_date = %key.data_date, "Task complete");
                self.succeeded(&task);
            }

            return Ok(IncrementOutcome::Applied {
                completed: task.completed_batch_count,
                batch_count: task.batch_count,
                finished,
            });
        }

        let outcome = match self.tasks.find(key).await? {
            None => IncrementOutcome::Missing,
            Some(task) if task.status.is_publishing() => IncrementOutcome::NotReady,
            Some(task) => IncrementOutcome::Ignored(task.status),
        };

        debug!(
            domain = %key.domain,
            data_date = %key.data_date,
            outcome = ?outcome,
            "Increment not applied"
        );
        Ok(outcome)
    }

    fn succeeded(&self, task: &SyncTask) {
        self.emit(SyncEvent::TaskSucceeded {
            domain: task.domain.clone(),
            data_date: task.data_date,
            batch_count: task.batch_count,
        });
    }

    async fn rejected(&self, key: &TaskKey, to: SyncStatus) -> SyncError {
        match self.tasks.find(key).await {
            Ok(Some(task)) => match task.status.validate_transition(to) {
                Err(e) => e,
                // The row allows the move but the statement's guard did not match
                Ok(()) => SyncError::InvalidStateTransition {
                    from: task.status.as_str().to_string(),
                    to: to.as_str().to_string(),
                    reason: "Task changed concurrently".to_string(),
                },
            },
            Ok(None) => SyncError::TaskNotFound {
                domain: key.domain.clone(),
                data_date: key.data_date,
            },
            Err(e) => e,
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.emit(event).ok();
        }
    }
}
