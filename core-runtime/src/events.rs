//! Lifecycle events of sync runs and their tasks.
//!
//! The sync job, the progress tracker and the dead-letter handler publish
//! [`SyncEvent`]s on a shared [`EventBus`]. Events are advisory: the persisted
//! task row decides whether a day's data has landed, and a lagging or missing
//! subscriber never slows the pipeline down.
//!
//! ```ignore
//! let bus = EventBus::default();
//! let mut events = bus.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if event.is_alert() {
//!             page_operator(&event);
//!         }
//!     }
//! });
//! ```
//!
//! A slow subscriber sees `RecvError::Lagged(n)` and keeps receiving newer
//! events; `RecvError::Closed` means every bus handle was dropped.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Events kept for subscribers that fall behind.
pub const EVENT_CAPACITY: usize = 256;

/// Where a task failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// The sync job itself failed while pulling or publishing
    Job,
    /// A batch exhausted redelivery and reached the dead-letter topic
    DeadLetter,
}

/// Lifecycle events of sync runs and their tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A triggered run was accepted and its jobs are being submitted.
    RunStarted {
        run_id: String,
        domains: Vec<String>,
        dates: Vec<NaiveDate>,
    },
    /// A task entered RUNNING.
    TaskRunning {
        domain: String,
        data_date: NaiveDate,
        retry_count: i64,
    },
    /// Every page of a task has been published.
    MessagesSent {
        domain: String,
        data_date: NaiveDate,
        batch_count: i64,
        total_records: i64,
    },
    /// All batches of a task were written.
    TaskSucceeded {
        domain: String,
        data_date: NaiveDate,
        batch_count: i64,
    },
    /// A task was marked FAILED.
    TaskFailed {
        domain: String,
        data_date: NaiveDate,
        message: String,
        origin: FailureOrigin,
    },
    /// Every job of a run has finished.
    RunFinished {
        run_id: String,
        success_count: usize,
        failure_count: usize,
        duration_ms: u64,
    },
}

impl SyncEvent {
    /// The (domain, date) a task event refers to.
    pub fn task_key(&self) -> Option<(&str, NaiveDate)> {
        match self {
            SyncEvent::TaskRunning {
                domain, data_date, ..
            }
            | SyncEvent::MessagesSent {
                domain, data_date, ..
            }
            | SyncEvent::TaskSucceeded {
                domain, data_date, ..
            }
            | SyncEvent::TaskFailed {
                domain, data_date, ..
            } => Some((domain.as_str(), *data_date)),
            SyncEvent::RunStarted { .. } | SyncEvent::RunFinished { .. } => None,
        }
    }

    /// Failures that no later run step will report on its own.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            SyncEvent::TaskFailed {
                origin: FailureOrigin::DeadLetter,
                ..
            }
        )
    }
}

/// Broadcast hub for [`SyncEvent`]s; clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fails with `SendError` when nobody is subscribed; callers ignore that.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Receives events emitted from now on.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
