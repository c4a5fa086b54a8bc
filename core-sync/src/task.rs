//! # Sync Task State Machine
//!
//! One persisted task per `(domain, data_date)` tracks a full-overwrite sync
//! from the first pull to the last batch write.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → MessagesSent → Success
//!     ↓        ↓           ↓
//!     └──────→ Failed ←────┘
//! ```
//!
//! Re-entering `Running` (a new run for the same key) is always allowed: it
//! resets the counters and bumps `retry_count`. `Success` and `Failed` are
//! terminal for everything else, so a late batch can never resurrect a task.
//!
//! The transitions themselves are applied by conditional updates in
//! [`SyncTaskRepository`](crate::repository::SyncTaskRepository); this module
//! holds the vocabulary and the rules those updates encode.

use crate::{Result, SyncError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Task Key
// ============================================================================

/// Unique key of a sync task: one domain on one day
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub domain: String,
    pub data_date: NaiveDate,
}

impl TaskKey {
    pub fn new(domain: impl Into<String>, data_date: NaiveDate) -> Self {
        Self {
            domain: domain.into(),
            data_date,
        }
    }

    /// Broker ordering key; every batch of one task shares it
    pub fn ordering_key(&self) -> String {
        format!("{}_{}", self.domain, self.data_date)
    }

    /// Per-message key used to trace one batch
    pub fn message_key(&self, batch_index: u32) -> String {
        format!("{}_{}_{}", self.domain, self.data_date, batch_index)
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.domain, self.data_date)
    }
}

// ============================================================================
// Status
// ============================================================================

/// The current status of a sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Task row exists but no run has started
    Pending,
    /// Deleting stale rows and publishing batches
    Running,
    /// Every batch is published; waiting for consumers
    MessagesSent,
    /// Every batch has been written
    Success,
    /// Pull, publish or a batch write failed for good
    Failed,
}

impl SyncStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Failed)
    }

    /// Check if a producer is still publishing batches for the task
    pub fn is_publishing(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::MessagesSent => "messages_sent",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `to` follows the state machine.
    pub fn can_transition_to(&self, to: SyncStatus) -> bool {
        match (self, to) {
            // A new run may always supersede the previous one
            (_, SyncStatus::Running) => true,

            (SyncStatus::Running, SyncStatus::MessagesSent) => true,
            (SyncStatus::MessagesSent, SyncStatus::Success) => true,

            (SyncStatus::Pending, SyncStatus::Failed) => true,
            (SyncStatus::Running, SyncStatus::Failed) => true,
            (SyncStatus::MessagesSent, SyncStatus::Failed) => true,

            _ => false,
        }
    }

    /// Validate a state transition
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidStateTransition` if the move is not allowed
    pub fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        if self.can_transition_to(to) {
            return Ok(());
        }

        let reason = if self.is_terminal() {
            format!("{} is terminal", self.as_str())
        } else {
            format!("Cannot transition from {} to {}", self.as_str(), to.as_str())
        };

        Err(SyncError::InvalidStateTransition {
            from: self.as_str().to_string(),
            to: to.as_str().to_string(),
            reason,
        })
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "messages_sent" => Ok(SyncStatus::MessagesSent),
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync Task Entity
// ============================================================================

/// Persisted progress of one `(domain, data_date)` sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub domain: String,
    pub data_date: NaiveDate,
    pub status: SyncStatus,
    /// Batches published by the last run; set on `MessagesSent`
    pub batch_count: i64,
    /// Batches written by consumers; never exceeds `batch_count`
    pub completed_batch_count: i64,
    pub total_records: i64,
    /// Runs started after the first one
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncTask {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.domain.clone(), self.data_date)
    }

    /// Batches still expected from consumers
    pub fn remaining_batches(&self) -> i64 {
        (self.batch_count - self.completed_batch_count).max(0)
    }

    /// Completed share of published batches (0-100)
    pub fn percent(&self) -> u8 {
        match self.status {
            SyncStatus::Success => 100,
            _ if self.batch_count > 0 => {
                ((self.completed_batch_count * 100) / self.batch_count).clamp(0, 100) as u8
            }
            _ => 0,
        }
    }

    /// Get the duration of the last run in seconds
    ///
    /// Returns None while the run has not reached a terminal state
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end >= start => Some((end - start) as u64),
            _ => None,
        }
    }
}

/// Cap an error message at `limit` characters without splitting a character.
pub fn truncate_message(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Get current Unix timestamp
pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn task(status: SyncStatus, batch_count: i64, completed: i64) -> SyncTask {
        SyncTask {
            domain: "d1".to_string(),
            data_date: date(),
            status,
            batch_count,
            completed_batch_count: completed,
            total_records: 0,
            retry_count: 0,
            error_message: None,
            start_time: Some(100),
            end_time: None,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_task_key_formats() {
        let key = TaskKey::new("d1", date());
        assert_eq!(key.ordering_key(), "d1_2025-01-01");
        assert_eq!(key.message_key(2), "d1_2025-01-01_2");
        assert_eq!(key.to_string(), "d1 2025-01-01");
    }

    #[test]
    fn test_sync_status_is_terminal() {
        assert!(!SyncStatus::Pending.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(!SyncStatus::MessagesSent.is_terminal());
        assert!(SyncStatus::Success.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
    }

    #[test]
    fn test_sync_status_from_str() {
        assert_eq!(
            SyncStatus::from_str("messages_sent").unwrap(),
            SyncStatus::MessagesSent
        );
        assert_eq!(SyncStatus::from_str("SUCCESS").unwrap(), SyncStatus::Success);
        assert!(matches!(
            SyncStatus::from_str("done"),
            Err(SyncError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Running,
            SyncStatus::MessagesSent,
            SyncStatus::Success,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(SyncStatus::Pending.can_transition_to(SyncStatus::Running));
        assert!(SyncStatus::Running.can_transition_to(SyncStatus::MessagesSent));
        assert!(SyncStatus::MessagesSent.can_transition_to(SyncStatus::Success));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        assert!(SyncStatus::Pending.can_transition_to(SyncStatus::Failed));
        assert!(SyncStatus::Running.can_transition_to(SyncStatus::Failed));
        assert!(SyncStatus::MessagesSent.can_transition_to(SyncStatus::Failed));
        assert!(!SyncStatus::Success.can_transition_to(SyncStatus::Failed));
        assert!(!SyncStatus::Failed.can_transition_to(SyncStatus::Failed));
    }

    #[test]
    fn test_new_run_supersedes_any_state() {
        assert!(SyncStatus::Success.can_transition_to(SyncStatus::Running));
        assert!(SyncStatus::Failed.can_transition_to(SyncStatus::Running));
        assert!(SyncStatus::MessagesSent.can_transition_to(SyncStatus::Running));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!SyncStatus::Running.can_transition_to(SyncStatus::Success));
        assert!(!SyncStatus::Pending.can_transition_to(SyncStatus::MessagesSent));

        let err = SyncStatus::Failed
            .validate_transition(SyncStatus::Success)
            .unwrap_err();
        match err {
            SyncError::InvalidStateTransition { from, to, reason } => {
                assert_eq!(from, "failed");
                assert_eq!(to, "success");
                assert!(reason.contains("terminal"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_progress_helpers() {
        let running = task(SyncStatus::MessagesSent, 4, 1);
        assert_eq!(running.remaining_batches(), 3);
        assert_eq!(running.percent(), 25);
        assert_eq!(running.duration_secs(), None);

        let mut done = task(SyncStatus::Success, 0, 0);
        done.end_time = Some(130);
        assert_eq!(done.percent(), 100);
        assert_eq!(done.duration_secs(), Some(30));
        assert_eq!(done.key(), TaskKey::new("d1", date()));
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdef", 3), "abc");
        assert_eq!(truncate_message("故障数据同步", 2), "故障");
        assert_eq!(truncate_message("", 5), "");
    }
}
