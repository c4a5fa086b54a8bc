//! # Sync Job
//!
//! Full-overwrite sync of one `(domain, data_date)`:
//!
//! 1. Enter RUNNING (new row, or reset of the previous run)
//! 2. Delete every stored record of the key
//! 3. Pull pages by cursor and publish each one as a batch until a short or
//!    empty page ends the stream
//! 4. Enter MESSAGES_SENT with the batch and record totals
//!
//! Any error in steps 1 to 4 fails the task with the error message and ends
//! the job. The job never retries by itself; running it again starts a new
//! run with a bumped `retry_count`.
//!
//! A page that exactly fills `page_size` is always followed by one more pull,
//! since only an empty or short page proves the stream is exhausted. There is
//! no timeout around the pull loop.

use crate::producer::BatchProducer;
use crate::record_store::FaultRecordRepository;
use crate::task::TaskKey;
use crate::tracker::ProgressTracker;
use crate::{Result, SyncError};
use bridge_traits::{FaultRecord, FaultSource, PageRequest};
use core_runtime::events::FailureOrigin;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// What one successful job published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub key: TaskKey,
    pub batch_count: i64,
    pub total_records: i64,
    /// Source round trips, including the final empty one if any
    pub pulls: u32,
}

/// Runs sync jobs; shared by every worker of the pool.
pub struct SyncJob {
    source: Arc<dyn FaultSource>,
    producer: Arc<BatchProducer>,
    records: Arc<dyn FaultRecordRepository>,
    tracker: Arc<ProgressTracker>,
    page_size: u32,
}

impl SyncJob {
    pub fn new(
        source: Arc<dyn FaultSource>,
        producer: Arc<BatchProducer>,
        records: Arc<dyn FaultRecordRepository>,
        tracker: Arc<ProgressTracker>,
        page_size: u32,
    ) -> Self {
        Self {
            source,
            producer,
            records,
            tracker,
            page_size: page_size.max(1),
        }
    }

    /// Run the job for one key.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the task. By the time it is returned the
    /// task has been marked FAILED, unless it was already terminal.
    #[instrument(skip(self, key), fields(domain = %key.domain, data_date = %key.data_date))]
    pub async fn run(&self, key: TaskKey) -> Result<JobReport> {
        match self.execute(&key).await {
            Ok(report) => {
                info!(
                    batch_count = report.batch_count,
                    total_records = report.total_records,
                    pulls = report.pulls,
                    "Sync job published all batches"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Sync job failed");
                if let Err(mark_err) = self
                    .tracker
                    .fail(&key, &e.to_string(), FailureOrigin::Job)
                    .await
                {
                    error!(error = %mark_err, "Could not record task failure");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, key: &TaskKey) -> Result<JobReport> {
        self.tracker.begin(key).await?;

        let removed = self.records.delete_by_key(key).await?;
        debug!(removed, "Cleared stored records");

        let mut last_rank = 0;
        let mut batch_index: u32 = 0;
        let mut total_records: i64 = 0;
        let mut pulls: u32 = 0;

        loop {
            let page = self
                .source
                .pull(
                    &key.domain,
                    key.data_date,
                    PageRequest::after(last_rank, self.page_size),
                )
                .await
                .map_err(SyncError::Source)?;
            pulls += 1;

            if page.is_empty() {
                break;
            }

            let max_rank = check_cursor(last_rank, self.page_size, &page)?;
            let page_len = page.len();

            self.producer.send(key, batch_index, page).await?;

            last_rank = max_rank;
            total_records += page_len as i64;
            batch_index += 1;

            if page_len < self.page_size as usize {
                break;
            }
        }

        let batch_count = i64::from(batch_index);
        self.tracker
            .messages_sent(key, batch_count, total_records)
            .await?;

        Ok(JobReport {
            key: key.clone(),
            batch_count,
            total_records,
            pulls,
        })
    }
}

/// Check that a page fits the requested size and continues the cursor;
/// returns its largest rank.
fn check_cursor(last_rank: i64, page_size: u32, page: &[FaultRecord]) -> Result<i64> {
    if page.len() > page_size as usize {
        return Err(SyncError::PageTooLarge {
            len: page.len(),
            page_size,
        });
    }

    let mut previous = last_rank;
    for record in page {
        if record.rank <= previous {
            return Err(SyncError::CursorViolation {
                previous,
                rank: record.rank,
            });
        }
        previous = record.rank;
    }
    Ok(previous)
}
