//! # Sync Orchestrator
//!
//! Fans one run out over every `(domain, date)` pair of its [`RunPlan`] and
//! runs each as a [`SyncJob`] on the [`WorkerPool`].
//!
//! A failing or panicking job becomes one entry of [`RunSummary::failures`];
//! it never stops its siblings. Only a configuration problem found before the
//! first submission makes [`SyncOrchestrator::run`] itself return an error.

use crate::sync_job::{JobReport, SyncJob};
use crate::task::TaskKey;
use crate::trigger::SyncParams;
use crate::worker_pool::{JobHandle, WorkerPool};
use crate::Result;
use bridge_traits::Clock;
use chrono::NaiveDate;
use core_runtime::config::DEFAULT_MAX_SYNC_DAYS;
use core_runtime::events::{EventBus, SyncEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One job that did not reach MESSAGES_SENT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub domain: String,
    pub data_date: NaiveDate,
    pub message: String,
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_records: i64,
    pub failures: Vec<JobFailure>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failure_count == 0
    }
}

pub struct SyncOrchestrator {
    job: Arc<SyncJob>,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    default_domains: Vec<String>,
    default_sync_days: u32,
    max_sync_days: u32,
    events: Option<EventBus>,
}

impl SyncOrchestrator {
    pub fn new(
        job: Arc<SyncJob>,
        pool: WorkerPool,
        clock: Arc<dyn Clock>,
        default_domains: Vec<String>,
        default_sync_days: u32,
    ) -> Self {
        Self {
            job,
            pool,
            clock,
            default_domains,
            default_sync_days,
            max_sync_days: DEFAULT_MAX_SYNC_DAYS,
            events: None,
        }
    }

    /// Reject triggers asking for a longer window than `days`.
    pub fn with_max_sync_days(mut self, days: u32) -> Self {
        self.max_sync_days = days;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Run one sync job per `(domain, date)` and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` when the parameters resolve to no domain,
    /// no day or a window over the maximum; nothing is submitted in that case.
    #[instrument(skip(self, params))]
    pub async fn run(&self, params: &SyncParams) -> Result<RunSummary> {
        let plan = params.resolve(
            &self.default_domains,
            self.default_sync_days,
            self.max_sync_days,
            self.clock.today(),
        )?;

        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        info!(
            run_id = %run_id,
            domains = plan.domains.len(),
            days = plan.dates.len(),
            jobs = plan.job_count(),
            workers = self.pool.size(),
            "Sync run started"
        );
        self.emit(SyncEvent::RunStarted {
            run_id: run_id.clone(),
            domains: plan.domains.clone(),
            dates: plan.dates.clone(),
        });

        let mut submitted: Vec<(TaskKey, Result<JobHandle<Result<JobReport>>>)> =
            Vec::with_capacity(plan.job_count());
        for domain in &plan.domains {
            for date in &plan.dates {
                let key = TaskKey::new(domain.clone(), *date);
                let job = Arc::clone(&self.job);
                let job_key = key.clone();
                let handle = self.pool.submit(async move { job.run(job_key).await }).await;
                submitted.push((key, handle));
            }
        }

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            success_count: 0,
            failure_count: 0,
            total_records: 0,
            failures: Vec::new(),
        };

        for (key, handle) in submitted {
            let outcome = match handle {
                Ok(handle) => handle.join().await.and_then(|result| result),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(report) => {
                    summary.success_count += 1;
                    summary.total_records += report.total_records;
                }
                Err(e) => {
                    warn!(domain = %key.domain, data_date = %key.data_date, error = %e, "Sync job failed");
                    summary.failure_count += 1;
                    summary.failures.push(JobFailure {
                        domain: key.domain,
                        data_date: key.data_date,
                        message: e.to_string(),
                    });
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            success_count = summary.success_count,
            failure_count = summary.failure_count,
            total_records = summary.total_records,
            duration_ms,
            "Sync run finished"
        );
        self.emit(SyncEvent::RunFinished {
            run_id,
            success_count: summary.success_count,
            failure_count: summary.failure_count,
            duration_ms,
        });

        Ok(summary)
    }

    /// Stop the worker pool once in-flight jobs are done.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.emit(event).ok();
        }
    }
}
