//! # Trigger Parameters
//!
//! Parameters of a scheduled run, as sent by the external scheduler:
//!
//! ```json
//! { "domains": ["d1", "d2"], "syncDays": 3 }
//! ```
//!
//! Both fields are optional and fall back to configured defaults. A run
//! covers the `sync_days` days before today; today itself is never synced.

use crate::{Result, SyncError};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    #[serde(default)]
    pub sync_days: Option<u32>,
}

/// The `(domain, date)` grid of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub domains: Vec<String>,
    /// Most recent day first
    pub dates: Vec<NaiveDate>,
}

impl RunPlan {
    pub fn job_count(&self) -> usize {
        self.domains.len() * self.dates.len()
    }
}

impl SyncParams {
    pub fn new(domains: Vec<String>, sync_days: u32) -> Self {
        Self {
            domains: Some(domains),
            sync_days: Some(sync_days),
        }
    }

    /// Parse the scheduler's parameter string.
    ///
    /// Blank input means "all defaults". Malformed input is logged and
    /// treated the same way.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str(raw) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, params = raw, "Ignoring malformed sync parameters");
                Self::default()
            }
        }
    }

    /// Resolve domains and dates against defaults and today's date.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` when no domain remains after falling back
    /// to `default_domains`, or when the window is zero days or longer than
    /// `max_sync_days`.
    pub fn resolve(
        &self,
        default_domains: &[String],
        default_sync_days: u32,
        max_sync_days: u32,
        today: NaiveDate,
    ) -> Result<RunPlan> {
        let mut domains = normalize(self.domains.as_deref().unwrap_or_default());
        if domains.is_empty() {
            domains = normalize(default_domains);
        }
        if domains.is_empty() {
            return Err(SyncError::Config(
                "No domains to sync: none given and no default configured".to_string(),
            ));
        }

        let sync_days = self.sync_days.unwrap_or(default_sync_days);
        if sync_days == 0 {
            return Err(SyncError::Config("syncDays must be at least 1".to_string()));
        }
        if sync_days > max_sync_days {
            return Err(SyncError::Config(format!(
                "syncDays {} exceeds the maximum window of {} days",
                sync_days, max_sync_days
            )));
        }

        let dates = (1..=u64::from(sync_days))
            .map(|offset| {
                today.checked_sub_days(Days::new(offset)).ok_or_else(|| {
                    SyncError::Config(format!("{} days before {} is out of range", offset, today))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RunPlan { domains, dates })
    }
}

/// Trim, drop blanks and remove duplicates, keeping first occurrences in order.
fn normalize(domains: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    domains
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .filter(|d| seen.insert(d.to_string()))
        .map(str::to_string)
        .collect()
}
