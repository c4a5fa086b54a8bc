//! Fault Data Source Abstraction
//!
//! Cursor-paged read access to the upstream system that owns the fault records.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One fault record as returned by the upstream source.
///
/// `rank` is unique within a `(domain, data_date)` pair and is the paging cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultRecord {
    pub domain: String,
    pub data_date: NaiveDate,
    pub rank: i64,
    pub fault_type: String,
    pub device_id: String,
    pub fault_detail: String,
}

/// Cursor position for one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Largest rank already seen; `0` for the first page.
    pub last_rank: i64,
    /// Maximum number of records to return.
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            last_rank: 0,
            page_size,
        }
    }

    pub fn after(last_rank: i64, page_size: u32) -> Self {
        Self {
            last_rank,
            page_size,
        }
    }
}

/// Upstream fault record source.
///
/// # Contract
///
/// - Returned records are ordered by strictly increasing `rank`
/// - Every returned record has `rank > page.last_rank`
/// - At most `page.page_size` records are returned
/// - An empty `Ok(vec![])` is the only end-of-stream signal
/// - Transport and timeout failures are returned as errors, never as an empty page
///
/// Implementations must not have side effects.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::{FaultSource, PageRequest};
///
/// async fn first_page(source: &dyn FaultSource, date: chrono::NaiveDate) {
///     let page = source.pull("d1", date, PageRequest::first(5000)).await?;
///     println!("pulled {} records", page.len());
/// }
/// ```
#[async_trait]
pub trait FaultSource: Send + Sync {
    /// Pull the page following `page.last_rank` for one domain and date.
    async fn pull(
        &self,
        domain: &str,
        data_date: NaiveDate,
        page: PageRequest,
    ) -> Result<Vec<FaultRecord>>;
}
