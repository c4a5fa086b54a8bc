//! Deterministic in-process fault source for demos and load rehearsals

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    source::{FaultRecord, FaultSource, PageRequest},
};
use chrono::NaiveDate;
use tracing::debug;

/// Generates `total_per_key` records for every `(domain, date)` with ranks `1..=total_per_key`.
#[derive(Debug, Clone)]
pub struct SyntheticFaultSource {
    total_per_key: i64,
}

impl SyntheticFaultSource {
    pub fn new(total_per_key: i64) -> Self {
        Self {
            total_per_key: total_per_key.max(0),
        }
    }

    fn record(domain: &str, data_date: NaiveDate, rank: i64) -> FaultRecord {
        FaultRecord {
            domain: domain.to_string(),
            data_date,
            rank,
            fault_type: format!("FAULT_TYPE_{}", rank % 10),
            device_id: format!("DEVICE_{:08X}", (rank.wrapping_mul(2_654_435_761)) & 0xFFFF_FFFF),
            fault_detail: format!("Synthetic fault detail for rank={}", rank),
        }
    }
}

impl Default for SyntheticFaultSource {
    fn default() -> Self {
        Self::new(20_000)
    }
}

#[async_trait]
impl FaultSource for SyntheticFaultSource {
    async fn pull(
        &self,
        domain: &str,
        data_date: NaiveDate,
        page: PageRequest,
    ) -> Result<Vec<FaultRecord>> {
        if page.last_rank >= self.total_per_key || page.page_size == 0 {
            debug!(domain, data_date = %data_date, last_rank = page.last_rank, "Synthetic source exhausted");
            return Ok(Vec::new());
        }

        let start = page.last_rank.max(0) + 1;
        let end = (page.last_rank.max(0) + i64::from(page.page_size)).min(self.total_per_key);

        Ok((start..=end)
            .map(|rank| Self::record(domain, data_date, rank))
            .collect())
    }
}
