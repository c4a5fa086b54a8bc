//! Batch message carried by the broker between producer and consumer

use crate::task::TaskKey;
use bridge_traits::FaultRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One pulled page of records for one task.
///
/// `batch_index` starts at 0 for every run and increases by one per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMessage {
    pub domain: String,
    pub data_date: NaiveDate,
    pub batch_index: u32,
    #[serde(default)]
    pub records: Vec<FaultRecord>,
}

impl BatchMessage {
    pub fn new(key: &TaskKey, batch_index: u32, records: Vec<FaultRecord>) -> Self {
        Self {
            domain: key.domain.clone(),
            data_date: key.data_date,
            batch_index,
            records,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.domain.clone(), self.data_date)
    }
}
