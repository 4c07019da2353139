//! Per-day location schedule.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classifier::LocationStatus;
use crate::error::StoreError;

/// The derived location for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    pub location_code: String,
    pub status: LocationStatus,
}

/// One entry per date.
pub trait ScheduleStore: Send + Sync {
    fn get(&self, date: NaiveDate) -> Result<Option<ScheduleEntry>, StoreError>;

    fn upsert(&self, entry: &ScheduleEntry) -> Result<(), StoreError>;
}
