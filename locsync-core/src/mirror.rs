//! Local mirror of external calendar events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event::{Rejection, SourceEvent};
use crate::managed;

/// A single-day full-day event as last observed on the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEvent {
    pub event_id: String,
    pub date: NaiveDate,
    /// Trimmed event title (the location code)
    pub title: Option<String>,
    pub description: Option<String>,
    pub updated: DateTime<Utc>,
    pub managed_property: bool,
    pub managed_description: bool,
    pub color_id: Option<String>,
    pub recurring_event_id: Option<String>,
    pub original_start: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl CachedEvent {
    /// Normalise a source event, rejecting anything that is not a single-day
    /// full-day event with a known modification time.
    pub fn from_source(event: &SourceEvent) -> Result<Self, Rejection> {
        let date = event.single_day()?;
        let updated = event.updated.ok_or(Rejection::MissingUpdated)?;

        Ok(CachedEvent {
            event_id: event.id.clone(),
            date,
            title: non_empty(event.summary.as_deref().map(str::trim)),
            description: non_empty(event.description.as_deref()),
            updated,
            managed_property: managed::has_managed_property(&event.private_properties),
            managed_description: managed::has_description_tag(event.description.as_deref()),
            color_id: non_empty(event.color_id.as_deref()),
            recurring_event_id: non_empty(event.recurring_event_id.as_deref()),
            original_start: event.original_start.map(|t| t.to_utc()),
        })
    }

    pub fn is_managed(&self) -> bool {
        self.managed_property || self.managed_description
    }

    /// Title as a location code, empty when absent
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }
}

/// Event cache keyed by event id.
pub trait EventMirror: Send + Sync {
    /// Insert or replace the entry with the same id.
    fn upsert(&self, event: &CachedEvent) -> Result<(), StoreError>;

    /// Returns whether an entry was removed.
    fn delete(&self, event_id: &str) -> Result<bool, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    fn by_date(&self, date: NaiveDate) -> Result<Vec<CachedEvent>, StoreError>;

    fn by_id(&self, event_id: &str) -> Result<Option<CachedEvent>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}
