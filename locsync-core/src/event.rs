//! Provider-neutral event types.
//!
//! These are the events as the calendar source reports them. Providers
//! convert their API payloads into these types, and the engine works
//! exclusively with them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// An event on the external calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub id: String,
    pub status: EventStatus,
    /// Event title, used as the location code
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// Last modification timestamp
    pub updated: Option<DateTime<Utc>>,
    pub color_id: Option<String>,

    // Recurrence fields
    /// Series master id for an expanded recurring instance
    pub recurring_event_id: Option<String>,
    /// Original start of a recurrence exception
    pub original_start: Option<EventTime>,

    /// Private extended properties, only visible to this application
    pub private_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            EventTime::Date(d) => Some(*d),
            EventTime::DateTime(_) => None,
        }
    }

    /// Full-day values are pinned to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Why a source event cannot be mirrored as a single calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingStart,
    NotAllDay,
    MultiDay { start: NaiveDate, end: NaiveDate },
    MissingUpdated,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingStart => write!(f, "event has no start date"),
            Rejection::NotAllDay => write!(f, "event is not a full-day event"),
            Rejection::MultiDay { start, end } => {
                write!(f, "full-day event spans several days ({start} to {end})")
            }
            Rejection::MissingUpdated => write!(f, "event has no last-updated timestamp"),
        }
    }
}

impl SourceEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// The day covered by a single-day, full-day event.
    ///
    /// Full-day end dates are exclusive, so a one-day event ends on the
    /// following date.
    pub fn single_day(&self) -> Result<NaiveDate, Rejection> {
        let start = match self.start {
            Some(EventTime::Date(d)) => d,
            Some(EventTime::DateTime(_)) => return Err(Rejection::NotAllDay),
            None => return Err(Rejection::MissingStart),
        };

        match self.end {
            Some(EventTime::Date(end)) if start.succ_opt() == Some(end) => Ok(start),
            Some(EventTime::Date(end)) => Err(Rejection::MultiDay { start, end }),
            Some(EventTime::DateTime(_)) => Err(Rejection::NotAllDay),
            // A bare start date counts as one day
            None => Ok(start),
        }
    }
}

/// A full-day event to be created on the external calendar
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    pub date: NaiveDate,
    pub color_id: Option<String>,
    pub private_properties: BTreeMap<String, String>,
}
