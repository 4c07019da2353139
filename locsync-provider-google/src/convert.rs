//! Conversion between Google wire types and locsync's provider-neutral types.

use chrono::{DateTime, NaiveDate, Utc};
use locsync_core::event::{EventStatus, EventTime, NewEvent, SourceEvent};
use locsync_core::patch::{EventPatch, FieldPatch};
use locsync_core::source::{SourceError, SourceResult};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::types::{ExtendedProperties, GoogleEvent, GoogleTime};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub trait FromGoogle {
    fn from_google(event: GoogleEvent) -> Self;
}

pub trait ToGoogle {
    fn to_google(&self) -> SourceResult<GoogleEvent>;
}

impl FromGoogle for SourceEvent {
    // Unparseable times are dropped rather than failing the whole page;
    // the mirror rejects events without a usable start or timestamp.
    fn from_google(event: GoogleEvent) -> Self {
        let status = match event.status.as_deref() {
            Some("cancelled") => EventStatus::Cancelled,
            Some("tentative") => EventStatus::Tentative,
            _ => EventStatus::Confirmed,
        };

        let updated = event.updated.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                debug!(event_id = %event.id, updated = raw, "Unparseable updated timestamp");
            }
            parsed
        });

        let private_properties = event
            .extended_properties
            .map(|props| props.private)
            .unwrap_or_default();

        SourceEvent {
            start: event.start.as_ref().and_then(event_time),
            end: event.end.as_ref().and_then(event_time),
            original_start: event.original_start_time.as_ref().and_then(event_time),
            id: event.id,
            status,
            summary: event.summary,
            description: event.description,
            updated,
            color_id: event.color_id,
            recurring_event_id: event.recurring_event_id,
            private_properties,
        }
    }
}

impl ToGoogle for NewEvent {
    fn to_google(&self) -> SourceResult<GoogleEvent> {
        // Full-day end dates are exclusive
        let end = self.date.succ_opt().ok_or_else(|| {
            SourceError::Invalid(format!("no day follows {}", self.date))
        })?;

        let extended_properties = (!self.private_properties.is_empty()).then(|| ExtendedProperties {
            private: self.private_properties.clone(),
            ..ExtendedProperties::default()
        });

        Ok(GoogleEvent {
            summary: Some(self.summary.clone()),
            start: Some(full_day(self.date)),
            end: Some(full_day(end)),
            color_id: self.color_id.clone(),
            extended_properties,
            ..GoogleEvent::default()
        })
    }
}

/// JSON body for a PATCH request.
///
/// Only fields set in the patch are present. An explicit empty string
/// clears the description on Google's side; omitting it leaves it alone.
pub fn patch_body(patch: &EventPatch) -> Value {
    let mut body = Map::new();

    if let FieldPatch::Set(description) = &patch.description {
        body.insert("description".into(), Value::String(description.clone()));
    }
    if let FieldPatch::Set(color_id) = &patch.color_id {
        body.insert("colorId".into(), Value::String(color_id.clone()));
    }
    if let FieldPatch::Set(props) = &patch.private_properties {
        body.insert("extendedProperties".into(), json!({ "private": props }));
    }

    Value::Object(body)
}

fn event_time(time: &GoogleTime) -> Option<EventTime> {
    if let Some(raw) = time.date_time.as_deref() {
        return parse_timestamp(raw).map(EventTime::DateTime);
    }
    time.date
        .as_deref()
        .and_then(|raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).ok())
        .map(EventTime::Date)
}

fn full_day(date: NaiveDate) -> GoogleTime {
    GoogleTime {
        date: Some(date.format(DATE_FORMAT).to_string()),
        ..GoogleTime::default()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
