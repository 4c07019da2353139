//! Calendar source contract.
//!
//! The engine talks to the external calendar only through [`CalendarSource`].
//! `locsync-provider-google` implements it against the Google Calendar API;
//! tests use an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{NewEvent, SourceEvent};
use crate::patch::EventPatch;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The continuation cursor expired or was revoked; a full listing is required.
    #[error("Sync cursor is no longer valid")]
    InvalidCursor,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Calendar API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl SourceError {
    /// Whether the error means the target is already absent (404/410).
    pub fn is_gone(&self) -> bool {
        match self {
            SourceError::NotFound(_) => true,
            SourceError::Api { status, .. } => *status == 404 || *status == 410,
            _ => false,
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Outcome of a delete or stop request. Absence is the desired end state
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyGone,
}

/// Parameters for one page of an event listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub page_token: Option<String>,
    /// Only return changes since this cursor
    pub sync_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub items: Vec<SourceEvent>,
    pub next_page_token: Option<String>,
    /// Present on the last page only
    pub next_sync_token: Option<String>,
}

/// Parameters of a push-notification subscription request
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub id: String,
    /// Public URL notifications are posted to
    pub address: String,
    /// Echoed back in every notification for verification
    pub token: String,
}

/// A live push-notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub id: String,
    pub resource_id: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch one page of events, either the full listing or changes since a cursor.
    async fn list_events(&self, query: &ListQuery) -> SourceResult<EventPage>;

    /// Apply a partial update and return the updated event.
    async fn patch_event(&self, event_id: &str, patch: &EventPatch) -> SourceResult<SourceEvent>;

    async fn insert_event(&self, event: &NewEvent) -> SourceResult<SourceEvent>;

    async fn delete_event(&self, event_id: &str) -> SourceResult<Removal>;

    async fn watch(&self, request: &WatchRequest) -> SourceResult<WebhookChannel>;

    async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> SourceResult<Removal>;
}
