//! Error types for locsync.

use chrono::NaiveDate;
use thiserror::Error;

use crate::source::SourceError;

/// Errors raised by the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("Storage connection poisoned by an earlier panic")]
    Poisoned,
}

/// Errors that abort a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch events from the calendar: {0}")]
    Fetch(#[source] SourceError),

    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to persist sync cursor: {0}")]
    CursorPersist(#[source] StoreError),
}

/// Errors raised while managing the webhook channel.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Calendar watch request failed: {0}")]
    Watch(#[source] SourceError),

    #[error("Failed to store info for channel {channel_id}: {source}")]
    Store {
        channel_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to encode channel info: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while reconciling a single date.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to {action} event {event_id}: {source}")]
    External {
        action: &'static str,
        event_id: String,
        #[source]
        source: SourceError,
    },
}

/// Errors raised by change-summary delivery.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid notifier configuration: {0}")]
    Config(String),

    #[error("Failed to send notification: {0}")]
    Send(String),
}

/// Crate-level error for entry points that span several components.
#[derive(Error, Debug)]
pub enum LocsyncError {
    #[error("Invalid date '{0}'. Expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Range end {last} is before its start {first}")]
    InvalidRange { first: NaiveDate, last: NaiveDate },

    #[error("{} dates could not be reconciled", .0.len())]
    Unreconciled(Vec<NaiveDate>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

pub type LocsyncResult<T> = Result<T, LocsyncError>;
