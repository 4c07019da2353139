//! Core engine for locsync.
//!
//! This crate keeps a per-day location schedule consistent with the events
//! of one external calendar:
//! - `mirror` and `schedule` are the two local projections, persisted by `store`
//! - `reconcile` resolves each day's authoritative event and corrects both sides
//! - `sync` decides between full and incremental refreshes of the mirror
//! - `subscription` keeps the push-notification channel alive
//! - `coordinator` serializes all of the above behind one lock

pub mod classifier;
pub mod coordinator;
pub mod dates;
pub mod error;
pub mod event;
pub mod managed;
pub mod mirror;
pub mod notifier;
pub mod patch;
pub mod reconcile;
pub mod schedule;
pub mod source;
pub mod state;
pub mod store;
pub mod subscription;
pub mod sync;

#[cfg(test)]
mod testing;

pub use classifier::{ClassifierPatterns, ColorPalette, LocationStatus, StatusClassifier};
pub use coordinator::Coordinator;
pub use dates::DayRange;
pub use error::{LocsyncError, LocsyncResult};
pub use event::{EventStatus, EventTime, NewEvent, SourceEvent};
pub use mirror::{CachedEvent, EventMirror};
pub use notifier::{ChangeSummary, LogNotifier, Notifier};
pub use patch::{EventPatch, FieldPatch};
pub use reconcile::{ReconcileReport, ReconcileSettings, Reconciler, Trigger};
pub use schedule::{ScheduleEntry, ScheduleStore};
pub use source::{CalendarSource, Removal, SourceError, WebhookChannel};
pub use state::StateStore;
pub use store::SqliteStore;
pub use subscription::{RenewalOutcome, SubscriptionManager};
pub use sync::{CursorFailurePolicy, SyncEngine, SyncSummary, SyncWindow};
