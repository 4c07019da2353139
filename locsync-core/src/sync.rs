//! Full and incremental refreshes of the event mirror.
//!
//! Each run picks its mode from the stored cursor: no cursor means a full
//! listing, otherwise only the changes since the cursor are fetched. An
//! invalid cursor is the one case that falls back to a full listing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::dates::{self, DayRange};
use crate::error::{StoreError, SyncError};
use crate::event::SourceEvent;
use crate::mirror::{CachedEvent, EventMirror};
use crate::notifier::Notifier;
use crate::reconcile::{ReconcileReport, Reconciler, Trigger};
use crate::source::{CalendarSource, ListQuery, SourceError};
use crate::state::{SYNC_TOKEN_KEY, StateStore};

/// What to do when the cursor cannot be saved after an incremental run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorFailurePolicy {
    /// Log at error level
    #[default]
    Log,
    /// Log and send an operator alert
    Notify,
}

/// Days reconciled around today after a full sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub past_days: u32,
    pub future_days: u32,
}

impl Default for SyncWindow {
    fn default() -> Self {
        SyncWindow {
            past_days: 30,
            future_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Full,
    Incremental,
}

#[derive(Debug)]
pub struct SyncSummary {
    pub kind: SyncKind,
    /// Events returned by the source
    pub fetched: usize,
    /// Absent when nothing needed reconciling
    pub report: Option<ReconcileReport>,
}

#[derive(Debug)]
pub enum IncrementalOutcome {
    Completed(SyncSummary),
    /// The cursor was rejected and has been cleared
    FullSyncRequired,
}

pub struct SyncEngine {
    source: Arc<dyn CalendarSource>,
    mirror: Arc<dyn EventMirror>,
    state: Arc<dyn StateStore>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
    window: SyncWindow,
    cursor_failure: CursorFailurePolicy,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        mirror: Arc<dyn EventMirror>,
        state: Arc<dyn StateStore>,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        SyncEngine {
            source,
            mirror,
            state,
            reconciler,
            notifier,
            window: SyncWindow::default(),
            cursor_failure: CursorFailurePolicy::default(),
        }
    }

    pub fn with_window(mut self, window: SyncWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_cursor_failure(mut self, policy: CursorFailurePolicy) -> Self {
        self.cursor_failure = policy;
        self
    }

    /// Decide the mode from the stored cursor.
    pub fn mode(&self) -> Result<SyncMode, StoreError> {
        Ok(match self.state.get(SYNC_TOKEN_KEY)? {
            Some(cursor) if !cursor.is_empty() => SyncMode::Incremental(cursor),
            _ => SyncMode::Full,
        })
    }

    pub async fn run_sync(&self) -> Result<SyncSummary, SyncError> {
        match self.mode()? {
            SyncMode::Full => {
                info!("No sync cursor stored, running full sync");
                self.run_full_sync().await
            }
            SyncMode::Incremental(cursor) => match self.run_incremental_sync(&cursor).await? {
                IncrementalOutcome::Completed(summary) => Ok(summary),
                IncrementalOutcome::FullSyncRequired => {
                    warn!("Sync cursor rejected, falling back to full sync");
                    self.run_full_sync().await
                }
            },
        }
    }

    /// Rebuild the mirror from a complete listing and reconcile the window.
    pub async fn run_full_sync(&self) -> Result<SyncSummary, SyncError> {
        self.full_sync().instrument(info_span!("sync", mode = "full")).await
    }

    async fn full_sync(&self) -> Result<SyncSummary, SyncError> {
        info!("Fetching all events");
        let (events, next_cursor) = self.fetch_all(None).await.map_err(SyncError::Fetch)?;
        info!(events = events.len(), "Fetched all events");

        let touched = match self.rebuild_mirror(&events) {
            Ok(touched) => touched,
            Err(e) => {
                // The mirror is now incomplete; force the next run to be full
                if let Err(clear_err) = self.state.remove(SYNC_TOKEN_KEY) {
                    error!(error = %clear_err, "Failed to clear sync cursor after mirror rebuild failure");
                }
                return Err(SyncError::Store(e));
            }
        };

        match &next_cursor {
            Some(cursor) => self
                .state
                .set(SYNC_TOKEN_KEY, cursor)
                .map_err(SyncError::CursorPersist)?,
            None => {
                warn!("Full listing returned no sync cursor");
                self.state
                    .remove(SYNC_TOKEN_KEY)
                    .map_err(SyncError::CursorPersist)?;
            }
        }

        let window = DayRange::around(dates::today(), self.window.past_days, self.window.future_days);
        let dates: BTreeSet<NaiveDate> = window.days().chain(touched).collect();

        let report = self.reconciler.reconcile(dates, Trigger::Full).await;
        let failed = report.failed_dates();
        if !failed.is_empty() {
            warn!(failed = failed.len(), "Some dates failed to reconcile after full sync");
        }

        info!("Full sync completed");
        Ok(SyncSummary {
            kind: SyncKind::Full,
            fetched: events.len(),
            report: Some(report),
        })
    }

    /// Apply the changes since `cursor` and reconcile the dates they touch.
    pub async fn run_incremental_sync(&self, cursor: &str) -> Result<IncrementalOutcome, SyncError> {
        self.incremental_sync(cursor)
            .instrument(info_span!("sync", mode = "incremental", cursor = %abbreviate(cursor)))
            .await
    }

    async fn incremental_sync(&self, cursor: &str) -> Result<IncrementalOutcome, SyncError> {
        let (changes, next_cursor) = match self.fetch_all(Some(cursor)).await {
            Ok(fetched) => fetched,
            Err(SourceError::InvalidCursor) => {
                if let Err(e) = self.state.remove(SYNC_TOKEN_KEY) {
                    error!(error = %e, "Failed to clear rejected sync cursor");
                }
                return Ok(IncrementalOutcome::FullSyncRequired);
            }
            Err(e) => return Err(SyncError::Fetch(e)),
        };
        info!(changes = changes.len(), "Fetched changed events");

        if changes.is_empty() {
            if let Some(next) = &next_cursor {
                debug!("No changes, advancing cursor");
                self.state.set(SYNC_TOKEN_KEY, next)?;
            }
            return Ok(IncrementalOutcome::Completed(SyncSummary {
                kind: SyncKind::Incremental,
                fetched: 0,
                report: None,
            }));
        }

        // Dates must be read before the mirror forgets where events were
        let affected = self.affected_dates(&changes)?;
        self.apply_changes(&changes)?;

        let report = if affected.is_empty() {
            info!("No dates affected by the changes");
            None
        } else {
            Some(self.reconciler.reconcile(affected, Trigger::Incremental).await)
        };

        match &next_cursor {
            Some(next) => {
                if let Err(e) = self.state.set(SYNC_TOKEN_KEY, next) {
                    self.report_cursor_failure(&e).await;
                    return Err(SyncError::CursorPersist(e));
                }
            }
            None => warn!("Incremental listing returned no sync cursor"),
        }

        info!("Incremental sync completed");
        Ok(IncrementalOutcome::Completed(SyncSummary {
            kind: SyncKind::Incremental,
            fetched: changes.len(),
            report,
        }))
    }

    async fn report_cursor_failure(&self, err: &StoreError) {
        error!(error = %err, "Failed to persist sync cursor after reconciliation; the changes will be processed again");

        if self.cursor_failure == CursorFailurePolicy::Notify {
            let message = format!("locsync could not persist its sync cursor: {err}");
            if let Err(e) = self.notifier.send_alert(&message).await {
                error!(error = %e, "Failed to send cursor failure alert");
            }
        }
    }

    /// Follow pagination until the source hands out the next cursor.
    async fn fetch_all(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<SourceEvent>, Option<String>), SourceError> {
        let mut events = Vec::new();
        let mut query = ListQuery {
            page_token: None,
            sync_token: cursor.map(str::to_string),
        };

        loop {
            let page = self.source.list_events(&query).await?;
            events.extend(page.items);

            match page.next_page_token {
                Some(token) => {
                    debug!(fetched = events.len(), "Fetching next page");
                    query.page_token = Some(token);
                }
                None => return Ok((events, page.next_sync_token)),
            }
        }
    }

    fn rebuild_mirror(&self, events: &[SourceEvent]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        self.mirror.clear()?;
        self.apply_changes(events)
    }

    /// Dates whose reconciliation may change because of `changes`.
    ///
    /// Includes the date an event was cached under before this change, so
    /// moved and deleted events release their old day.
    fn affected_dates(&self, changes: &[SourceEvent]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let mut dates = BTreeSet::new();

        for event in changes {
            if let Some(previous) = self.mirror.by_id(&event.id)? {
                dates.insert(previous.date);
            }
            if let Some(master_id) = &event.recurring_event_id {
                if let Some(master) = self.mirror.by_id(master_id)? {
                    dates.insert(master.date);
                }
            }
            if event.is_cancelled() {
                continue;
            }
            match event.single_day() {
                Ok(date) => {
                    dates.insert(date);
                }
                Err(reason) => debug!(event_id = %event.id, reason = %reason, "Change does not map to a single day"),
            }
        }

        Ok(dates)
    }

    /// Write `changes` into the mirror. Returns the dates of the events stored.
    fn apply_changes(&self, changes: &[SourceEvent]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let masters: BTreeSet<&str> = changes
            .iter()
            .filter_map(|e| e.recurring_event_id.as_deref())
            .collect();
        for master_id in masters {
            if self.mirror.delete(master_id)? {
                debug!(event_id = %master_id, "Evicted recurring series master");
            }
        }

        let mut stored = BTreeSet::new();
        for event in changes {
            if event.is_cancelled() {
                debug!(event_id = %event.id, "Removing cancelled event");
                self.mirror.delete(&event.id)?;
                continue;
            }

            match CachedEvent::from_source(event) {
                Ok(cached) => {
                    self.mirror.upsert(&cached)?;
                    stored.insert(cached.date);
                }
                Err(reason) => {
                    debug!(event_id = %event.id, reason = %reason, "Skipping event");
                    self.mirror.delete(&event.id)?;
                }
            }
        }

        Ok(stored)
    }
}

fn abbreviate(cursor: &str) -> &str {
    match cursor.char_indices().nth(10) {
        Some((idx, _)) => &cursor[..idx],
        None => cursor,
    }
}
