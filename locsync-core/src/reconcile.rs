//! Per-day reconciliation between the mirror, the schedule and the source.
//!
//! For every date the engine picks one authoritative managed event, removes
//! its duplicates, writes the schedule entry the event implies, and corrects
//! the event's metadata on the source. Dates without a managed event get a
//! default event. Dates are processed one at a time and a failure on one
//! never stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::classifier::{ColorPalette, LocationStatus, StatusClassifier};
use crate::error::{LocsyncError, LocsyncResult, ReconcileError, StoreError};
use crate::event::{NewEvent, SourceEvent};
use crate::managed::{self, MANAGED_PROPERTY_KEY, MANAGED_PROPERTY_VALUE};
use crate::mirror::{CachedEvent, EventMirror};
use crate::notifier::{ChangeSummary, Notifier};
use crate::patch::EventPatch;
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::source::{CalendarSource, Removal};

/// What asked for the reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Changes observed through an incremental sync
    Incremental,
    /// Mirror rebuilt by a full sync
    Full,
    /// Periodic upkeep of the forward horizon
    Maintenance,
    /// Requested from the command line
    Manual,
}

impl Trigger {
    pub fn is_incremental(&self) -> bool {
        matches!(self, Trigger::Incremental)
    }
}

/// Static inputs of the reconciliation rules
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub classifier: StatusClassifier,
    pub palette: ColorPalette,
    /// Location used for days without a managed event
    pub default_code: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            classifier: StatusClassifier::default(),
            palette: ColorPalette::default(),
            default_code: "HOM".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleChange {
    pub previous: Option<ScheduleEntry>,
    pub current: ScheduleEntry,
}

/// Everything done for one date
#[derive(Debug, Default)]
pub struct DateOutcome {
    pub schedule_change: Option<ScheduleChange>,
    /// Duplicate events removed from the source
    pub deleted_duplicates: Vec<String>,
    /// Authoritative event whose metadata was corrected
    pub patched: Option<String>,
    /// Default event created for the date
    pub created: Option<String>,
    pub failures: Vec<ReconcileError>,
}

impl DateOutcome {
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Number of writes issued against the source
    pub fn external_writes(&self) -> usize {
        self.deleted_duplicates.len()
            + usize::from(self.patched.is_some())
            + usize::from(self.created.is_some())
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub outcomes: BTreeMap<NaiveDate, DateOutcome>,
    /// Location changes handed to the notifier
    pub changes: ChangeSummary,
}

impl ReconcileReport {
    pub fn failed_dates(&self) -> Vec<NaiveDate> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(date, _)| *date)
            .collect()
    }

    /// Error out if any date was left unreconciled.
    pub fn ensure_complete(&self) -> LocsyncResult<()> {
        let failed = self.failed_dates();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(LocsyncError::Unreconciled(failed))
        }
    }

    pub fn external_writes(&self) -> usize {
        self.outcomes.values().map(DateOutcome::external_writes).sum()
    }

    pub fn schedule_writes(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.schedule_change.is_some())
            .count()
    }
}

pub struct Reconciler {
    mirror: Arc<dyn EventMirror>,
    schedule: Arc<dyn ScheduleStore>,
    source: Arc<dyn CalendarSource>,
    notifier: Arc<dyn Notifier>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        mirror: Arc<dyn EventMirror>,
        schedule: Arc<dyn ScheduleStore>,
        source: Arc<dyn CalendarSource>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
    ) -> Self {
        Reconciler {
            mirror,
            schedule,
            source,
            notifier,
            settings,
        }
    }

    pub fn default_code(&self) -> &str {
        &self.settings.default_code
    }

    /// Reconcile each date once, in date order, then send one change summary.
    pub async fn reconcile(
        &self,
        dates: impl IntoIterator<Item = NaiveDate>,
        trigger: Trigger,
    ) -> ReconcileReport {
        let dates: BTreeSet<NaiveDate> = dates.into_iter().collect();
        info!(
            dates = dates.len(),
            incremental = trigger.is_incremental(),
            "Starting reconciliation"
        );

        let mut report = ReconcileReport::default();

        for date in dates {
            let outcome = self
                .reconcile_date(date)
                .instrument(info_span!("reconcile_date", date = %date))
                .await;

            if let Some(change) = self.describe_change(&outcome) {
                report.changes.insert(date, change);
            }
            report.outcomes.insert(date, outcome);
        }

        if !report.changes.is_empty() {
            info!(changed = report.changes.len(), "Sending change summary");
            if let Err(e) = self.notifier.send_change_summary(&report.changes).await {
                error!(error = %e, "Failed to send change summary");
            }
        }

        let failed = report.failed_dates();
        if failed.is_empty() {
            info!(dates = report.outcomes.len(), "Reconciliation finished");
        } else {
            warn!(
                dates = report.outcomes.len(),
                failed = failed.len(),
                "Reconciliation finished with failures"
            );
        }

        report
    }

    async fn reconcile_date(&self, date: NaiveDate) -> DateOutcome {
        let mut outcome = DateOutcome::default();
        if let Err(e) = self.apply_date(date, &mut outcome).await {
            error!(error = %e, "Reconciliation failed");
            outcome.failures.push(e);
        }
        outcome
    }

    async fn apply_date(
        &self,
        date: NaiveDate,
        outcome: &mut DateOutcome,
    ) -> Result<(), ReconcileError> {
        let cached = self.mirror.by_date(date)?;
        let (authoritative, duplicates) = match select_authoritative(cached) {
            Some((event, duplicates)) => (Some(event), duplicates),
            None => (None, Vec::new()),
        };

        if !duplicates.is_empty() {
            info!(count = duplicates.len(), "Removing duplicate managed events");
        }
        for duplicate in &duplicates {
            match self.remove_duplicate(&duplicate.event_id).await {
                Ok(()) => outcome.deleted_duplicates.push(duplicate.event_id.clone()),
                Err(e) => {
                    error!(event_id = %duplicate.event_id, error = %e, "Failed to remove duplicate");
                    outcome.failures.push(e);
                }
            }
        }

        let code = match &authoritative {
            Some(event) => event.title().to_string(),
            None => self.settings.default_code.clone(),
        };
        let status = self.settings.classifier.classify(&code);
        let target = ScheduleEntry {
            date,
            location_code: code,
            status,
        };

        let previous = self.schedule.get(date)?;
        if previous.as_ref() != Some(&target) {
            info!(code = %target.location_code, status = %target.status, "Updating schedule entry");
            self.schedule.upsert(&target)?;
            outcome.schedule_change = Some(ScheduleChange {
                previous,
                current: target.clone(),
            });
        }

        match authoritative {
            Some(event) => {
                let patch = self.corrections(&event, status);
                if patch.is_empty() {
                    debug!(event_id = %event.event_id, "Authoritative event is up to date");
                    return Ok(());
                }

                info!(event_id = %event.event_id, "Correcting event metadata");
                let updated = self
                    .source
                    .patch_event(&event.event_id, &patch)
                    .await
                    .map_err(|source| ReconcileError::External {
                        action: "patch",
                        event_id: event.event_id.clone(),
                        source,
                    })?;
                outcome.patched = Some(event.event_id);
                self.refresh_mirror(&updated)?;
            }
            None => {
                let new_event = NewEvent {
                    summary: target.location_code.clone(),
                    date,
                    color_id: Some(self.settings.palette.color_for(status).to_string()),
                    private_properties: BTreeMap::from([(
                        MANAGED_PROPERTY_KEY.to_string(),
                        MANAGED_PROPERTY_VALUE.to_string(),
                    )]),
                };

                info!(code = %new_event.summary, "Creating default event");
                let created = self.source.insert_event(&new_event).await.map_err(|source| {
                    ReconcileError::External {
                        action: "create",
                        event_id: format!("<default for {date}>"),
                        source,
                    }
                })?;
                info!(event_id = %created.id, "Created default event");
                outcome.created = Some(created.id.clone());
                self.refresh_mirror(&created)?;
            }
        }

        Ok(())
    }

    /// Delete a duplicate on the source, then drop it from the mirror.
    async fn remove_duplicate(&self, event_id: &str) -> Result<(), ReconcileError> {
        match self.source.delete_event(event_id).await {
            Ok(Removal::Removed) => info!(event_id = %event_id, "Deleted duplicate event"),
            Ok(Removal::AlreadyGone) => {
                debug!(event_id = %event_id, "Duplicate event already gone")
            }
            Err(e) if e.is_gone() => debug!(event_id = %event_id, "Duplicate event already gone"),
            Err(source) => {
                return Err(ReconcileError::External {
                    action: "delete",
                    event_id: event_id.to_string(),
                    source,
                });
            }
        }
        self.mirror.delete(event_id)?;
        Ok(())
    }

    /// Metadata corrections for the authoritative event, merged into one patch.
    fn corrections(&self, event: &CachedEvent, status: LocationStatus) -> EventPatch {
        let mut patch = EventPatch::new();

        if !event.managed_property {
            patch = patch.merge(
                EventPatch::new().private_property(MANAGED_PROPERTY_KEY, MANAGED_PROPERTY_VALUE),
            );
        }

        if event.managed_description {
            let stripped = managed::strip_description_tag(event.description.as_deref().unwrap_or(""));
            patch = patch.merge(EventPatch::new().description(stripped));
        }

        let expected = self.settings.palette.color_for(status);
        if event.color_id.as_deref().unwrap_or("") != expected {
            patch = patch.merge(EventPatch::new().color(expected));
        }

        patch
    }

    /// Store the source's version of an event we just wrote.
    fn refresh_mirror(&self, event: &SourceEvent) -> Result<(), StoreError> {
        match CachedEvent::from_source(event) {
            Ok(cached) => self.mirror.upsert(&cached),
            Err(reason) => {
                warn!(event_id = %event.id, reason = %reason, "Source returned an event that cannot be mirrored");
                self.mirror.delete(&event.id).map(|_| ())
            }
        }
    }

    /// "previous → new" when the written entry moved to another location.
    /// A missing previous entry counts as the default location.
    fn describe_change(&self, outcome: &DateOutcome) -> Option<String> {
        let change = outcome.schedule_change.as_ref()?;
        let previous = change
            .previous
            .as_ref()
            .map(|e| e.location_code.as_str())
            .unwrap_or(&self.settings.default_code);

        (previous != change.current.location_code)
            .then(|| format!("{previous} → {}", change.current.location_code))
    }
}

/// Pick the newest managed event; the rest are duplicates.
///
/// Equal timestamps are broken by ascending event id so the choice does not
/// depend on storage order.
pub fn select_authoritative(events: Vec<CachedEvent>) -> Option<(CachedEvent, Vec<CachedEvent>)> {
    let mut managed: Vec<CachedEvent> = events.into_iter().filter(CachedEvent::is_managed).collect();
    managed.sort_by(|a, b| {
        b.updated
            .cmp(&a.updated)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let mut managed = managed.into_iter();
    let authoritative = managed.next()?;
    Some((authoritative, managed.collect()))
}
