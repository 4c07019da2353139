//! In-memory calendar, notifier and fixtures for engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::Semaphore;

use crate::classifier::LocationStatus;
use crate::coordinator::Coordinator;
use crate::error::{NotifyError, StoreError};
use crate::event::{EventStatus, EventTime, NewEvent, SourceEvent};
use crate::managed::{MANAGED_PROPERTY_KEY, MANAGED_PROPERTY_VALUE};
use crate::mirror::{CachedEvent, EventMirror};
use crate::notifier::{ChangeSummary, Notifier};
use crate::patch::EventPatch;
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::source::{
    CalendarSource, EventPage, ListQuery, Removal, SourceError, SourceResult, WatchRequest,
    WebhookChannel,
};
use crate::state::{SYNC_TOKEN_KEY, StateStore, WEBHOOK_CHANNEL_KEY};
use crate::store::SqliteStore;
use crate::subscription::SubscriptionManager;
use crate::sync::{SyncEngine, SyncWindow};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A single-day full-day event
pub fn all_day(id: &str, date: NaiveDate, title: &str, updated: &str, managed: bool) -> SourceEvent {
    let mut private_properties = BTreeMap::new();
    if managed {
        private_properties.insert(
            MANAGED_PROPERTY_KEY.to_string(),
            MANAGED_PROPERTY_VALUE.to_string(),
        );
    }
    SourceEvent {
        id: id.into(),
        status: EventStatus::Confirmed,
        summary: Some(title.into()),
        description: None,
        start: Some(EventTime::Date(date)),
        end: Some(EventTime::Date(date.succ_opt().unwrap())),
        updated: Some(updated.parse().unwrap()),
        color_id: None,
        recurring_event_id: None,
        original_start: None,
        private_properties,
    }
}

pub fn cached(id: &str, date: NaiveDate, title: &str, updated: &str, managed: bool) -> CachedEvent {
    CachedEvent::from_source(&all_day(id, date, title, updated, managed)).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List {
        page_token: Option<String>,
        sync_token: Option<String>,
    },
    Patch(String, EventPatch),
    Insert(NewEvent),
    Delete(String),
    Watch(String),
    Stop(String),
}

#[derive(Default)]
struct SourceState {
    events: BTreeMap<String, SourceEvent>,
    /// Changes since the last cursor was handed out
    feed: Vec<SourceEvent>,
    cursor_seq: u64,
    id_seq: u64,
    page_size: Option<usize>,
    invalid_cursor: bool,
    fail_list: bool,
    fail_watch: bool,
    fail_patch: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
    channels: BTreeSet<String>,
    calls: Vec<Call>,
    gate: Option<Arc<Semaphore>>,
}

/// Calendar held in memory.
///
/// Only changes made through [`FakeSource::change`] and
/// [`FakeSource::cancel`] show up in incremental listings.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap()
    }

    /// Add an event without recording a change
    pub fn insert(&self, event: SourceEvent) {
        self.lock().events.insert(event.id.clone(), event);
    }

    /// Add or replace an event and record the change
    pub fn change(&self, event: SourceEvent) {
        let mut state = self.lock();
        state.events.insert(event.id.clone(), event.clone());
        state.feed.push(event);
    }

    /// Delete an event and record a dateless cancellation
    pub fn cancel(&self, id: &str) {
        let mut state = self.lock();
        state.events.remove(id);
        state.feed.push(SourceEvent {
            id: id.into(),
            status: EventStatus::Cancelled,
            summary: None,
            description: None,
            start: None,
            end: None,
            updated: None,
            color_id: None,
            recurring_event_id: None,
            original_start: None,
            private_properties: BTreeMap::new(),
        });
    }

    /// Drop an event silently, as if deleted elsewhere
    pub fn forget(&self, id: &str) {
        self.lock().events.remove(id);
    }

    pub fn set_description(&self, id: &str, description: &str) -> SourceEvent {
        let mut state = self.lock();
        let event = state.events.get_mut(id).unwrap();
        event.description = Some(description.into());
        event.clone()
    }

    pub fn event(&self, id: &str) -> Option<SourceEvent> {
        self.lock().events.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock()
            .events
            .values()
            .filter(|e| !e.is_cancelled())
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Patch(..) | Call::Insert(_) | Call::Delete(_)))
            .count()
    }

    pub fn insert_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Insert(_)))
            .count()
    }

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = Some(size);
    }

    pub fn set_invalid_cursor(&self, invalid: bool) {
        self.lock().invalid_cursor = invalid;
    }

    pub fn fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    pub fn fail_watch(&self, fail: bool) {
        self.lock().fail_watch = fail;
    }

    pub fn fail_patch(&self, id: &str) {
        self.lock().fail_patch.insert(id.into());
    }

    pub fn fail_delete(&self, id: &str) {
        self.lock().fail_delete.insert(id.into());
    }

    /// Make every listing wait for a permit from the returned semaphore.
    pub fn gate_listing(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().gate = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl CalendarSource for FakeSource {
    async fn list_events(&self, query: &ListQuery) -> SourceResult<EventPage> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(Call::List {
                page_token: query.page_token.clone(),
                sync_token: query.sync_token.clone(),
            });
            state.gate.clone()
        };
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?
                .forget();
        }

        let mut state = self.lock();
        if state.fail_list {
            return Err(SourceError::Transport("connection reset".into()));
        }
        let incremental = query.sync_token.is_some();
        if incremental && state.invalid_cursor {
            return Err(SourceError::InvalidCursor);
        }

        let items: Vec<SourceEvent> = if incremental {
            state.feed.clone()
        } else {
            state.events.values().cloned().collect()
        };
        let offset = query
            .page_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0)
            .min(items.len());
        let end = offset
            .saturating_add(state.page_size.unwrap_or(usize::MAX))
            .min(items.len());
        let page = items[offset..end].to_vec();

        if end < items.len() {
            return Ok(EventPage {
                items: page,
                next_page_token: Some(end.to_string()),
                next_sync_token: None,
            });
        }

        state.feed.clear();
        state.cursor_seq += 1;
        Ok(EventPage {
            items: page,
            next_page_token: None,
            next_sync_token: Some(format!("cursor-{}", state.cursor_seq)),
        })
    }

    async fn patch_event(&self, event_id: &str, patch: &EventPatch) -> SourceResult<SourceEvent> {
        let mut state = self.lock();
        state.calls.push(Call::Patch(event_id.into(), patch.clone()));
        if state.fail_patch.contains(event_id) {
            return Err(SourceError::Api {
                status: 500,
                message: "backend error".into(),
            });
        }

        let event = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| SourceError::NotFound(event_id.into()))?;
        patch.apply(event);
        event.updated = Some(Utc::now());
        Ok(event.clone())
    }

    async fn insert_event(&self, new_event: &NewEvent) -> SourceResult<SourceEvent> {
        let mut state = self.lock();
        state.calls.push(Call::Insert(new_event.clone()));
        state.id_seq += 1;

        let event = SourceEvent {
            id: format!("created-{}", state.id_seq),
            status: EventStatus::Confirmed,
            summary: Some(new_event.summary.clone()),
            description: None,
            start: Some(EventTime::Date(new_event.date)),
            end: new_event.date.succ_opt().map(EventTime::Date),
            updated: Some(Utc::now()),
            color_id: new_event.color_id.clone(),
            recurring_event_id: None,
            original_start: None,
            private_properties: new_event.private_properties.clone(),
        };
        state.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn delete_event(&self, event_id: &str) -> SourceResult<Removal> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(event_id.into()));
        if state.fail_delete.contains(event_id) {
            return Err(SourceError::Api {
                status: 403,
                message: "rate limit exceeded".into(),
            });
        }
        Ok(match state.events.remove(event_id) {
            Some(_) => Removal::Removed,
            None => Removal::AlreadyGone,
        })
    }

    async fn watch(&self, request: &WatchRequest) -> SourceResult<WebhookChannel> {
        let mut state = self.lock();
        state.calls.push(Call::Watch(request.id.clone()));
        if state.fail_watch {
            return Err(SourceError::Api {
                status: 400,
                message: "push notifications not enabled".into(),
            });
        }

        state.channels.insert(request.id.clone());
        Ok(WebhookChannel {
            id: request.id.clone(),
            resource_id: "resource-1".into(),
            expires_at: Utc::now() + Duration::days(7),
        })
    }

    async fn stop_channel(&self, channel_id: &str, _resource_id: &str) -> SourceResult<Removal> {
        let mut state = self.lock();
        state.calls.push(Call::Stop(channel_id.into()));
        if state.channels.remove(channel_id) {
            Ok(Removal::Removed)
        } else {
            Ok(Removal::AlreadyGone)
        }
    }
}

/// Keeps everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    summaries: Mutex<Vec<ChangeSummary>>,
    alerts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn summaries(&self) -> Vec<ChangeSummary> {
        self.summaries.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_change_summary(&self, changes: &ChangeSummary) -> Result<(), NotifyError> {
        self.summaries.lock().unwrap().push(changes.clone());
        Ok(())
    }

    async fn send_alert(&self, message: &str) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(message.into());
        Ok(())
    }
}

/// State store whose writes can be made to fail.
pub struct FlakyState {
    inner: Arc<SqliteStore>,
    fail_writes: AtomicBool,
}

impl FlakyState {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                table: "sync_state",
                message: "disk full".into(),
            });
        }
        Ok(())
    }
}

impl StateStore for FlakyState {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        StateStore::get(&*self.inner, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key)
    }
}

/// The engine wired to in-memory collaborators.
pub struct Fixture {
    pub store: Arc<SqliteStore>,
    pub state: Arc<FlakyState>,
    pub source: Arc<FakeSource>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Fixture {
            state: Arc::new(FlakyState {
                inner: Arc::clone(&store),
                fail_writes: AtomicBool::new(false),
            }),
            store,
            source: Arc::new(FakeSource::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.store.clone(),
            self.source.clone(),
            self.notifier.clone(),
            ReconcileSettings::default(),
        )
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.source.clone(),
            self.store.clone(),
            self.state.clone(),
            Arc::new(self.reconciler()),
            self.notifier.clone(),
        )
    }

    pub fn subscriptions(&self) -> SubscriptionManager {
        SubscriptionManager::new(
            self.source.clone(),
            self.state.clone(),
            "https://locsync.test/webhook/calendar",
            "secret",
            Duration::days(3),
        )
    }

    /// Horizon of two days, full syncs only reconcile today.
    pub fn coordinator(&self) -> Coordinator {
        let sync = self.sync_engine().with_window(SyncWindow {
            past_days: 0,
            future_days: 0,
        });
        Coordinator::new(sync, Arc::new(self.reconciler()), self.subscriptions(), 2)
    }

    /// Put an event on the source and in the mirror
    pub fn seed(&self, event: SourceEvent) {
        self.source.insert(event.clone());
        self.seed_mirror_only(event);
    }

    pub fn seed_mirror_only(&self, event: SourceEvent) {
        let cached = CachedEvent::from_source(&event).unwrap();
        EventMirror::upsert(&*self.store, &cached).unwrap();
    }

    /// Replace the description of a seeded event on both sides
    pub fn seed_description(&self, id: &str, description: &str) {
        let event = self.source.set_description(id, description);
        self.seed_mirror_only(event);
    }

    pub fn mirror_event(&self, id: &str) -> Option<CachedEvent> {
        self.store.by_id(id).unwrap()
    }

    pub fn mirror_ids(&self) -> Vec<String> {
        let conn = self.store.conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT event_id FROM calendar_event_cache")
            .unwrap();
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        ids
    }

    pub fn set_schedule(&self, date: NaiveDate, code: &str, status: LocationStatus) {
        let entry = ScheduleEntry {
            date,
            location_code: code.into(),
            status,
        };
        ScheduleStore::upsert(&*self.store, &entry).unwrap();
    }

    pub fn schedule_entry(&self, date: NaiveDate) -> Option<ScheduleEntry> {
        ScheduleStore::get(&*self.store, date).unwrap()
    }

    pub fn set_state(&self, key: &str, value: &str) {
        self.store.set(key, value).unwrap();
    }

    pub fn set_cursor(&self, cursor: &str) {
        self.set_state(SYNC_TOKEN_KEY, cursor);
    }

    pub fn cursor(&self) -> Option<String> {
        StateStore::get(&*self.store, SYNC_TOKEN_KEY).unwrap()
    }

    pub fn store_channel(&self, channel: &WebhookChannel) {
        self.set_state(WEBHOOK_CHANNEL_KEY, &serde_json::to_string(channel).unwrap());
    }
}

