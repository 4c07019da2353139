//! Wires settings, storage, the Google source and the engine together.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use locsync_core::{
    CalendarSource, Coordinator, LogNotifier, Notifier, Reconciler, SqliteStore,
    SubscriptionManager, SyncEngine,
};
use locsync_provider_google::GoogleCalendar;
use tracing::info;

use crate::config::Settings;
use crate::email::EmailNotifier;
use crate::state::AppState;

pub struct App {
    pub settings: Settings,
    pub store: Arc<SqliteStore>,
    pub coordinator: Arc<Coordinator>,
}

impl App {
    /// Open the database and connect to the configured calendar.
    pub fn build(settings: Settings) -> Result<Self> {
        let db_path = settings.database_path()?;
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            }
        }
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        info!(path = %db_path.display(), "Opened database");

        let source = GoogleCalendar::new(&settings.google).context("Invalid Google settings")?;
        Self::assemble(settings, Arc::new(store), Arc::new(source))
    }

    pub fn assemble(
        settings: Settings,
        store: Arc<SqliteStore>,
        source: Arc<dyn CalendarSource>,
    ) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = if settings.smtp.enabled {
            Arc::new(EmailNotifier::new(&settings.smtp).context("Invalid SMTP settings")?)
        } else {
            Arc::new(LogNotifier)
        };

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            store.clone(),
            source.clone(),
            notifier.clone(),
            settings.reconcile_settings()?,
        ));

        let sync = SyncEngine::new(
            source.clone(),
            store.clone(),
            store.clone(),
            reconciler.clone(),
            notifier,
        )
        .with_window(settings.sync_window())
        .with_cursor_failure(settings.sync.cursor_failure);

        let subscription = SubscriptionManager::new(
            source,
            store.clone(),
            settings.webhook_url(),
            settings.google.webhook_token.clone(),
            settings.renewal_threshold(),
        );

        let coordinator = Arc::new(Coordinator::new(
            sync,
            reconciler,
            subscription,
            settings.app.future_horizon_days,
        ));

        Ok(App {
            settings,
            store,
            coordinator,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            coordinator: Arc::clone(&self.coordinator),
            store: Arc::clone(&self.store),
            webhook_token: Arc::from(self.settings.google.webhook_token.as_str()),
        }
    }

    /// In-memory app whose calendar is never contacted.
    #[cfg(test)]
    pub fn for_tests(webhook_token: &str) -> Self {
        let mut settings = Settings::default();
        settings.google.webhook_token = webhook_token.to_string();
        // Nothing listens here; tests must not reach the network
        settings.google.api_base_url = "http://127.0.0.1:9/calendar/v3".to_string();

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let source = Arc::new(GoogleCalendar::new(&settings.google).unwrap());
        App::assemble(settings, store, source).unwrap()
    }
}
