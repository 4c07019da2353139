use std::sync::Arc;

use locsync_core::{Coordinator, SqliteStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<SqliteStore>,
    /// Expected value of the channel token header
    pub webhook_token: Arc<str>,
}
