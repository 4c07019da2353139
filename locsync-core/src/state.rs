//! Process-wide key/value state (sync cursor, webhook channel).

use crate::error::StoreError;

/// Continuation token for incremental listings
pub const SYNC_TOKEN_KEY: &str = "sync_token";

/// JSON-encoded [`crate::source::WebhookChannel`]
pub const WEBHOOK_CHANNEL_KEY: &str = "webhook_channel";

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
