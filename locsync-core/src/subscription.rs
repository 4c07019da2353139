//! Push-notification channel lifecycle.
//!
//! The old channel is only stopped after its successor has been stored.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SubscriptionError;
use crate::source::{CalendarSource, Removal, WatchRequest, WebhookChannel};
use crate::state::{StateStore, WEBHOOK_CHANNEL_KEY};

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// The stored channel is not close to expiring
    Fresh(WebhookChannel),
    /// A successor replaced the stored channel
    Renewed {
        previous: WebhookChannel,
        current: WebhookChannel,
    },
    /// No usable channel was stored, so a new one was created
    Created(WebhookChannel),
}

pub struct SubscriptionManager {
    source: Arc<dyn CalendarSource>,
    state: Arc<dyn StateStore>,
    /// Public URL of the webhook endpoint
    callback_url: String,
    verification_token: String,
    renewal_threshold: Duration,
}

impl SubscriptionManager {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        state: Arc<dyn StateStore>,
        callback_url: impl Into<String>,
        verification_token: impl Into<String>,
        renewal_threshold: Duration,
    ) -> Self {
        SubscriptionManager {
            source,
            state,
            callback_url: callback_url.into(),
            verification_token: verification_token.into(),
            renewal_threshold,
        }
    }

    /// Create and store a fresh channel.
    pub async fn ensure_channel_exists(&self) -> Result<WebhookChannel, SubscriptionError> {
        let channel = self.create_channel().await?;
        self.store_channel(&channel).await?;
        Ok(channel)
    }

    /// Replace the stored channel when it expires within the threshold.
    pub async fn renew_if_near_expiry(&self) -> Result<RenewalOutcome, SubscriptionError> {
        self.renew_at(Utc::now()).await
    }

    async fn renew_at(&self, now: DateTime<Utc>) -> Result<RenewalOutcome, SubscriptionError> {
        let Some(previous) = self.stored_channel() else {
            info!("No usable channel stored, creating one");
            return self.ensure_channel_exists().await.map(RenewalOutcome::Created);
        };

        if previous.expires_at >= now + self.renewal_threshold {
            debug!(
                channel_id = %previous.id,
                expires_at = %previous.expires_at,
                "Channel is not due for renewal"
            );
            return Ok(RenewalOutcome::Fresh(previous));
        }

        info!(
            channel_id = %previous.id,
            expires_at = %previous.expires_at,
            "Channel expires soon, renewing"
        );
        let current = self.create_channel().await?;
        self.store_channel(&current).await?;
        self.stop_best_effort(&previous).await;

        Ok(RenewalOutcome::Renewed { previous, current })
    }

    /// The stored channel, or `None` when missing or unreadable.
    pub fn stored_channel(&self) -> Option<WebhookChannel> {
        let raw = match self.state.get(WEBHOOK_CHANNEL_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored channel");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(error = %e, "Stored channel info is unreadable");
                None
            }
        }
    }

    async fn create_channel(&self) -> Result<WebhookChannel, SubscriptionError> {
        let request = WatchRequest {
            id: Uuid::new_v4().to_string(),
            address: self.callback_url.clone(),
            token: self.verification_token.clone(),
        };

        let channel = self
            .source
            .watch(&request)
            .await
            .map_err(SubscriptionError::Watch)?;
        info!(
            channel_id = %channel.id,
            resource_id = %channel.resource_id,
            expires_at = %channel.expires_at,
            "Created webhook channel"
        );
        Ok(channel)
    }

    /// Persist `channel`, stopping it again if it cannot be stored.
    async fn store_channel(&self, channel: &WebhookChannel) -> Result<(), SubscriptionError> {
        let stored = serde_json::to_string(channel)
            .map_err(SubscriptionError::from)
            .and_then(|json| {
                self.state
                    .set(WEBHOOK_CHANNEL_KEY, &json)
                    .map_err(|source| SubscriptionError::Store {
                        channel_id: channel.id.clone(),
                        source,
                    })
            });

        if let Err(e) = stored {
            error!(channel_id = %channel.id, error = %e, "Failed to store channel, stopping it");
            self.stop_best_effort(channel).await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop a channel, logging instead of failing.
    pub async fn stop_best_effort(&self, channel: &WebhookChannel) {
        if channel.id.is_empty() || channel.resource_id.is_empty() {
            debug!("Skipping stop for channel without ids");
            return;
        }

        match self
            .source
            .stop_channel(&channel.id, &channel.resource_id)
            .await
        {
            Ok(Removal::Removed) => info!(channel_id = %channel.id, "Stopped channel"),
            Ok(Removal::AlreadyGone) => {
                debug!(channel_id = %channel.id, "Channel already stopped")
            }
            Err(e) if e.is_gone() => debug!(channel_id = %channel.id, "Channel already stopped"),
            Err(e) => warn!(channel_id = %channel.id, error = %e, "Failed to stop channel"),
        }
    }
}
