//! Creates a valid Google session (access token) that we can use to call the gcal API

use chrono::{DateTime, Duration, Utc};
use locsync_core::source::{SourceError, SourceResult};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GoogleSettings;

/// Tokens are refreshed this long before Google considers them expired
const EXPIRY_MARGIN_SECS: i64 = 60;

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Exchanges the configured refresh token for short-lived access tokens.
pub struct Session {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    current: Mutex<Option<AccessToken>>,
}

impl Session {
    pub fn new(http: reqwest::Client, settings: &GoogleSettings) -> Self {
        Session {
            http,
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            refresh_token: settings.refresh_token.clone(),
            current: Mutex::new(None),
        }
    }

    /// A bearer token valid for at least the expiry margin.
    pub async fn access_token(&self) -> SourceResult<String> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref() {
            if token.is_usable_at(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Forget the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn refresh(&self) -> SourceResult<AccessToken> {
        if self.refresh_token.is_empty() {
            return Err(SourceError::Auth(
                "no refresh token configured, run `locsync auth` first".into(),
            ));
        }

        debug!("Refreshing Google access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("token refresh: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!(
                "token refresh returned {status}: {error_text}"
            )));
        }

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
            expires_in: i64,
        }

        let refresh_data: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("token refresh response: {e}")))?;

        info!(expires_in = refresh_data.expires_in, "Obtained Google access token");
        Ok(AccessToken {
            value: refresh_data.access_token,
            expires_at: Utc::now() + Duration::seconds(refresh_data.expires_in),
        })
    }
}
