use std::fmt;

use serde::Deserialize;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Credentials and endpoints for one Google calendar
#[derive(Clone, Deserialize)]
pub struct GoogleSettings {
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Long-lived token obtained once through `locsync auth`
    #[serde(default)]
    pub refresh_token: String,
    /// Shared secret echoed back in webhook notifications
    #[serde(default)]
    pub webhook_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

impl Default for GoogleSettings {
    fn default() -> Self {
        GoogleSettings {
            calendar_id: default_calendar_id(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            webhook_token: String::new(),
            api_base_url: default_api_base_url(),
            token_url: default_token_url(),
            auth_url: default_auth_url(),
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for GoogleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleSettings")
            .field("calendar_id", &self.calendar_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("webhook_token", &redacted(&self.webhook_token))
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("auth_url", &self.auth_url)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}
