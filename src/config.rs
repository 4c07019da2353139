use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use locsync_core::{
    ClassifierPatterns, ColorPalette, CursorFailurePolicy, ReconcileSettings, StatusClassifier,
    SyncWindow,
};
use locsync_provider_google::GoogleSettings;
use serde::Deserialize;
use url::Url;

/// Environment overrides, e.g. LOCSYNC__SMTP__PASSWORD
const ENV_PREFIX: &str = "LOCSYNC";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub google: GoogleSettings,
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub classifier: ClassifierPatterns,
    #[serde(default)]
    pub colors: ColorPalette,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    /// Public base URL the webhook is reachable under
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_location_code")]
    pub default_location_code: String,
    #[serde(default = "default_future_horizon_days")]
    pub future_horizon_days: u32,
    #[serde(default = "default_past_sync_window_days")]
    pub past_sync_window_days: u32,
    #[serde(default)]
    pub enable_calendar_subscription: bool,
    #[serde(default = "default_channel_renewal_threshold_days")]
    pub channel_renewal_threshold_days: u32,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Defaults to locsync.db in the platform data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_location_code() -> String {
    "HOM".to_string()
}

fn default_future_horizon_days() -> u32 {
    90
}

fn default_past_sync_window_days() -> u32 {
    30
}

fn default_channel_renewal_threshold_days() -> u32 {
    3
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            base_url: String::new(),
            default_location_code: default_location_code(),
            future_horizon_days: default_future_horizon_days(),
            past_sync_window_days: default_past_sync_window_days(),
            enable_calendar_subscription: false,
            channel_renewal_threshold_days: default_channel_renewal_threshold_days(),
            listen_addr: default_listen_addr(),
            database_path: None,
        }
    }
}

/// One periodic task
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSchedule {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// humantime duration such as "24h" or "7days"
    pub every: String,
}

fn enabled_by_default() -> bool {
    true
}

impl TaskSchedule {
    fn every(every: &str) -> Self {
        TaskSchedule {
            enabled: true,
            every: every.to_string(),
        }
    }

    pub fn period(&self) -> Result<Duration> {
        let period = humantime::parse_duration(&self.every)
            .with_context(|| format!("Invalid duration '{}'", self.every))?;
        if period.is_zero() {
            bail!("Duration '{}' must be longer than zero", self.every);
        }
        Ok(period)
    }
}

#[derive(Debug, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_horizon_maintenance")]
    pub horizon_maintenance: TaskSchedule,
    #[serde(default = "default_periodic_full_sync")]
    pub periodic_full_sync: TaskSchedule,
    #[serde(default = "default_channel_renewal")]
    pub channel_renewal: TaskSchedule,
}

fn default_horizon_maintenance() -> TaskSchedule {
    TaskSchedule::every("24h")
}

fn default_periodic_full_sync() -> TaskSchedule {
    TaskSchedule::every("168h")
}

fn default_channel_renewal() -> TaskSchedule {
    TaskSchedule::every("24h")
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            horizon_maintenance: default_horizon_maintenance(),
            periodic_full_sync: default_periodic_full_sync(),
            channel_renewal: default_channel_renewal(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SmtpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpSettings {
    fn default() -> Self {
        SmtpSettings {
            enabled: false,
            host: String::new(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
            sender: String::new(),
            recipient: String::new(),
        }
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub cursor_failure: CursorFailurePolicy,
}

/// Get the config directory path (~/.config/locsync)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("locsync");
    Ok(config_dir)
}

/// Get the config file path (~/.config/locsync/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

impl Settings {
    /// Load the TOML file, then apply environment overrides.
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path()?, false),
        };

        Config::builder()
            .add_source(File::from(path.as_path()).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .separator(ENV_SEPARATOR),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Check everything a running service depends on.
    pub fn validate(&self) -> Result<()> {
        if self.google.client_id.is_empty() || self.google.client_secret.is_empty() {
            bail!("google.client_id and google.client_secret are required");
        }
        if self.google.refresh_token.is_empty() {
            bail!("google.refresh_token is required, run `locsync auth` to obtain one");
        }
        if self.google.calendar_id.is_empty() {
            bail!("google.calendar_id must not be empty");
        }

        if self.app.default_location_code.trim().is_empty() {
            bail!("app.default_location_code must not be empty");
        }
        self.app
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("app.listen_addr '{}' is not an address", self.app.listen_addr))?;

        if self.app.enable_calendar_subscription {
            if self.app.base_url.is_empty() {
                bail!("app.base_url is required when enable_calendar_subscription is set");
            }
            let base = Url::parse(&self.app.base_url)
                .with_context(|| format!("app.base_url '{}' is not a URL", self.app.base_url))?;
            if base.scheme() != "https" && base.scheme() != "http" {
                bail!("app.base_url must be an http(s) URL");
            }
            if self.google.webhook_token.is_empty() {
                bail!("google.webhook_token is required when enable_calendar_subscription is set");
            }
        }

        if self.smtp.enabled
            && (self.smtp.host.is_empty()
                || self.smtp.sender.is_empty()
                || self.smtp.recipient.is_empty())
        {
            bail!("smtp.host, smtp.sender and smtp.recipient are required when smtp is enabled");
        }

        self.status_classifier()?;
        for (name, task) in [
            ("horizon_maintenance", &self.scheduler.horizon_maintenance),
            ("periodic_full_sync", &self.scheduler.periodic_full_sync),
            ("channel_renewal", &self.scheduler.channel_renewal),
        ] {
            task.period()
                .with_context(|| format!("scheduler.{name}.every"))?;
        }

        Ok(())
    }

    pub fn status_classifier(&self) -> Result<StatusClassifier> {
        StatusClassifier::new(&self.classifier).context("Invalid classifier pattern")
    }

    pub fn reconcile_settings(&self) -> Result<ReconcileSettings> {
        Ok(ReconcileSettings {
            classifier: self.status_classifier()?,
            palette: self.colors.clone(),
            default_code: self.app.default_location_code.trim().to_string(),
        })
    }

    pub fn sync_window(&self) -> SyncWindow {
        SyncWindow {
            past_days: self.app.past_sync_window_days,
            future_days: self.app.future_horizon_days,
        }
    }

    pub fn renewal_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.app.channel_renewal_threshold_days.into())
    }

    /// Where Google posts change notifications
    pub fn webhook_url(&self) -> String {
        format!(
            "{}{}",
            self.app.base_url.trim_end_matches('/'),
            crate::routes::webhook::WEBHOOK_PATH
        )
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.app.database_path {
            return Ok(path.clone());
        }
        Ok(dirs::data_dir()
            .context("Could not determine data directory")?
            .join("locsync")
            .join("locsync.db"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[google]
client_id = "id.apps.googleusercontent.com"
client_secret = "secret"
refresh_token = "1//refresh"
"#;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let file = write_config(MINIMAL);

        let settings = Settings::load(Some(file.path())).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.google.calendar_id, "primary");
        assert_eq!(settings.app.default_location_code, "HOM");
        assert_eq!(settings.app.future_horizon_days, 90);
        assert_eq!(settings.app.past_sync_window_days, 30);
        assert!(!settings.app.enable_calendar_subscription);
        assert_eq!(settings.smtp.port, 587);
        assert_eq!(settings.colors.vacation, "10");
        assert_eq!(settings.sync.cursor_failure, CursorFailurePolicy::Log);
        assert_eq!(
            settings.scheduler.periodic_full_sync.period().unwrap(),
            Duration::from_secs(168 * 3600)
        );
    }

    #[test]
    fn test_sections_override_defaults() {
        let file = write_config(&format!(
            "{MINIMAL}
[app]
base_url = \"https://locsync.example.com/\"
enable_calendar_subscription = true
future_horizon_days = 14

[scheduler.channel_renewal]
enabled = false
every = \"12h\"

[colors]
home = \"7\"

[sync]
cursor_failure = \"notify\"
"
        ));
        let mut settings = Settings::load(Some(file.path())).unwrap();
        settings.google.webhook_token = "token".into();

        settings.validate().unwrap();
        assert_eq!(settings.app.future_horizon_days, 14);
        assert!(!settings.scheduler.channel_renewal.enabled);
        assert!(settings.scheduler.horizon_maintenance.enabled);
        assert_eq!(settings.colors.home, "7");
        assert_eq!(settings.colors.office, "5");
        assert_eq!(settings.sync.cursor_failure, CursorFailurePolicy::Notify);
        assert_eq!(
            settings.webhook_url(),
            "https://locsync.example.com/webhook/calendar"
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_subscription_requires_base_url() {
        let file = write_config(&format!("{MINIMAL}\n[app]\nenable_calendar_subscription = true\n"));
        let settings = Settings::load(Some(file.path())).unwrap();

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_smtp_requires_addresses() {
        let file = write_config(&format!("{MINIMAL}\n[smtp]\nenabled = true\nhost = \"smtp.example.com\"\n"));
        let settings = Settings::load(Some(file.path())).unwrap();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_classifier_pattern_is_rejected() {
        let file = write_config(&format!("{MINIMAL}\n[classifier]\noffice = \"^P(\"\n"));
        let settings = Settings::load(Some(file.path())).unwrap();

        let err = settings.validate().unwrap_err();
        assert!(format!("{err:#}").contains("classifier"));
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let task = TaskSchedule::every("0s");
        assert!(task.period().is_err());
        assert!(TaskSchedule::every("soon").period().is_err());
        assert_eq!(
            TaskSchedule::every("90m").period().unwrap(),
            Duration::from_secs(5400)
        );
    }
}
