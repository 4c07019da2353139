//! Outbound notifications about schedule changes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::NotifyError;

/// "previous → new" per changed date, in date order
pub type ChangeSummary = BTreeMap<NaiveDate, String>;

/// Delivers change summaries and operator alerts.
///
/// Failures are reported to the caller, which logs them; they never fail a
/// sync.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_change_summary(&self, changes: &ChangeSummary) -> Result<(), NotifyError>;

    async fn send_alert(&self, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_change_summary(&self, changes: &ChangeSummary) -> Result<(), NotifyError> {
        for (date, change) in changes {
            info!(date = %date, change = %change, "Schedule changed");
        }
        Ok(())
    }

    async fn send_alert(&self, message: &str) -> Result<(), NotifyError> {
        warn!(alert = %message, "Operator alert");
        Ok(())
    }
}
