pub mod auth;
pub mod channel;
pub mod reconcile;
pub mod serve;
pub mod status;
pub mod sync;

use anyhow::Result;

use crate::app::App;
use crate::config::Settings;

/// Validate settings and assemble the app for a command that talks to Google.
pub fn open(settings: Settings) -> Result<App> {
    settings.validate()?;
    App::build(settings)
}
