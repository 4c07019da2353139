use anyhow::Result;

use crate::app::App;
use crate::config::Settings;
use crate::status::StatusReport;

// Reads local state only, so Google credentials are not required
pub fn run(settings: Settings) -> Result<()> {
    let app = App::build(settings)?;
    StatusReport::gather(&app.store, &app.coordinator)?.print();
    Ok(())
}
