use anyhow::Result;
use locsync_core::{DayRange, Trigger};

use crate::config::Settings;

pub async fn run(settings: Settings, range: DayRange) -> Result<()> {
    let app = super::open(settings)?;

    println!("Reconciling {} to {} ({} days)", range.first, range.last, range.len());
    let report = app.coordinator.reconcile_range(range, Trigger::Manual).await;

    for (date, change) in &report.changes {
        println!("  {}  {}", date, change);
    }
    for date in report.failed_dates() {
        if let Some(outcome) = report.outcomes.get(&date) {
            for failure in &outcome.failures {
                println!("  {}  failed: {}", date, failure);
            }
        }
    }

    println!(
        "{} schedule updates, {} calendar writes, {} failed dates",
        report.schedule_writes(),
        report.external_writes(),
        report.failed_dates().len()
    );

    report.ensure_complete()?;
    Ok(())
}
