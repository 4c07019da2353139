use anyhow::Result;
use locsync_core::SyncSummary;
use locsync_core::sync::SyncKind;

use crate::config::Settings;

pub async fn run(settings: Settings, full: bool) -> Result<()> {
    let app = super::open(settings)?;

    let summary = if full {
        app.coordinator.run_full_sync().await?
    } else {
        app.coordinator.run_sync().await?
    };

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    let kind = match summary.kind {
        SyncKind::Full => "Full",
        SyncKind::Incremental => "Incremental",
    };
    println!("{} sync fetched {} events", kind, summary.fetched);

    let Some(report) = &summary.report else {
        println!("Nothing to reconcile.");
        return;
    };

    println!(
        "Reconciled {} dates: {} schedule updates, {} calendar writes",
        report.outcomes.len(),
        report.schedule_writes(),
        report.external_writes()
    );
    for (date, change) in &report.changes {
        println!("  {}  {}", date, change);
    }
    let failed = report.failed_dates();
    if !failed.is_empty() {
        println!("{} dates failed and will be retried on the next run", failed.len());
    }
}
