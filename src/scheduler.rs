//! Periodic triggers for maintenance, full syncs and channel renewal.
//!
//! Each task runs on its own interval and goes through the coordinator, so
//! it waits its turn behind any sync in progress.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use locsync_core::{Coordinator, RenewalOutcome};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::SchedulerSettings;

pub fn spawn(
    settings: &SchedulerSettings,
    subscription_enabled: bool,
    coordinator: &Arc<Coordinator>,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();

    if settings.horizon_maintenance.enabled {
        let coordinator = Arc::clone(coordinator);
        tasks.push(spawn_task(
            "horizon_maintenance",
            settings.horizon_maintenance.period()?,
            shutdown.clone(),
            move || {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    let report = coordinator.run_horizon_maintenance().await;
                    let failed = report.failed_dates();
                    if failed.is_empty() {
                        info!(dates = report.outcomes.len(), "Horizon maintenance completed");
                    } else {
                        warn!(failed = failed.len(), "Horizon maintenance left dates unreconciled");
                    }
                }
            },
        ));
    }

    if settings.periodic_full_sync.enabled {
        let coordinator = Arc::clone(coordinator);
        tasks.push(spawn_task(
            "periodic_full_sync",
            settings.periodic_full_sync.period()?,
            shutdown.clone(),
            move || {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    if let Err(e) = coordinator.run_full_sync().await {
                        error!(error = %e, "Periodic full sync failed");
                    }
                }
            },
        ));
    }

    if settings.channel_renewal.enabled && subscription_enabled {
        let coordinator = Arc::clone(coordinator);
        tasks.push(spawn_task(
            "channel_renewal",
            settings.channel_renewal.period()?,
            shutdown.clone(),
            move || {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    match coordinator.renew_channel().await {
                        Ok(RenewalOutcome::Fresh(_)) => {}
                        Ok(outcome) => info!(?outcome, "Webhook channel replaced"),
                        Err(e) => error!(error = %e, "Channel renewal failed"),
                    }
                }
            },
        ));
    }

    Ok(tasks)
}

/// Run `task` every `period` until `shutdown` turns true. The first run
/// happens one period after start.
fn spawn_task<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, every = %humantime::format_duration(period), "Scheduled task started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    info!(task = name, "Running scheduled task");
                    task().await;
                }
            }
        }
        info!(task = name, "Scheduled task stopped");
    })
}
