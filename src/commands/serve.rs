use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::{routes, scheduler, singleton};

pub async fn run(settings: Settings) -> Result<()> {
    let app = super::open(settings)?;

    // Ensure only one instance serves this database
    let _lock = singleton::acquire_lock(&app.settings.database_path()?)?;

    let subscription_enabled = app.settings.app.enable_calendar_subscription;
    if subscription_enabled {
        match app.coordinator.ensure_channel().await {
            Ok(channel) => info!(
                channel_id = %channel.id,
                expires_at = %channel.expires_at,
                "Webhook channel ready"
            ),
            // Renewal retries on its next tick
            Err(e) => error!(error = %e, "Failed to create webhook channel"),
        }
    } else {
        info!("Calendar subscription disabled, relying on scheduled syncs");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = app
        .coordinator
        .spawn_worker(shutdown_rx.clone())
        .context("Sync worker was already started")?;
    app.coordinator.request_sync();

    let tasks = scheduler::spawn(
        &app.settings.scheduler,
        subscription_enabled,
        &app.coordinator,
        &shutdown_rx,
    )?;

    let addr: SocketAddr = app
        .settings
        .app
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", app.settings.app.listen_addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "locsync listening");

    axum::serve(listener, routes::router(app.state()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, waiting for running tasks");
    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks had already stopped");
    }
    if let Err(e) = worker.await {
        error!(error = %e, "Sync worker panicked");
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Scheduled task panicked");
        }
    }

    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
