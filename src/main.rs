mod app;
mod commands;
mod config;
mod email;
mod routes;
mod scheduler;
mod singleton;
mod state;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use locsync_core::DayRange;
use locsync_core::dates;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "locsync")]
#[command(about = "Keep a per-day location schedule in sync with a Google calendar")]
struct Cli {
    /// Config file (defaults to ~/.config/locsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook listener, sync worker and scheduled tasks
    Serve,
    /// Run one sync now
    Sync {
        /// Rebuild the mirror from a full listing even if a cursor is stored
        #[arg(long)]
        full: bool,
    },
    /// Reconcile a range of dates against the mirror
    Reconcile {
        /// First date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        from: Option<String>,

        /// Last date (YYYY-MM-DD), defaults to the end of the horizon
        #[arg(long)]
        to: Option<String>,
    },
    /// Manage the push-notification channel
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
    /// Show the sync cursor, channel expiry and mirror size
    Status,
    /// Authorize locsync against Google and print a refresh token
    Auth,
}

#[derive(Subcommand)]
enum ChannelAction {
    /// Create a new channel and store it
    Ensure,
    /// Replace the stored channel if it expires soon
    Renew,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Auth => commands::auth::run(&settings).await,
        Commands::Serve => commands::serve::run(settings).await,
        Commands::Sync { full } => commands::sync::run(settings, full).await,
        Commands::Reconcile { from, to } => {
            let range = DayRange::from_args(
                from.as_deref(),
                to.as_deref(),
                dates::today(),
                settings.app.future_horizon_days,
            )?;
            commands::reconcile::run(settings, range).await
        }
        Commands::Channel { action } => match action {
            ChannelAction::Ensure => commands::channel::ensure(settings).await,
            ChannelAction::Renew => commands::channel::renew(settings).await,
        },
        Commands::Status => commands::status::run(settings),
    }
}
