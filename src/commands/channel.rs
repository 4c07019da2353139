use anyhow::Result;
use locsync_core::RenewalOutcome;

use crate::config::Settings;

pub async fn ensure(settings: Settings) -> Result<()> {
    let app = super::open(settings)?;

    let channel = app.coordinator.ensure_channel().await?;
    println!(
        "Created channel {} (expires {})",
        channel.id,
        channel.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

pub async fn renew(settings: Settings) -> Result<()> {
    let app = super::open(settings)?;

    match app.coordinator.renew_channel().await? {
        RenewalOutcome::Fresh(channel) => println!(
            "Channel {} is valid until {}, nothing to do",
            channel.id,
            channel.expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
        RenewalOutcome::Renewed { previous, current } => println!(
            "Replaced channel {} with {} (expires {})",
            previous.id,
            current.id,
            current.expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
        RenewalOutcome::Created(channel) => println!(
            "No channel was stored, created {} (expires {})",
            channel.id,
            channel.expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
    }
    Ok(())
}
