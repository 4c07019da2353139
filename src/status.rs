//! Snapshot of the service's sync state, shared by `locsync status` and `GET /status`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use locsync_core::state::SYNC_TOKEN_KEY;
use locsync_core::{Coordinator, EventMirror, SqliteStore, StateStore};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// First characters of the stored sync cursor
    pub cursor: Option<String>,
    pub channel: Option<ChannelStatus>,
    pub mirrored_events: usize,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn gather(store: &SqliteStore, coordinator: &Coordinator) -> Result<Self> {
        let cursor = StateStore::get(store, SYNC_TOKEN_KEY)?
            .filter(|c| !c.is_empty())
            .map(|c| c.chars().take(10).collect());

        let channel = coordinator.stored_channel().map(|c| ChannelStatus {
            id: c.id,
            expires_at: c.expires_at,
        });

        Ok(StatusReport {
            cursor,
            channel,
            mirrored_events: store.count()?,
        })
    }

    pub fn print(&self) {
        match &self.cursor {
            Some(cursor) => println!("Sync cursor:     {}…", cursor),
            None => println!("Sync cursor:     none (next sync is a full sync)"),
        }
        match &self.channel {
            Some(channel) => println!(
                "Webhook channel: {} (expires {})",
                channel.id,
                channel.expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            None => println!("Webhook channel: none"),
        }
        println!("Mirrored events: {}", self.mirrored_events);
    }
}
