use dashmap::DashMap;
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    audio::{events::EventReceiver, SessionEvent, SessionEventKind},
    ui::embeds,
};

/// Posts engine events to the text channel each guild last used.
pub struct Announcer {
    channels: Arc<DashMap<GuildId, ChannelId>>,
}

impl Announcer {
    pub(super) fn new(channels: Arc<DashMap<GuildId, ChannelId>>) -> Self {
        Self { channels }
    }

    pub fn spawn(self, http: Arc<Http>, mut events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.announce(&http, event).await;
            }
            debug!("📪 Event stream closed");
        })
    }

    async fn announce(&self, http: &Http, event: SessionEvent) {
        let channel = match event.kind {
            SessionEventKind::SessionTerminated { .. } => {
                self.channels.remove(&event.guild_id).map(|(_, channel)| channel)
            }
            _ => self.channels.get(&event.guild_id).map(|entry| *entry),
        };

        let (Some(channel), Some(embed)) = (channel, embeds::create_event_embed(&event.kind)) else {
            return;
        };

        if let Err(e) = channel
            .send_message(http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(guild = %event.guild_id, "⚠️ Could not post announcement: {}", e);
        }
    }
}
