//! # Bot Module
//!
//! Discord front end for the playback engine.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]: it registers the
//! slash commands, turns interactions into [`SessionHandle`](crate::audio::SessionHandle)
//! calls, and forwards voice state changes so idle detection reacts
//! promptly. Engine events are posted back to chat by the [`Announcer`].
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use guild_jukebox::{audio::SessionRegistry, bot::JukeboxBot, config::Config};
//! # fn example(config: Config, registry: Arc<SessionRegistry>) {
//! let bot = JukeboxBot::new(config, registry);
//! # }
//! ```

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{error, info, warn};

mod announcer;
pub mod commands;
pub mod handlers;
mod presence;
pub mod search;

pub use announcer::Announcer;
pub use presence::CachePresence;

use crate::{
    audio::{SessionRegistry, TerminationReason},
    config::Config,
    sources::resolver::TrackResolver,
};
use search::PendingSearches;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct JukeboxBot {
    config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Results of each member's last `/search`, waiting for a pick
    pub(crate) pending_searches: Arc<PendingSearches>,
    /// Where announcements go, per guild
    text_channels: Arc<DashMap<GuildId, ChannelId>>,
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(config: Config, registry: Arc<SessionRegistry>) -> Self {
        Self {
            pending_searches: Arc::new(PendingSearches::new(config.song_chooser_timeout)),
            config: Arc::new(config),
            registry,
            text_channels: Arc::new(DashMap::new()),
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Announcer posting to the channels this bot has seen commands in.
    pub fn announcer(&self) -> Announcer {
        Announcer::new(self.text_channels.clone())
    }

    pub(crate) fn remember_text_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.text_channels.insert(guild_id, channel_id);
    }

    /// Registers slash commands, per guild when a development guild is
    /// configured (instant) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!(guild = %guild_id, "⚠️ Bot is not a member of the development guild");
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    anyhow::anyhow!("could not register guild commands (missing applications.commands?): {}", e)
                })?;
                info!(guild = %guild_id, "✅ Guild commands registered");
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    anyhow::anyhow!("could not register global commands: {}", e)
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ {:?}", e);
        }

        // ready fires again after every reconnect
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let resolver = self.registry.resolver().clone();
            let registry = self.registry.clone();
            let searches = self.pending_searches.clone();
            tokio::spawn(async move {
                maintenance_tasks(resolver, registry, searches).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("❌ Command failed: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("❌ Component failed: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Someone joined or left a voice channel. Idle detection is nudged for
    /// the guild; if the bot itself was disconnected the session ends.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id && old.is_some() && new.channel_id.is_none() {
            if let Some(session) = self.registry.get(guild_id) {
                info!(guild = %guild_id, "🔌 Disconnected from voice");
                session.terminate(TerminationReason::TransportLost).await;
            }
            return;
        }

        self.registry.notify_voice_update(guild_id);
    }
}

/// Hourly housekeeping: prunes expired resolution cache entries and search
/// results nobody picked from.
async fn maintenance_tasks(
    resolver: Arc<TrackResolver>,
    registry: Arc<SessionRegistry>,
    searches: Arc<PendingSearches>,
) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        resolver.cache().cleanup_old_entries();
        let stale = searches.prune();
        info!(
            "🧹 Maintenance done, {} active sessions, {} stale searches dropped",
            registry.len(),
            stale
        );
    }
}
