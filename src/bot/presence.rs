use serenity::{cache::Cache, model::id::GuildId};
use std::sync::{Arc, OnceLock};

use crate::audio::sink::ChannelPresence;

/// Listener counts read from the gateway cache.
///
/// The cache only exists once the client is built, so it is attached
/// afterwards; until then every guild reads as unknown.
#[derive(Default)]
pub struct CachePresence {
    cache: OnceLock<Arc<Cache>>,
}

impl CachePresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<Cache>) {
        let _ = self.cache.set(cache);
    }
}

impl ChannelPresence for CachePresence {
    fn listeners(&self, guild_id: GuildId) -> Option<usize> {
        let cache = self.cache.get()?;
        let bot_id = cache.current_user().id;
        let guild = cache.guild(guild_id)?;
        let channel = guild.voice_states.get(&bot_id)?.channel_id?;

        let listeners = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
            .filter(|state| {
                let is_bot = state
                    .member
                    .as_ref()
                    .map(|member| member.user.bot)
                    .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .count();

        Some(listeners)
    }
}
