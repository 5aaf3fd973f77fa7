//! Per-guild playback settings as seen by the engine.
//!
//! The engine only ever reads these, once, when a guild's session is created.
//! Where they come from (JSON files, a constant) is up to the
//! [`SettingsSource`] handed to the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, RoleId};
use std::time::Duration;

use crate::audio::queue::RepeatMode;

/// Hard ceiling for any guild's volume, in percent.
pub const VOLUME_CEILING: u16 = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildPlaybackConfig {
    pub max_volume: u16,
    pub default_volume: u16,
    /// Share of listeners whose vote passes a crowd vote.
    pub vote_threshold_ratio: f64,
    #[serde(with = "humantime_format")]
    pub vote_timeout: Duration,
    #[serde(with = "humantime_format")]
    pub idle_alone_timeout: Duration,
    #[serde(with = "humantime_format")]
    pub idle_empty_queue_timeout: Duration,
    pub default_repeat_mode: RepeatMode,
    pub max_queue_size: usize,
    /// Only read by the command layer.
    pub dj_role_id: Option<RoleId>,
}

impl Default for GuildPlaybackConfig {
    fn default() -> Self {
        Self {
            max_volume: VOLUME_CEILING,
            default_volume: 100,
            vote_threshold_ratio: 0.5,
            vote_timeout: Duration::from_secs(30),
            idle_alone_timeout: Duration::from_secs(120),
            idle_empty_queue_timeout: Duration::from_secs(300),
            default_repeat_mode: RepeatMode::Off,
            max_queue_size: 1000,
            dj_role_id: None,
        }
    }
}

impl GuildPlaybackConfig {
    /// Highest volume a session may be set to.
    pub fn volume_limit(&self) -> u16 {
        self.max_volume.min(VOLUME_CEILING)
    }

    /// Default volume clamped into the allowed range.
    pub fn initial_volume(&self) -> u16 {
        self.default_volume.min(self.volume_limit())
    }
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Settings for a guild; sources fall back to defaults rather than fail.
    async fn guild_playback_config(&self, guild_id: GuildId) -> GuildPlaybackConfig;
}

/// Same settings for every guild.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub GuildPlaybackConfig);

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn guild_playback_config(&self, _guild_id: GuildId) -> GuildPlaybackConfig {
        self.0.clone()
    }
}

/// `"30s"` / `"5m"` style durations in JSON.
mod humantime_format {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
