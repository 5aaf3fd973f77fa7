use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

use crate::{
    audio::queue::RepeatMode,
    settings::{GuildPlaybackConfig, VOLUME_CEILING},
    sources::resolver::ResolverLimits,
};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // dev guild for instant command registration

    // Guild playback defaults
    pub default_volume: u16,
    pub max_volume: u16,
    pub vote_threshold_ratio: f64,
    pub vote_timeout: Duration,
    pub idle_alone_timeout: Duration,
    pub idle_empty_queue_timeout: Duration,
    pub default_repeat_mode: RepeatMode,
    pub max_queue_size: usize,

    // Engine
    pub idle_check_interval: Duration,
    pub resolve_timeout: Duration,
    pub search_limit: usize,
    pub max_playlist_size: usize,
    pub song_chooser_timeout: Duration, // how long `/search` results stay pickable

    // Resolution cache
    pub cache_size: usize,
    pub cache_ttl: Duration,

    // Paths
    pub data_dir: PathBuf,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{}: {}", key, e))
}

/// Durations in humantime syntax: `30s`, `5m`, `1h 30m`.
fn env_duration(key: &str, default: &str) -> Result<Duration> {
    humantime::parse_duration(env_or(key, default).trim()).with_context(|| format!("{} is not a valid duration", key))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()
                .context("APPLICATION_ID must be numeric")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Guild playback defaults
            default_volume: env_parse("DEFAULT_VOLUME", "100")?,
            max_volume: env_parse("MAX_VOLUME", "150")?,
            vote_threshold_ratio: env_parse("VOTE_THRESHOLD_RATIO", "0.5")?,
            vote_timeout: env_duration("VOTE_TIMEOUT", "30s")?,
            idle_alone_timeout: env_duration("IDLE_ALONE_TIMEOUT", "2m")?,
            idle_empty_queue_timeout: env_duration("IDLE_EMPTY_QUEUE_TIMEOUT", "5m")?,
            default_repeat_mode: env_parse("DEFAULT_REPEAT_MODE", "off")?,
            max_queue_size: env_parse("MAX_QUEUE_SIZE", "1000")?,

            // Engine
            idle_check_interval: env_duration("IDLE_CHECK_INTERVAL", "15s")?,
            resolve_timeout: env_duration("RESOLVE_TIMEOUT", "20s")?,
            search_limit: env_parse("SEARCH_LIMIT", "5")?,
            max_playlist_size: env_parse("MAX_PLAYLIST_SIZE", "100")?,
            song_chooser_timeout: env_duration("SONG_CHOOSER_TIMEOUT", "60s")?,

            // Resolution cache
            cache_size: env_parse("CACHE_SIZE", "500")?,
            cache_ttl: env_duration("CACHE_TTL", "1h")?,

            // Paths
            data_dir: env_or("DATA_DIR", "./data").into(),
        };

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_volume == 0 || self.max_volume > VOLUME_CEILING {
            anyhow::bail!("Max volume must be between 1 and {}, got: {}", VOLUME_CEILING, self.max_volume);
        }

        if self.default_volume > self.max_volume {
            anyhow::bail!(
                "Default volume {} exceeds max volume {}",
                self.default_volume,
                self.max_volume
            );
        }

        if !(self.vote_threshold_ratio > 0.0 && self.vote_threshold_ratio <= 1.0) {
            anyhow::bail!("Vote threshold ratio must be in (0, 1], got: {}", self.vote_threshold_ratio);
        }

        for (name, value) in [
            ("Vote timeout", self.vote_timeout),
            ("Idle check interval", self.idle_check_interval),
            ("Resolve timeout", self.resolve_timeout),
            ("Song chooser timeout", self.song_chooser_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.search_limit == 0 || self.max_playlist_size == 0 {
            anyhow::bail!("Search limit and max playlist size must be greater than 0");
        }

        Ok(())
    }

    /// Settings new guilds start with.
    pub fn playback_defaults(&self) -> GuildPlaybackConfig {
        GuildPlaybackConfig {
            max_volume: self.max_volume,
            default_volume: self.default_volume,
            vote_threshold_ratio: self.vote_threshold_ratio,
            vote_timeout: self.vote_timeout,
            idle_alone_timeout: self.idle_alone_timeout,
            idle_empty_queue_timeout: self.idle_empty_queue_timeout,
            default_repeat_mode: self.default_repeat_mode,
            max_queue_size: self.max_queue_size,
            dj_role_id: None,
        }
    }

    pub fn resolver_limits(&self) -> ResolverLimits {
        ResolverLimits {
            timeout: self.resolve_timeout,
            max_playlist_size: self.max_playlist_size,
            search_limit: self.search_limit,
        }
    }

    /// Returns a summary of the current configuration for logging, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol (max {}%), {} queue, repeat {}\n  \
            Votes: {:.0}% of listeners, {} timeout\n  \
            Idle: alone {}, empty {}, checked every {}\n  \
            Resolver: {} timeout, {} results ({} to pick), {} playlist entries\n  \
            Cache: {} entries, {} TTL",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_volume,
            self.max_queue_size,
            self.default_repeat_mode,
            self.vote_threshold_ratio * 100.0,
            humantime::format_duration(self.vote_timeout),
            humantime::format_duration(self.idle_alone_timeout),
            humantime::format_duration(self.idle_empty_queue_timeout),
            humantime::format_duration(self.idle_check_interval),
            humantime::format_duration(self.resolve_timeout),
            self.search_limit,
            humantime::format_duration(self.song_chooser_timeout),
            self.max_playlist_size,
            self.cache_size,
            humantime::format_duration(self.cache_ttl),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let playback = GuildPlaybackConfig::default();
        let limits = ResolverLimits::default();

        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: playback.default_volume,
            max_volume: playback.max_volume,
            vote_threshold_ratio: playback.vote_threshold_ratio,
            vote_timeout: playback.vote_timeout,
            idle_alone_timeout: playback.idle_alone_timeout,
            idle_empty_queue_timeout: playback.idle_empty_queue_timeout,
            default_repeat_mode: playback.default_repeat_mode,
            max_queue_size: playback.max_queue_size,

            idle_check_interval: Duration::from_secs(15),
            resolve_timeout: limits.timeout,
            search_limit: limits.search_limit,
            max_playlist_size: limits.max_playlist_size,
            song_chooser_timeout: Duration::from_secs(60),

            cache_size: 500,
            cache_ttl: Duration::from_secs(3600),

            data_dir: "./data".into(),
        }
    }
}
