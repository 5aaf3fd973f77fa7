use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::HashMap, io::ErrorKind, path::PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

use crate::settings::{GuildPlaybackConfig, SettingsSource};

/// On-disk shape of `servers/guild_<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredGuild {
    guild_id: u64,
    #[serde(flatten)]
    playback: GuildPlaybackConfig,
}

/// Per-guild playback settings kept as JSON files, cached in memory.
pub struct JsonStorage {
    data_dir: PathBuf,
    defaults: GuildPlaybackConfig,
    cache: Mutex<HashMap<GuildId, GuildPlaybackConfig>>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, defaults: GuildPlaybackConfig) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir)
            .await
            .with_context(|| format!("cannot create {}", servers_dir.display()))?;

        info!("📁 Storage initialised at {}", data_dir.display());

        let storage = Self {
            data_dir,
            defaults,
            cache: Mutex::new(HashMap::new()),
        };
        storage.load_all_servers().await?;

        Ok(storage)
    }

    /// Settings of a guild; first access writes the defaults to disk.
    ///
    /// An unreadable file is left in place and the defaults are served from
    /// memory, so a hand edit with a typo is never overwritten.
    pub async fn get(&self, guild_id: GuildId) -> Result<GuildPlaybackConfig> {
        let mut cache = self.cache.lock().await;
        if let Some(config) = cache.get(&guild_id) {
            return Ok(config.clone());
        }

        let config = match self.load_server_config(guild_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                let config = self.defaults.clone();
                self.save_server_config(guild_id, &config).await?;
                info!("📝 Default settings created for guild {}", guild_id);
                config
            }
            Err(e) => {
                warn!("⚠️ Unreadable settings for guild {}, using defaults: {:#}", guild_id, e);
                self.defaults.clone()
            }
        };

        cache.insert(guild_id, config.clone());
        Ok(config)
    }

    /// `Ok(None)` when the guild has no file yet.
    async fn load_server_config(&self, guild_id: GuildId) -> Result<Option<GuildPlaybackConfig>> {
        let content = match fs::read_to_string(self.server_file_path(guild_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredGuild = serde_json::from_str(&content)?;
        Ok(Some(stored.playback))
    }

    async fn save_server_config(&self, guild_id: GuildId, config: &GuildPlaybackConfig) -> Result<()> {
        let stored = StoredGuild {
            guild_id: guild_id.get(),
            playback: config.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;
        fs::write(self.server_file_path(guild_id), content)
            .await
            .with_context(|| format!("cannot write settings for guild {}", guild_id))?;
        Ok(())
    }

    async fn load_all_servers(&self) -> Result<()> {
        let mut files = fs::read_dir(self.data_dir.join("servers")).await?;
        let mut cache = self.cache.lock().await;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
                .filter(|id| *id != 0)
                .map(GuildId::new)
            else {
                continue;
            };

            match self.load_server_config(guild_id).await {
                Ok(Some(config)) => {
                    cache.insert(guild_id, config);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load settings for guild {}: {}", guild_id, e),
            }
        }

        if !cache.is_empty() {
            info!("📂 Loaded settings for {} guilds", cache.len());
        }
        Ok(())
    }

    fn server_file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir.join("servers").join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl SettingsSource for JsonStorage {
    async fn guild_playback_config(&self, guild_id: GuildId) -> GuildPlaybackConfig {
        match self.get(guild_id).await {
            Ok(config) => config,
            Err(e) => {
                warn!("⚠️ Settings unavailable for guild {}, using defaults: {:#}", guild_id, e);
                self.defaults.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guild-jukebox-{}", rand::random::<u64>()))
    }

    #[tokio::test]
    async fn first_access_writes_defaults() {
        let dir = scratch_dir();
        let defaults = GuildPlaybackConfig {
            default_volume: 80,
            ..GuildPlaybackConfig::default()
        };
        let storage = JsonStorage::new(dir.clone(), defaults.clone()).await.unwrap();

        let config = storage.guild_playback_config(GuildId::new(5)).await;

        assert_eq!(config, defaults);
        assert!(dir.join("servers/guild_5.json").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn saved_settings_are_loaded_at_startup() {
        let dir = scratch_dir();
        let storage = JsonStorage::new(dir.clone(), GuildPlaybackConfig::default()).await.unwrap();
        let custom = GuildPlaybackConfig {
            max_volume: 90,
            vote_timeout: Duration::from_secs(20),
            ..GuildPlaybackConfig::default()
        };
        storage.save_server_config(GuildId::new(8), &custom).await.unwrap();

        let reloaded = JsonStorage::new(dir.clone(), GuildPlaybackConfig::default()).await.unwrap();

        assert_eq!(reloaded.cache.lock().await.get(&GuildId::new(8)), Some(&custom));
        assert_eq!(reloaded.get(GuildId::new(8)).await.unwrap(), custom);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = scratch_dir();
        std::fs::create_dir_all(dir.join("servers")).unwrap();
        std::fs::write(dir.join("servers/guild_3.json"), "{ not json").unwrap();
        let storage = JsonStorage::new(dir.clone(), GuildPlaybackConfig::default()).await.unwrap();

        let config = storage.guild_playback_config(GuildId::new(3)).await;

        assert_eq!(config, GuildPlaybackConfig::default());
        assert_eq!(
            std::fs::read_to_string(dir.join("servers/guild_3.json")).unwrap(),
            "{ not json"
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
