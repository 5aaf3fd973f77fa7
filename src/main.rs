use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use guild_jukebox::{
    audio::{songbird_sink::SongbirdSinkFactory, EngineDeps, SessionRegistry},
    bot::{CachePresence, JukeboxBot},
    cache::ResolutionCache,
    config::Config,
    sources::{DirectUrlClient, MusicSource, TrackResolver, YouTubeClient},
    storage::JsonStorage,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("⚙️ {}", config.summary());

    // Per-guild settings, falling back to the environment defaults
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone(), config.playback_defaults()).await?);

    let sources: Vec<Arc<dyn MusicSource>> = vec![
        Arc::new(YouTubeClient::new()),
        Arc::new(DirectUrlClient::new(config.resolve_timeout)),
    ];
    let resolver = Arc::new(TrackResolver::new(
        sources,
        ResolutionCache::new(config.cache_size, Some(config.cache_ttl)),
        config.resolver_limits(),
    ));

    let songbird = Songbird::serenity();
    let presence = Arc::new(CachePresence::new());

    let (registry, events) = SessionRegistry::new(EngineDeps {
        resolver,
        settings: storage,
        sinks: Arc::new(SongbirdSinkFactory::new(songbird.clone(), reqwest::Client::new())),
        presence: presence.clone(),
        idle_check_interval: config.idle_check_interval,
    });
    let registry = Arc::new(registry);

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), registry.clone());
    let announcer = handler.announcer();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    presence.attach(client.cache.clone());
    announcer.spawn(client.http.clone(), events);

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing sessions...");
        registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("❌ Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("missing yt-dlp or ffmpeg");
    }
}
