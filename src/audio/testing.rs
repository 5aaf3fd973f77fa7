//! In-memory collaborators for session and registry tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};

use super::sink::{ChannelPresence, TrackEndNotifier, VoiceSink};
use crate::{
    cache::ResolutionCache,
    error::{ResolutionError, TransportError},
    sources::{resolver::ResolverLimits, MusicSource, StreamHandle, TrackInfo, TrackResolver},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Connect(ChannelId),
    Play(String),
    Paused(bool),
    Volume(u16),
    Halt,
    Disconnect,
}

/// Records every call; streams whose URL mentions "broken" fail to start.
#[derive(Default)]
pub struct FakeSink {
    calls: Mutex<Vec<SinkCall>>,
    current: Mutex<Option<TrackEndNotifier>>,
}

impl FakeSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Ends the most recently started stream normally.
    pub fn finish_current(&self) {
        if let Some(notifier) = self.current.lock().as_ref() {
            notifier.finished();
        }
    }

    pub fn fail_current(&self, error: TransportError) {
        if let Some(notifier) = self.current.lock().as_ref() {
            notifier.failed(error);
        }
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl VoiceSink for FakeSink {
    async fn connect(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.record(SinkCall::Connect(channel));
        Ok(())
    }

    async fn send_frames(
        &self,
        stream: &StreamHandle,
        _volume: u16,
        notifier: TrackEndNotifier,
    ) -> Result<(), TransportError> {
        self.record(SinkCall::Play(stream.url().to_string()));
        if stream.url().contains("broken") {
            return Err(TransportError::Failed("unreadable stream".into()));
        }
        *self.current.lock() = Some(notifier);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), TransportError> {
        self.record(SinkCall::Paused(paused));
        Ok(())
    }

    async fn set_volume(&self, volume: u16) -> Result<(), TransportError> {
        self.record(SinkCall::Volume(volume));
        Ok(())
    }

    async fn halt(&self) -> Result<(), TransportError> {
        self.record(SinkCall::Halt);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(SinkCall::Disconnect);
        Ok(())
    }
}

pub struct FakePresence {
    listeners: Mutex<Option<usize>>,
}

impl FakePresence {
    pub fn new(listeners: Option<usize>) -> Self {
        Self {
            listeners: Mutex::new(listeners),
        }
    }

    pub fn set(&self, listeners: Option<usize>) {
        *self.listeners.lock() = listeners;
    }
}

impl ChannelPresence for FakePresence {
    fn listeners(&self, _guild_id: GuildId) -> Option<usize> {
        *self.listeners.lock()
    }
}

/// Search backend whose only result is the query itself.
///
/// Queries starting with "missing" match nothing and queries mentioning
/// "slow" take a minute to answer.
struct EchoSource;

#[async_trait]
impl MusicSource for EchoSource {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        if query.starts_with("missing") {
            return Ok(Vec::new());
        }
        if query.contains("slow") {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let uri = format!("https://echo.example/{}", query.replace(' ', "-"));
        Ok(vec![TrackInfo::new(query, uri.clone(), StreamHandle::Http(uri))
            .with_duration(Duration::from_secs(180))])
    }

    async fn get_track(&self, _url: &str) -> Result<TrackInfo, ResolutionError> {
        Err(ResolutionError::NotFound)
    }

    async fn get_playlist(&self, _url: &str, _limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        Err(ResolutionError::NotFound)
    }

    fn is_valid_url(&self, _url: &str) -> bool {
        false
    }

    fn is_playlist_url(&self, _url: &str) -> bool {
        false
    }

    fn source_name(&self) -> &'static str {
        "echo"
    }
}

/// Resolver over [`EchoSource`] with a timeout longer than the slow path.
pub fn resolver() -> Arc<TrackResolver> {
    let limits = ResolverLimits {
        timeout: Duration::from_secs(600),
        ..ResolverLimits::default()
    };
    Arc::new(TrackResolver::new(
        vec![Arc::new(EchoSource)],
        ResolutionCache::new(64, None),
        limits,
    ))
}
