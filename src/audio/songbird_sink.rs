//! [`VoiceSink`] backed by songbird.
//!
//! Each guild gets its own sink; the songbird manager is shared. yt-dlp
//! handles are opened through `songbird::input::YoutubeDl`, plain HTTP audio
//! through `HttpRequest`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::CoreEvent,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::TrackHandle,
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

use super::sink::{SinkFactory, TrackEndNotifier, VoiceSink};
use crate::{error::TransportError, sources::StreamHandle};

type NotifierSlot = Arc<Mutex<Option<TrackEndNotifier>>>;

pub struct SongbirdSinkFactory {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdSinkFactory {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

impl SinkFactory for SongbirdSinkFactory {
    fn create(&self, guild_id: GuildId) -> Arc<dyn VoiceSink> {
        Arc::new(SongbirdSink {
            guild_id,
            manager: self.manager.clone(),
            http: self.http.clone(),
            track: Mutex::new(None),
            notifier: Arc::new(Mutex::new(None)),
            disconnect_hooked: AtomicBool::new(false),
        })
    }
}

pub struct SongbirdSink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    http: reqwest::Client,
    track: Mutex<Option<TrackHandle>>,
    // notifier of the stream currently playing, for driver-level disconnects
    notifier: NotifierSlot,
    disconnect_hooked: AtomicBool,
}

fn control_error(error: impl std::fmt::Display) -> TransportError {
    TransportError::Failed(error.to_string())
}

fn gain(volume: u16) -> f32 {
    f32::from(volume) / 100.0
}

impl SongbirdSink {
    fn current(&self) -> Option<TrackHandle> {
        self.track.lock().clone()
    }

    fn input_for(&self, stream: &StreamHandle) -> Input {
        match stream {
            StreamHandle::YtDlp(url) => YoutubeDl::new(self.http.clone(), url.clone()).into(),
            StreamHandle::Http(url) => HttpRequest::new(self.http.clone(), url.clone()).into(),
        }
    }
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    async fn connect(&self, channel: ChannelId) -> Result<(), TransportError> {
        let call = self.manager.join(self.guild_id, channel).await.map_err(|e| {
            error!(guild = %self.guild_id, "❌ Failed to join voice channel {}: {}", channel, e);
            control_error(e)
        })?;

        if !self.disconnect_hooked.swap(true, Ordering::SeqCst) {
            call.lock().await.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectReporter {
                    guild_id: self.guild_id,
                    slot: self.notifier.clone(),
                },
            );
        }

        info!(guild = %self.guild_id, "🔊 Joined voice channel {}", channel);
        Ok(())
    }

    async fn send_frames(
        &self,
        stream: &StreamHandle,
        volume: u16,
        notifier: TrackEndNotifier,
    ) -> Result<(), TransportError> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| TransportError::Failed("not connected to a voice channel".into()))?;

        let input = self.input_for(stream);
        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input)
        };

        handle.set_volume(gain(volume)).map_err(control_error)?;
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                StreamEndReporter {
                    notifier: notifier.clone(),
                },
            )
            .map_err(control_error)?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                StreamErrorReporter {
                    notifier: notifier.clone(),
                },
            )
            .map_err(control_error)?;

        debug!(guild = %self.guild_id, "▶️ Streaming {} (load {})", stream.url(), notifier.load_id());
        *self.track.lock() = Some(handle);
        *self.notifier.lock() = Some(notifier);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), TransportError> {
        let Some(handle) = self.current() else { return Ok(()) };
        if paused {
            handle.pause().map_err(control_error)
        } else {
            handle.play().map_err(control_error)
        }
    }

    async fn set_volume(&self, volume: u16) -> Result<(), TransportError> {
        match self.current() {
            Some(handle) => handle.set_volume(gain(volume)).map_err(control_error),
            None => Ok(()),
        }
    }

    async fn halt(&self) -> Result<(), TransportError> {
        self.notifier.lock().take();
        if let Some(handle) = self.track.lock().take() {
            // an already finished track rejects stop; nothing left to halt then
            if let Err(e) = handle.stop() {
                debug!(guild = %self.guild_id, "Stop on finished track: {}", e);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.halt().await?;
        if self.manager.get(self.guild_id).is_none() {
            return Ok(());
        }
        self.manager.remove(self.guild_id).await.map_err(control_error)?;
        info!(guild = %self.guild_id, "👋 Left voice channel");
        Ok(())
    }
}

struct StreamEndReporter {
    notifier: TrackEndNotifier,
}

#[async_trait]
impl VoiceEventHandler for StreamEndReporter {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.notifier.finished();
        None
    }
}

struct StreamErrorReporter {
    notifier: TrackEndNotifier,
}

#[async_trait]
impl VoiceEventHandler for StreamErrorReporter {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let detail = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _)| format!("{:?}", state.playing))
                .unwrap_or_else(|| "unknown".to_string()),
            _ => "unknown".to_string(),
        };
        self.notifier.failed(TransportError::Failed(format!("playback error: {}", detail)));
        None
    }
}

struct DisconnectReporter {
    guild_id: GuildId,
    slot: NotifierSlot,
}

#[async_trait]
impl VoiceEventHandler for DisconnectReporter {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        warn!(guild = %self.guild_id, "🔌 Voice driver disconnected");
        if let Some(notifier) = self.slot.lock().as_ref() {
            notifier.failed(TransportError::Disconnected);
        }
        None
    }
}
