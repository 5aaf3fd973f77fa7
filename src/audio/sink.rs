//! Contracts between a playback session and the outside world: the voice
//! transport it plays into and the channel membership it observes.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::session::Command;
use crate::{error::TransportError, sources::StreamHandle};

/// Audio output for one guild.
///
/// `send_frames` replaces whatever was playing before. Per-track failures are
/// reported as [`TransportError::Failed`]; [`TransportError::Disconnected`] is
/// permanent and ends the session.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    async fn connect(&self, channel: ChannelId) -> Result<(), TransportError>;

    /// Starts streaming; `volume` is a percentage (100 = unity gain).
    async fn send_frames(
        &self,
        stream: &StreamHandle,
        volume: u16,
        notifier: TrackEndNotifier,
    ) -> Result<(), TransportError>;

    async fn set_paused(&self, paused: bool) -> Result<(), TransportError>;

    async fn set_volume(&self, volume: u16) -> Result<(), TransportError>;

    /// Stops the current stream, if any. Stays connected.
    async fn halt(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Builds the sink for a freshly created session.
pub trait SinkFactory: Send + Sync {
    fn create(&self, guild_id: GuildId) -> Arc<dyn VoiceSink>;
}

impl<F> SinkFactory for F
where
    F: Fn(GuildId) -> Arc<dyn VoiceSink> + Send + Sync,
{
    fn create(&self, guild_id: GuildId) -> Arc<dyn VoiceSink> {
        self(guild_id)
    }
}

/// Who is listening alongside the bot.
pub trait ChannelPresence: Send + Sync {
    /// Non-bot members in the bot's current voice channel, `None` when the
    /// bot is not in a channel of this guild.
    fn listeners(&self, guild_id: GuildId) -> Option<usize>;
}

/// Handed to the sink with every stream so it can report how the stream ended.
///
/// Reports carry the load they belong to; the session ignores reports for
/// streams it already replaced or halted.
#[derive(Clone)]
pub struct TrackEndNotifier {
    mailbox: mpsc::UnboundedSender<Command>,
    load_id: u64,
}

impl TrackEndNotifier {
    pub(crate) fn new(mailbox: mpsc::UnboundedSender<Command>, load_id: u64) -> Self {
        Self { mailbox, load_id }
    }

    pub fn load_id(&self) -> u64 {
        self.load_id
    }

    /// The stream played to its end.
    pub fn finished(&self) {
        self.report(Ok(()));
    }

    pub fn failed(&self, error: TransportError) {
        self.report(Err(error));
    }

    fn report(&self, result: Result<(), TransportError>) {
        let load_id = self.load_id;
        if self.mailbox.send(Command::StreamEnded { load_id, result }).is_err() {
            debug!("Stream end for load {} arrived after the session closed", load_id);
        }
    }
}

impl std::fmt::Debug for TrackEndNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEndNotifier").field("load_id", &self.load_id).finish()
    }
}
