//! Outbound notifications emitted by playback sessions.
//!
//! Every session of a registry writes into the same unbounded channel; each
//! event is tagged with its guild. Events of one session arrive in the order
//! the session applied the operations that produced them.

use serenity::model::id::GuildId;
use std::fmt;
use tokio::sync::mpsc;
use tracing::trace;

use super::votes::VoteAction;
use crate::sources::Track;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub guild_id: GuildId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    TrackStarted {
        track: Track,
    },
    /// `track` is `None` when a query failed to resolve before any track existed.
    TrackEnded {
        track: Option<Track>,
        reason: TrackEndReason,
    },
    QueueChanged {
        len: usize,
    },
    VoteRegistered {
        action: VoteAction,
        current: usize,
        required: usize,
    },
    VoteResolved {
        action: VoteAction,
        outcome: VoteResolution,
    },
    SessionTerminated {
        reason: TerminationReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    Skipped,
    Stopped,
    LoadFailed(String),
    TransportFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResolution {
    Passed,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Explicit `destroy` from the command layer.
    Requested,
    IdleTimeout,
    Alone,
    TransportLost,
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationReason::Requested => "requested",
            TerminationReason::IdleTimeout => "idle timeout",
            TerminationReason::Alone => "left alone",
            TerminationReason::TransportLost => "voice connection lost",
            TerminationReason::Shutdown => "shutdown",
        })
    }
}

/// Sending half shared by the sessions of one registry.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

impl EventSender {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event; a dropped receiver just means nobody is listening.
    pub fn emit(&self, guild_id: GuildId, kind: SessionEventKind) {
        trace!(guild = %guild_id, "📣 {:?}", kind);
        let _ = self.tx.send(SessionEvent { guild_id, kind });
    }
}
