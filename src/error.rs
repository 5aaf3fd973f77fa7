//! Error taxonomy for the playback engine.
//!
//! Every engine operation returns one of these typed errors so the command
//! layer can decide how to word the reply. Application edges (config, storage,
//! `main`, command handlers) keep using [`anyhow`].

use thiserror::Error;

/// Failure to turn a query into playable tracks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no track matched the query")]
    NotFound,
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Operation not valid in the current playback state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("nothing is playing")]
    NotPlaying,
    #[error("playback is not paused")]
    NotPaused,
    #[error("a track is still loading")]
    AlreadyLoading,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BoundsError {
    #[error("volume {requested} outside 0..={max}")]
    VolumeOutOfBounds { requested: u16, max: u16 },
    #[error("queue position {position} outside 0..{len}")]
    QueueIndexOutOfBounds { position: usize, len: usize },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("the queue is empty")]
    Empty,
    #[error("the queue is full (max {0} tracks)")]
    Full(usize),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("this member already voted")]
    AlreadyVoted,
    #[error("no vote in progress for this action")]
    NoActiveVote,
}

/// Errors raised by the voice sink.
///
/// `Disconnected` is permanent and ends the session; `Failed` only affects the
/// current track.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("voice connection lost")]
    Disconnected,
    #[error("voice transport failed: {0}")]
    Failed(String),
}

/// Umbrella error returned by [`SessionHandle`](crate::audio::session::SessionHandle) operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Bounds(#[from] BoundsError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The session was torn down before the operation could run.
    #[error("the playback session has ended")]
    Terminated,
    /// A pending load was discarded because the session was stopped meanwhile.
    #[error("the request was cancelled by a stop")]
    Cancelled,
}

pub type SessionResult<T> = Result<T, SessionError>;
