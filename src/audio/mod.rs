//! # Audio Module
//!
//! The per-guild playback engine.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`PlaybackSession`](session) per guild, created on first use
//! - Sessions deregister themselves when they end
//!
//! ### [`session`] - Playback Session
//! - Actor task owning queue, state, volume, repeat mode and votes
//! - Resolution and stream start run beside the actor and re-enter its mailbox
//!
//! ### [`queue`] / [`votes`] / [`idle`]
//! - Ordered track queue with repeat and shuffle
//! - Crowd votes for skip, shuffle and clear
//! - Watchdog ending sessions that are alone or idle
//!
//! ### [`sink`] / [`songbird_sink`]
//! - Voice output contract and its songbird implementation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use guild_jukebox::audio::registry::SessionRegistry;
//! # use serenity::all::{GuildId, UserId};
//! # async fn example(registry: &SessionRegistry) -> anyhow::Result<()> {
//! let session = registry.get_or_create(GuildId::new(123456789)).await;
//!
//! session.play("daft punk one more time", UserId::new(42)).await?;
//! session.pause().await?;
//! session.resume().await?;
//! session.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod idle;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;
pub mod songbird_sink;
pub mod votes;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{SessionEvent, SessionEventKind, TerminationReason, TrackEndReason, VoteResolution};
pub use queue::RepeatMode;
pub use registry::{EngineDeps, SessionRegistry};
pub use session::{PlayOutcome, PlaybackState, QueueSnapshot, SessionHandle};
pub use votes::{VoteAction, VoteOutcome, VoteStatus};
