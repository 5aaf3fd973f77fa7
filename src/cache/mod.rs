//! # Cache Module
//!
//! Resolution cache for the track resolver.
//!
//! Resolving a query means spawning yt-dlp or probing a remote server, both
//! of which take seconds. Popular queries repeat a lot across guilds, so the
//! resolver keeps the requester-independent result of each successful
//! resolution for a while.
//!
//! ## Configuration
//!
//! ```env
//! CACHE_SIZE=500     # maximum number of cached queries
//! CACHE_TTL=1h       # how long a resolution stays valid
//! ```

pub mod lru_cache;

use tracing::info;

pub use lru_cache::{CacheMetrics, LRUCache};

use crate::sources::TrackInfo;

/// Requester-independent outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedResolution {
    Single(TrackInfo),
    Playlist(Vec<TrackInfo>),
}

/// Cache keyed by normalized query text.
pub type ResolutionCache = LRUCache<String, CachedResolution>;

impl ResolutionCache {
    /// Periodic maintenance hook; drops expired entries and logs the count.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}
