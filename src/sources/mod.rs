//! # Sources Module
//!
//! Track resolution for the playback engine.
//!
//! A [`MusicSource`] knows how to search one backend and how to fetch tracks
//! from URLs it recognises. The [`TrackResolver`](resolver::TrackResolver)
//! sits in front of all registered sources and turns a raw user query into
//! one or many [`Track`]s:
//!
//! - absolute `http(s)` URLs are fetched directly from the first source that
//!   accepts them (playlist URLs expand to many tracks)
//! - anything else is a search phrase; the best (first) match wins
//!
//! Sources return [`TrackInfo`] (metadata plus an opaque [`StreamHandle`]);
//! the resolver stamps the requester on top to build the immutable [`Track`]
//! values that flow through queues.

pub mod direct_url;
pub mod resolver;
pub mod youtube;

use async_trait::async_trait;
use serenity::model::id::UserId;
use std::{fmt, sync::Arc, time::Duration};

use crate::error::ResolutionError;

pub use direct_url::DirectUrlClient;
pub use resolver::{Resolution, TrackResolver};
pub use youtube::YouTubeClient;

/// Common contract for every audio backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Ranked candidates for a free-text query, best match first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>, ResolutionError>;

    /// Metadata for a single URL this source accepts.
    async fn get_track(&self, url: &str) -> Result<TrackInfo, ResolutionError>;

    /// Entries of a playlist URL, in playlist order.
    async fn get_playlist(&self, url: &str, limit: usize) -> Result<Vec<TrackInfo>, ResolutionError>;

    fn is_valid_url(&self, url: &str) -> bool;

    fn is_playlist_url(&self, url: &str) -> bool;

    fn source_name(&self) -> &'static str;
}

/// How the voice sink should open the audio for a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamHandle {
    /// Page URL handed to yt-dlp at play time.
    YtDlp(String),
    /// Plain HTTP(S) audio resource.
    Http(String),
}

impl StreamHandle {
    pub fn url(&self) -> &str {
        match self {
            StreamHandle::YtDlp(url) | StreamHandle::Http(url) => url,
        }
    }
}

/// Requester-independent track metadata, as returned by a [`MusicSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub uri: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub stream: StreamHandle,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, uri: impl Into<String>, stream: StreamHandle) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
            artist: None,
            duration: None,
            thumbnail: None,
            stream,
        }
    }

    pub fn with_artist(mut self, artist: String) -> Self {
        self.artist = Some(artist);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

/// An immutable, requested track.
///
/// Cloning is cheap: the metadata lives behind an [`Arc`], so queues and
/// snapshots can hand copies around freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    info: Arc<TrackInfo>,
    requested_by: UserId,
}

impl Track {
    pub fn new(info: TrackInfo, requested_by: UserId) -> Self {
        Self {
            info: Arc::new(info),
            requested_by,
        }
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }
    pub fn uri(&self) -> &str {
        &self.info.uri
    }
    pub fn artist(&self) -> Option<&str> {
        self.info.artist.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.info.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.info.thumbnail.as_deref()
    }
    pub fn stream(&self) -> &StreamHandle {
        &self.info.stream
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.artist() {
            Some(artist) => write!(f, "{} - {}", artist, self.title()),
            None => f.write_str(self.title()),
        }
    }
}
