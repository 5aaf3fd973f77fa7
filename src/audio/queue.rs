use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::{HashSet, VecDeque}, fmt, str::FromStr};
use tracing::{debug, info};

use crate::{
    error::{BoundsError, QueueError},
    sources::Track,
};

/// What happens when the current track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepeatMode::Off => "off",
            RepeatMode::Track => "track",
            RepeatMode::Queue => "queue",
        })
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" => Ok(RepeatMode::Off),
            "track" | "song" => Ok(RepeatMode::Track),
            "queue" | "all" => Ok(RepeatMode::Queue),
            other => Err(format!("unknown repeat mode '{}'", other)),
        }
    }
}

/// A queued track plus its insertion metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub track: Track,
    /// Monotonic insertion number, unique within one queue.
    pub seq: u64,
    pub added_at: DateTime<Utc>,
}

/// Ordered upcoming tracks of one session.
///
/// The currently playing track is never stored here; the session keeps it and
/// hands it back to [`TrackQueue::dequeue_next`] when it finishes. Positions
/// are zero-based.
#[derive(Debug)]
pub struct TrackQueue {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            max_size,
        }
    }

    fn entry(&mut self, track: Track) -> QueueEntry {
        let seq = self.next_seq;
        self.next_seq += 1;
        QueueEntry {
            track,
            seq,
            added_at: Utc::now(),
        }
    }

    /// Appends a track and returns the new length.
    pub fn enqueue(&mut self, track: Track) -> Result<usize, QueueError> {
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full(self.max_size));
        }

        debug!("➕ Queued: {}", track.title());
        let entry = self.entry(track);
        self.entries.push_back(entry);
        Ok(self.entries.len())
    }

    /// Appends as many tracks as fit and returns how many were added.
    pub fn enqueue_many(&mut self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let available = self.max_size.saturating_sub(self.entries.len());
        let mut added = 0;

        for track in tracks.into_iter().take(available) {
            let entry = self.entry(track);
            self.entries.push_back(entry);
            added += 1;
        }

        info!("➕ Queued {} tracks", added);
        added
    }

    /// Picks the track to play after `finished`, honouring the repeat mode.
    ///
    /// - `Track`: `finished` is returned again and the queue is untouched.
    /// - `Queue`: `finished` goes to the tail, then the head is popped.
    /// - `Off`: the head is popped.
    pub fn dequeue_next(&mut self, finished: Option<&Track>, mode: RepeatMode) -> Option<Track> {
        match (mode, finished) {
            (RepeatMode::Track, Some(track)) => {
                debug!("🔂 Repeating: {}", track.title());
                return Some(track.clone());
            }
            (RepeatMode::Queue, Some(track)) => {
                // a finished track always goes back, even at capacity
                let entry = self.entry(track.clone());
                self.entries.push_back(entry);
            }
            _ => {}
        }

        self.entries.pop_front().map(|entry| entry.track)
    }

    pub fn peek_all(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn shuffle(&mut self) {
        self.entries.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Queue shuffled ({} tracks)", self.entries.len());
    }

    /// Empties the queue and returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        info!("🗑️ Queue cleared: {} tracks removed", removed);
        removed
    }

    pub fn remove_at(&mut self, position: usize) -> Result<Track, BoundsError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .remove(position)
            .ok_or(BoundsError::QueueIndexOutOfBounds { position, len })?;
        debug!("❌ Removed position {}: {}", position, entry.track.title());
        Ok(entry.track)
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<Track, BoundsError> {
        let len = self.entries.len();
        for position in [from, to] {
            if position >= len {
                return Err(BoundsError::QueueIndexOutOfBounds { position, len });
            }
        }

        let entry = self
            .entries
            .remove(from)
            .ok_or(BoundsError::QueueIndexOutOfBounds { position: from, len })?;
        let track = entry.track.clone();
        self.entries.insert(to, entry);
        debug!("📍 Moved {} from {} to {}", track.title(), from, to);
        Ok(track)
    }

    /// Drops everything before `position` and pops the entry at `position`.
    pub fn skip_to(&mut self, position: usize) -> Result<Track, BoundsError> {
        let len = self.entries.len();
        if position >= len {
            return Err(BoundsError::QueueIndexOutOfBounds { position, len });
        }

        self.entries.drain(..position);
        self.entries
            .pop_front()
            .map(|entry| entry.track)
            .ok_or(BoundsError::QueueIndexOutOfBounds { position, len })
    }

    pub fn remove_by_requester(&mut self, user: UserId) -> Vec<Track> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.track.requested_by() == user);
        self.entries = kept.into();

        if !removed.is_empty() {
            info!("🗑️ Removed {} tracks requested by {}", removed.len(), user);
        }
        removed.into_iter().map(|entry| entry.track).collect()
    }

    /// Removes later duplicates of the same URI and returns how many went.
    pub fn remove_duplicates(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.entries.len();
        self.entries.retain(|entry| seen.insert(entry.track.uri().to_string()));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
