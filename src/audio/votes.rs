//! Crowd votes for skip / shuffle / clear.
//!
//! The controller is plain data owned by a session actor, so every cast is
//! already serialized. The only transition that reports
//! [`VoteOutcome::ThresholdReached`] is the one that removes the vote, which
//! is what guarantees the underlying action runs once.

use serenity::model::id::UserId;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::VoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteAction {
    Skip,
    Shuffle,
    Clear,
}

impl fmt::Display for VoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoteAction::Skip => "skip",
            VoteAction::Shuffle => "shuffle",
            VoteAction::Clear => "clear",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Registered { current: usize, required: usize },
    ThresholdReached { required: usize },
    AlreadyVoted { current: usize, required: usize },
}

impl VoteOutcome {
    /// Treats a repeated vote as an error, for callers that want to tell the voter.
    pub fn into_result(self) -> Result<VoteOutcome, VoteError> {
        match self {
            VoteOutcome::AlreadyVoted { .. } => Err(VoteError::AlreadyVoted),
            other => Ok(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    Active {
        current: usize,
        required: usize,
        remaining: Duration,
    },
    Expired,
}

#[derive(Debug)]
struct VoteSession {
    voters: HashSet<UserId>,
    // fixed when the vote opens; later joins/leaves do not move the bar
    required: usize,
    created_at: Instant,
    expires_in: Duration,
}

impl VoteSession {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.expires_in
    }
}

/// Active votes of one session, at most one per action.
#[derive(Debug, Default)]
pub struct VoteController {
    active: HashMap<VoteAction, VoteSession>,
}

/// Votes needed out of `eligible` listeners: `ceil(eligible * ratio)`, at least one.
pub fn required_votes(eligible: usize, ratio: f64) -> usize {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.5 };
    ((eligible as f64 * ratio).ceil() as usize).max(1)
}

impl VoteController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cast_vote(
        &mut self,
        action: VoteAction,
        voter: UserId,
        eligible: usize,
        ratio: f64,
        timeout: Duration,
        now: Instant,
    ) -> VoteOutcome {
        if self.active.get(&action).is_some_and(|vote| vote.is_expired(now)) {
            debug!("⌛ Discarding expired {} vote", action);
            self.active.remove(&action);
        }

        let vote = self.active.entry(action).or_insert_with(|| {
            let required = required_votes(eligible, ratio);
            info!("🗳️ {} vote opened, {} votes needed", action, required);
            VoteSession {
                voters: HashSet::new(),
                required,
                created_at: now,
                expires_in: timeout,
            }
        });

        if !vote.voters.insert(voter) {
            return VoteOutcome::AlreadyVoted {
                current: vote.voters.len(),
                required: vote.required,
            };
        }

        let (current, required) = (vote.voters.len(), vote.required);
        if current >= required {
            self.active.remove(&action);
            info!("✅ {} vote passed ({}/{})", action, current, required);
            return VoteOutcome::ThresholdReached { required };
        }

        VoteOutcome::Registered { current, required }
    }

    /// Reports an active vote, or `Expired` once for a vote that lapsed.
    pub fn status(&mut self, action: VoteAction, now: Instant) -> Result<VoteStatus, VoteError> {
        let vote = self.active.get(&action).ok_or(VoteError::NoActiveVote)?;

        if vote.is_expired(now) {
            self.active.remove(&action);
            return Ok(VoteStatus::Expired);
        }

        Ok(VoteStatus::Active {
            current: vote.voters.len(),
            required: vote.required,
            remaining: vote.expires_in.saturating_sub(now.saturating_duration_since(vote.created_at)),
        })
    }

    pub fn cancel(&mut self, action: VoteAction) -> Result<(), VoteError> {
        self.active.remove(&action).map(|_| ()).ok_or(VoteError::NoActiveVote)
    }

    pub fn cancel_all(&mut self) -> Vec<VoteAction> {
        self.active.drain().map(|(action, _)| action).collect()
    }

    /// Drops every expired vote and returns their actions.
    pub fn sweep(&mut self, now: Instant) -> Vec<VoteAction> {
        let expired: Vec<VoteAction> = self
            .active
            .iter()
            .filter(|(_, vote)| vote.is_expired(now))
            .map(|(action, _)| *action)
            .collect();

        for action in &expired {
            self.active.remove(action);
        }
        expired
    }
}
