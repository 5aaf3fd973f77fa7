//! Watchdog that ends sessions nobody is using.
//!
//! The monitor never touches session state. It reads the published snapshot
//! and the channel presence, and only talks to the session through its
//! mailbox: a `SweepVotes` nudge on every tick, and an `IdleExpired` once a
//! timeout is hit. The snapshot may be stale by then, so the session decides
//! whether the expiry still holds and the monitor keeps watching until it is
//! cancelled.

use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch, Notify},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    events::TerminationReason,
    session::{Command, QueueSnapshot},
    sink::ChannelPresence,
};

#[derive(Debug, Clone, Copy)]
pub struct IdleSettings {
    pub check_interval: Duration,
    /// Bot alone in its voice channel.
    pub alone_timeout: Duration,
    /// Nothing playing and nothing queued.
    pub empty_queue_timeout: Duration,
}

/// When each idle condition started holding.
#[derive(Debug, Default)]
struct IdleTracker {
    alone_since: Option<Instant>,
    idle_since: Option<Instant>,
}

impl IdleTracker {
    fn observe(&mut self, now: Instant, alone: bool, idle: bool, settings: &IdleSettings) -> Option<TerminationReason> {
        let alone_for = elapsed(&mut self.alone_since, alone, now);
        let idle_for = elapsed(&mut self.idle_since, idle, now);

        if alone_for.is_some_and(|d| d >= settings.alone_timeout) {
            return Some(TerminationReason::Alone);
        }
        if idle_for.is_some_and(|d| d >= settings.empty_queue_timeout) {
            return Some(TerminationReason::IdleTimeout);
        }
        None
    }
}

fn elapsed(since: &mut Option<Instant>, holds: bool, now: Instant) -> Option<Duration> {
    if !holds {
        *since = None;
        return None;
    }
    Some(now.saturating_duration_since(*since.get_or_insert(now)))
}

pub(crate) struct IdleMonitor {
    guild_id: GuildId,
    settings: IdleSettings,
    presence: Arc<dyn ChannelPresence>,
    snapshot: watch::Receiver<QueueSnapshot>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl IdleMonitor {
    pub(crate) fn new(
        guild_id: GuildId,
        settings: IdleSettings,
        presence: Arc<dyn ChannelPresence>,
        snapshot: watch::Receiver<QueueSnapshot>,
        mailbox: mpsc::WeakUnboundedSender<Command>,
        wake: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            guild_id,
            settings,
            presence,
            snapshot,
            mailbox,
            wake,
            cancel,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(self.settings.check_interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = IdleTracker::default();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => debug!(guild = %self.guild_id, "👂 Voice update, re-checking idleness"),
            }

            let alone = self.presence.listeners(self.guild_id) == Some(0);
            let idle = self.snapshot.borrow().is_idle();

            let Some(mailbox) = self.mailbox.upgrade() else { break };

            if let Some(reason) = tracker.observe(Instant::now(), alone, idle, &self.settings) {
                info!(guild = %self.guild_id, "💤 Session looks idle ({})", reason);
                if mailbox.send(Command::IdleExpired { reason }).is_err() {
                    break;
                }
                tracker = IdleTracker::default();
                continue;
            }

            if mailbox.send(Command::SweepVotes).is_err() {
                break;
            }
        }

        debug!(guild = %self.guild_id, "Idle monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SETTINGS: IdleSettings = IdleSettings {
        check_interval: Duration::from_secs(1),
        alone_timeout: Duration::from_secs(60),
        empty_queue_timeout: Duration::from_secs(300),
    };

    #[tokio::test(start_paused = true)]
    async fn alone_timeout_fires_after_continuous_solitude() {
        let start = Instant::now();
        let mut tracker = IdleTracker::default();

        assert_eq!(tracker.observe(start, true, false, &SETTINGS), None);
        assert_eq!(tracker.observe(start + Duration::from_secs(59), true, false, &SETTINGS), None);
        assert_eq!(
            tracker.observe(start + Duration::from_secs(60), true, false, &SETTINGS),
            Some(TerminationReason::Alone)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn someone_joining_resets_the_clock() {
        let start = Instant::now();
        let mut tracker = IdleTracker::default();

        tracker.observe(start, true, false, &SETTINGS);
        tracker.observe(start + Duration::from_secs(50), false, false, &SETTINGS);

        assert_eq!(tracker.observe(start + Duration::from_secs(70), true, false, &SETTINGS), None);
        assert_eq!(
            tracker.observe(start + Duration::from_secs(130), true, false, &SETTINGS),
            Some(TerminationReason::Alone)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_timeout_needs_uninterrupted_idleness() {
        let start = Instant::now();
        let mut tracker = IdleTracker::default();

        tracker.observe(start, false, true, &SETTINGS);
        tracker.observe(start + Duration::from_secs(200), false, false, &SETTINGS);
        assert_eq!(tracker.observe(start + Duration::from_secs(400), false, true, &SETTINGS), None);
        assert_eq!(
            tracker.observe(start + Duration::from_secs(700), false, true, &SETTINGS),
            Some(TerminationReason::IdleTimeout)
        );
    }
}
