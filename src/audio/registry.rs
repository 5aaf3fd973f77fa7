//! Guild → session directory; the command layer's only way into the engine.

use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info};

use super::{
    events::{EventReceiver, EventSender, TerminationReason},
    session::{self, SessionHandle, SessionParts},
    sink::{ChannelPresence, SinkFactory},
};
use crate::{
    settings::{GuildPlaybackConfig, SettingsSource},
    sources::TrackResolver,
};

pub(crate) type SessionMap = DashMap<GuildId, SessionHandle>;

/// Collaborators shared by every session of a registry.
pub struct EngineDeps {
    pub resolver: Arc<TrackResolver>,
    pub settings: Arc<dyn SettingsSource>,
    pub sinks: Arc<dyn SinkFactory>,
    pub presence: Arc<dyn ChannelPresence>,
    pub idle_check_interval: Duration,
}

/// Owns at most one live session per guild.
///
/// Sessions remove themselves when they end (idle timeout, lost voice
/// connection); a later `get_or_create` for the same guild starts a fresh one.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    deps: EngineDeps,
    events: EventSender,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Builds an empty registry and the receiver for every session's events.
    pub fn new(deps: EngineDeps) -> (Self, EventReceiver) {
        let (events, receiver) = EventSender::channel();
        let registry = Self {
            sessions: Arc::new(DashMap::new()),
            deps,
            events,
            next_id: AtomicU64::new(1),
        };
        (registry, receiver)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Existing session for the guild, or a new one configured from settings.
    pub async fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        if let Some(handle) = self.get(guild_id) {
            return handle;
        }

        // read settings before taking the map entry so no shard lock spans an await
        let config = self.deps.settings.guild_playback_config(guild_id).await;

        let mut entry = self.sessions.entry(guild_id).or_insert_with(|| self.spawn(guild_id, config.clone()));
        if entry.value().is_closed() {
            // actor exited but has not deregistered yet
            *entry.value_mut() = self.spawn(guild_id, config);
        }
        entry.value().clone()
    }

    fn spawn(&self, guild_id: GuildId, config: GuildPlaybackConfig) -> SessionHandle {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(guild = %guild_id, "🆕 Creating playback session {}", session_id);

        session::spawn(SessionParts {
            guild_id,
            session_id,
            config,
            resolver: self.deps.resolver.clone(),
            sink: self.deps.sinks.create(guild_id),
            presence: self.deps.presence.clone(),
            events: self.events.clone(),
            idle_check_interval: self.deps.idle_check_interval,
            registry: Arc::downgrade(&self.sessions),
        })
    }

    /// Ends the guild's session, if any, and waits for it. Idempotent.
    pub async fn destroy(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, handle)) => {
                handle.terminate(TerminationReason::Requested).await;
                true
            }
            None => {
                debug!(guild = %guild_id, "No session to destroy");
                false
            }
        }
    }

    /// Ends every session concurrently.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        self.sessions.clear();

        info!("🛑 Shutting down {} playback sessions", handles.len());
        join_all(
            handles
                .iter()
                .map(|handle| handle.terminate(TerminationReason::Shutdown)),
        )
        .await;
    }

    /// Voice membership changed in the guild; wake its idle monitor.
    pub fn notify_voice_update(&self, guild_id: GuildId) {
        if let Some(handle) = self.get(guild_id) {
            handle.notify_voice_update();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn resolver(&self) -> &Arc<TrackResolver> {
        &self.deps.resolver
    }

    pub fn settings(&self) -> &Arc<dyn SettingsSource> {
        &self.deps.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            events::SessionEventKind,
            session::PlaybackState,
            sink::VoiceSink,
            testing::{self, FakePresence, FakeSink},
            votes::{VoteAction, VoteOutcome},
        },
        settings::StaticSettings,
    };
    use serenity::model::id::UserId;
    use pretty_assertions::assert_eq;

    fn registry_with(config: GuildPlaybackConfig, presence: Arc<FakePresence>) -> (SessionRegistry, EventReceiver) {
        SessionRegistry::new(EngineDeps {
            resolver: testing::resolver(),
            settings: Arc::new(StaticSettings(config)),
            sinks: Arc::new(|_: GuildId| Arc::new(FakeSink::default()) as Arc<dyn VoiceSink>),
            presence,
            idle_check_interval: Duration::from_secs(1),
        })
    }

    fn registry() -> (SessionRegistry, EventReceiver) {
        registry_with(GuildPlaybackConfig::default(), Arc::new(FakePresence::new(Some(3))))
    }

    fn guild(id: u64) -> GuildId {
        GuildId::new(id)
    }

    async fn terminated(events: &mut EventReceiver) -> (GuildId, TerminationReason) {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let SessionEventKind::SessionTerminated { reason } = event.kind {
                return (event.guild_id, reason);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_session_per_guild() {
        let (registry, _events) = registry();

        let a = registry.get_or_create(guild(1)).await;
        let b = registry.get_or_create(guild(1)).await;
        let other = registry.get_or_create(guild(2)).await;

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), other.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_creation_yields_a_single_session() {
        let (registry, _events) = registry();

        let handles = join_all((0..8).map(|_| registry.get_or_create(guild(9)))).await;

        assert!(handles.iter().all(|h| h.id() == handles[0].id()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_times_out_and_is_forgotten() {
        let config = GuildPlaybackConfig {
            idle_empty_queue_timeout: Duration::from_secs(5),
            ..GuildPlaybackConfig::default()
        };
        let (registry, mut events) = registry_with(config, Arc::new(FakePresence::new(Some(2))));
        let handle = registry.get_or_create(guild(1)).await;

        assert_eq!(terminated(&mut events).await, (guild(1), TerminationReason::IdleTimeout));
        assert!(registry.get(guild(1)).is_none());
        assert_eq!(handle.snapshot().state, PlaybackState::Stopped);

        let fresh = registry.get_or_create(guild(1)).await;
        assert_ne!(fresh.id(), handle.id());
        assert!(fresh.play("again", UserId::new(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn being_left_alone_ends_the_session() {
        let config = GuildPlaybackConfig {
            idle_alone_timeout: Duration::from_secs(10),
            ..GuildPlaybackConfig::default()
        };
        let presence = Arc::new(FakePresence::new(Some(2)));
        let (registry, mut events) = registry_with(config, presence.clone());
        let handle = registry.get_or_create(guild(4)).await;
        handle.play("long song", UserId::new(1)).await.unwrap();

        presence.set(Some(0));
        registry.notify_voice_update(guild(4));

        assert_eq!(terminated(&mut events).await, (guild(4), TerminationReason::Alone));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent() {
        let (registry, mut events) = registry();
        let handle = registry.get_or_create(guild(3)).await;

        assert!(registry.destroy(guild(3)).await);
        assert!(!registry.destroy(guild(3)).await);

        assert_eq!(terminated(&mut events).await, (guild(3), TerminationReason::Requested));
        assert!(handle.is_closed() || handle.snapshot().state == PlaybackState::Stopped);
        assert!(registry.get(guild(3)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_everything() {
        let (registry, mut events) = registry();
        for id in 1..=3 {
            registry.get_or_create(guild(id)).await;
        }

        registry.shutdown_all().await;

        let mut ended: Vec<u64> = Vec::new();
        for _ in 0..3 {
            let (guild_id, reason) = terminated(&mut events).await;
            assert_eq!(reason, TerminationReason::Shutdown);
            ended.push(guild_id.get());
        }
        ended.sort();
        assert_eq!(ended, vec![1, 2, 3]);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_do_not_share_votes_or_queues() {
        let (registry, _events) = registry();
        let first = registry.get_or_create(guild(1)).await;
        let second = registry.get_or_create(guild(2)).await;
        first.play("a", UserId::new(1)).await.unwrap();
        second.play("b", UserId::new(1)).await.unwrap();
        let mut snapshots = first.subscribe();
        snapshots.wait_for(|s| s.state == PlaybackState::Playing).await.unwrap();
        let mut snapshots = second.subscribe();
        snapshots.wait_for(|s| s.state == PlaybackState::Playing).await.unwrap();

        let outcome = first.vote(VoteAction::Skip, UserId::new(5)).await.unwrap();

        assert_eq!(outcome, VoteOutcome::Registered { current: 1, required: 2 });
        assert_eq!(second.snapshot().now_playing.map(|t| t.title().to_string()), Some("b".to_string()));
    }
}
