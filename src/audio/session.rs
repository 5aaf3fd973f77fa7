//! One guild's playback session.
//!
//! A session is an actor: a single tokio task owns the queue, the playback
//! state, the votes and the voice sink, and applies [`Command`]s from its
//! mailbox one at a time. [`SessionHandle`] is the cloneable front end.
//!
//! Work that can take a while runs beside the actor. Query resolution and
//! stream start are spawned tasks whose results come back through the mailbox
//! tagged with the epoch (bumped by `stop`) or load id (bumped whenever the
//! current stream is replaced) they were started under. Results carrying an
//! old tag are dropped.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch, Notify},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    events::{EventSender, SessionEventKind, TerminationReason, TrackEndReason, VoteResolution},
    idle::{IdleMonitor, IdleSettings},
    queue::{RepeatMode, TrackQueue},
    registry::SessionMap,
    sink::{ChannelPresence, TrackEndNotifier, VoiceSink},
    votes::{VoteAction, VoteController, VoteOutcome, VoteStatus},
};
use crate::{
    error::{BoundsError, QueueError, ResolutionError, SessionError, SessionResult, StateError, TransportError},
    settings::GuildPlaybackConfig,
    sources::{Resolution, Track, TrackResolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    /// Terminal; the session is gone.
    Stopped,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        })
    }
}

/// Point-in-time copy of a session, published after every applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub now_playing: Option<Track>,
    pub entries: Vec<Track>,
    pub repeat_mode: RepeatMode,
    pub repeats_remaining: u32,
    pub volume: u16,
    pub channel: Option<ChannelId>,
}

impl QueueSnapshot {
    fn initial(volume: u16, repeat_mode: RepeatMode) -> Self {
        Self {
            state: PlaybackState::Idle,
            now_playing: None,
            entries: Vec::new(),
            repeat_mode,
            repeats_remaining: 0,
            volume,
            channel: None,
        }
    }

    /// Nothing playing, nothing loading, nothing queued.
    pub fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle && self.now_playing.is_none() && self.entries.is_empty()
    }

    /// Known length of the queued entries (live streams count as zero).
    pub fn total_remaining(&self) -> Duration {
        self.entries.iter().filter_map(Track::duration).sum()
    }

    pub fn page_count(&self, per_page: usize) -> usize {
        self.entries.len().div_ceil(per_page.max(1)).max(1)
    }

    /// Zero-based page of queued entries; out-of-range pages are empty.
    pub fn page(&self, page: usize, per_page: usize) -> &[Track] {
        let per_page = per_page.max(1);
        let start = page.saturating_mul(per_page).min(self.entries.len());
        let end = start.saturating_add(per_page).min(self.entries.len());
        &self.entries[start..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The first track is starting; `queued` more were appended behind it.
    Started { track: Track, queued: usize },
    /// Appended behind what is already playing; `position` is zero-based.
    Enqueued { track: Track, position: usize, added: usize },
}

type Reply<T> = oneshot::Sender<SessionResult<T>>;

pub(crate) enum Command {
    Play {
        query: String,
        requester: UserId,
        reply: Reply<PlayOutcome>,
    },
    Enqueue {
        tracks: Vec<Track>,
        reply: Reply<PlayOutcome>,
    },
    Resolved {
        epoch: u64,
        // None when the load was cancelled
        outcome: Option<Result<Resolution, ResolutionError>>,
        reply: Reply<PlayOutcome>,
    },
    StreamStarted {
        load_id: u64,
        result: Result<(), TransportError>,
    },
    StreamEnded {
        load_id: u64,
        result: Result<(), TransportError>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Skip(Reply<Track>),
    Stop(Reply<usize>),
    SetVolume {
        volume: u16,
        reply: Reply<u16>,
    },
    ResetVolume(Reply<u16>),
    SetRepeatMode {
        mode: RepeatMode,
        reply: Reply<RepeatMode>,
    },
    SetRepeatCount {
        count: u32,
        reply: Reply<()>,
    },
    Shuffle(Reply<usize>),
    Clear(Reply<usize>),
    RemoveAt {
        position: usize,
        reply: Reply<Track>,
    },
    MoveTrack {
        from: usize,
        to: usize,
        reply: Reply<Track>,
    },
    SkipTo {
        position: usize,
        reply: Reply<Track>,
    },
    RemoveByRequester {
        user: UserId,
        reply: Reply<Vec<Track>>,
    },
    RemoveDuplicates(Reply<usize>),
    Vote {
        action: VoteAction,
        voter: UserId,
        eligible: usize,
        reply: Reply<VoteOutcome>,
    },
    Connect {
        channel: ChannelId,
        reply: Reply<()>,
    },
    VoteStatus {
        action: VoteAction,
        reply: Reply<VoteStatus>,
    },
    SweepVotes,
    /// The idle monitor saw a timeout; applied only if it still holds.
    IdleExpired {
        reason: TerminationReason,
    },
    Terminate {
        reason: TerminationReason,
        ack: Option<oneshot::Sender<()>>,
    },
}

/// Everything a session needs from its registry.
pub(crate) struct SessionParts {
    pub guild_id: GuildId,
    pub session_id: u64,
    pub config: GuildPlaybackConfig,
    pub resolver: Arc<TrackResolver>,
    pub sink: Arc<dyn VoiceSink>,
    pub presence: Arc<dyn ChannelPresence>,
    pub events: EventSender,
    pub idle_check_interval: Duration,
    pub registry: Weak<SessionMap>,
}

/// Cloneable front end of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    guild_id: GuildId,
    mailbox: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<QueueSnapshot>,
    presence: Arc<dyn ChannelPresence>,
    idle_wake: Arc<Notify>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

/// Starts the actor and its idle monitor.
pub(crate) fn spawn(parts: SessionParts) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::initial(
        parts.config.initial_volume(),
        parts.config.default_repeat_mode,
    ));
    let idle_wake = Arc::new(Notify::new());
    let monitor_cancel = CancellationToken::new();

    IdleMonitor::new(
        parts.guild_id,
        IdleSettings {
            check_interval: parts.idle_check_interval,
            alone_timeout: parts.config.idle_alone_timeout,
            empty_queue_timeout: parts.config.idle_empty_queue_timeout,
        },
        parts.presence.clone(),
        snapshot_rx.clone(),
        tx.downgrade(),
        idle_wake.clone(),
        monitor_cancel.clone(),
    )
    .spawn();

    let actor = SessionActor {
        guild_id: parts.guild_id,
        session_id: parts.session_id,
        queue: TrackQueue::new(parts.config.max_queue_size),
        state: PlaybackState::Idle,
        current: None,
        volume: parts.config.initial_volume(),
        stream_volume: parts.config.initial_volume(),
        repeat_mode: parts.config.default_repeat_mode,
        repeats_remaining: 0,
        votes: VoteController::new(),
        channel: None,
        epoch: 0,
        load_id: 0,
        starting: false,
        loads: CancellationToken::new(),
        monitor_cancel,
        pending_teardown: None,
        teardown_acks: Vec::new(),
        config: parts.config,
        resolver: parts.resolver,
        sink: parts.sink,
        events: parts.events,
        registry: parts.registry,
        weak_mailbox: tx.downgrade(),
        mailbox: rx,
        snapshot: snapshot_tx,
    };
    tokio::spawn(actor.run());

    SessionHandle {
        id: parts.session_id,
        guild_id: parts.guild_id,
        mailbox: tx,
        snapshot: snapshot_rx,
        presence: parts.presence,
        idle_wake,
    }
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// True once the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .map_err(|_| SessionError::Terminated)?;
        response.await.map_err(|_| SessionError::Terminated)?
    }

    /// Resolves `query` off the session path, then plays or queues the result.
    pub async fn play(&self, query: impl Into<String>, requester: UserId) -> SessionResult<PlayOutcome> {
        let query = query.into();
        self.request(|reply| Command::Play { query, requester, reply }).await
    }

    /// Queues an already resolved track, e.g. one picked from search results.
    pub async fn enqueue(&self, track: Track) -> SessionResult<PlayOutcome> {
        self.request(|reply| Command::Enqueue { tracks: vec![track], reply }).await
    }

    pub async fn pause(&self) -> SessionResult<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> SessionResult<()> {
        self.request(Command::Resume).await
    }

    /// Skips the current track and returns it.
    pub async fn skip(&self) -> SessionResult<Track> {
        self.request(Command::Skip).await
    }

    /// Halts playback and empties the queue; returns how many entries were dropped.
    pub async fn stop(&self) -> SessionResult<usize> {
        self.request(Command::Stop).await
    }

    pub async fn set_volume(&self, volume: u16) -> SessionResult<u16> {
        self.request(|reply| Command::SetVolume { volume, reply }).await
    }

    pub async fn reset_volume(&self) -> SessionResult<u16> {
        self.request(Command::ResetVolume).await
    }

    /// Returns the previous mode.
    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> SessionResult<RepeatMode> {
        self.request(|reply| Command::SetRepeatMode { mode, reply }).await
    }

    /// Replays the current track `count` more times; 0 cancels.
    pub async fn set_repeat_count(&self, count: u32) -> SessionResult<()> {
        self.request(|reply| Command::SetRepeatCount { count, reply }).await
    }

    pub async fn shuffle(&self) -> SessionResult<usize> {
        self.request(Command::Shuffle).await
    }

    pub async fn clear(&self) -> SessionResult<usize> {
        self.request(Command::Clear).await
    }

    pub async fn remove_at(&self, position: usize) -> SessionResult<Track> {
        self.request(|reply| Command::RemoveAt { position, reply }).await
    }

    pub async fn move_track(&self, from: usize, to: usize) -> SessionResult<Track> {
        self.request(|reply| Command::MoveTrack { from, to, reply }).await
    }

    /// Jumps to the queued track at `position`, dropping everything before it.
    pub async fn skip_to(&self, position: usize) -> SessionResult<Track> {
        self.request(|reply| Command::SkipTo { position, reply }).await
    }

    pub async fn remove_by_requester(&self, user: UserId) -> SessionResult<Vec<Track>> {
        self.request(|reply| Command::RemoveByRequester { user, reply }).await
    }

    pub async fn remove_duplicates(&self) -> SessionResult<usize> {
        self.request(Command::RemoveDuplicates).await
    }

    /// Casts a crowd vote. The listener count is read before entering the
    /// session so presence lookups never run on the session path.
    pub async fn vote(&self, action: VoteAction, voter: UserId) -> SessionResult<VoteOutcome> {
        let eligible = self.presence.listeners(self.guild_id).unwrap_or(1);
        self.request(|reply| Command::Vote {
            action,
            voter,
            eligible,
            reply,
        })
        .await
    }

    /// Progress of the vote for `action`; a lapsed vote reads `Expired` once.
    pub async fn vote_status(&self, action: VoteAction) -> SessionResult<VoteStatus> {
        self.request(|reply| Command::VoteStatus { action, reply }).await
    }

    pub async fn connect(&self, channel: ChannelId) -> SessionResult<()> {
        self.request(|reply| Command::Connect { channel, reply }).await
    }

    /// Latest published state; never waits on the session.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot.clone()
    }

    /// Re-evaluates idleness now instead of at the next tick.
    pub fn notify_voice_update(&self) {
        self.idle_wake.notify_one();
    }

    /// Tears the session down and waits until it is gone. Safe to repeat.
    pub async fn terminate(&self, reason: TerminationReason) {
        let (ack, done) = oneshot::channel();
        if self
            .mailbox
            .send(Command::Terminate { reason, ack: Some(ack) })
            .is_ok()
        {
            let _ = done.await;
        }
    }
}

struct SessionActor {
    guild_id: GuildId,
    session_id: u64,
    config: GuildPlaybackConfig,
    resolver: Arc<TrackResolver>,
    sink: Arc<dyn VoiceSink>,
    events: EventSender,
    registry: Weak<SessionMap>,

    queue: TrackQueue,
    state: PlaybackState,
    current: Option<Track>,
    volume: u16,
    // volume the current stream was started with
    stream_volume: u16,
    repeat_mode: RepeatMode,
    repeats_remaining: u32,
    votes: VoteController,
    channel: Option<ChannelId>,

    epoch: u64,
    load_id: u64,
    // a send_frames call is in flight
    starting: bool,
    loads: CancellationToken,
    monitor_cancel: CancellationToken,
    pending_teardown: Option<TerminationReason>,
    teardown_acks: Vec<oneshot::Sender<()>>,

    weak_mailbox: mpsc::WeakUnboundedSender<Command>,
    mailbox: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<QueueSnapshot>,
}

impl SessionActor {
    async fn run(mut self) {
        info!(guild = %self.guild_id, "🎛️ Session {} started", self.session_id);

        loop {
            let Some(command) = self.mailbox.recv().await else {
                // every handle is gone
                self.teardown(TerminationReason::Shutdown).await;
                break;
            };

            self.handle(command).await;

            if let Some(reason) = self.pending_teardown.take() {
                self.teardown(reason).await;
                for ack in self.teardown_acks.drain(..) {
                    let _ = ack.send(());
                }
                break;
            }
            self.publish();
        }

        debug!(guild = %self.guild_id, "Session {} actor exited", self.session_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Play { query, requester, reply } => self.play(query, requester, reply),
            Command::Enqueue { tracks, reply } => {
                let _ = reply.send(self.accept_tracks(tracks));
            }
            Command::Resolved { epoch, outcome, reply } => self.on_resolved(epoch, outcome, reply),
            Command::StreamStarted { load_id, result } => self.on_stream_started(load_id, result).await,
            Command::StreamEnded { load_id, result } => self.on_stream_ended(load_id, result),
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume().await);
            }
            Command::Skip(reply) => {
                let _ = reply.send(self.skip().await);
            }
            Command::Stop(reply) => {
                let _ = reply.send(Ok(self.stop().await));
            }
            Command::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::ResetVolume(reply) => {
                let volume = self.config.initial_volume();
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::SetRepeatMode { mode, reply } => {
                let previous = std::mem::replace(&mut self.repeat_mode, mode);
                info!(guild = %self.guild_id, "🔁 Repeat mode: {} → {}", previous, mode);
                let _ = reply.send(Ok(previous));
            }
            Command::SetRepeatCount { count, reply } => {
                let result = match self.current {
                    Some(_) => {
                        self.repeats_remaining = count;
                        Ok(())
                    }
                    None => Err(StateError::NotPlaying.into()),
                };
                let _ = reply.send(result);
            }
            Command::Shuffle(reply) => {
                let _ = reply.send(self.shuffle());
            }
            Command::Clear(reply) => {
                let _ = reply.send(Ok(self.clear()));
            }
            Command::RemoveAt { position, reply } => {
                let result = self.queue.remove_at(position).map_err(SessionError::from);
                self.queue_changed_if(result.is_ok());
                let _ = reply.send(result);
            }
            Command::MoveTrack { from, to, reply } => {
                let result = self.queue.move_track(from, to).map_err(SessionError::from);
                self.queue_changed_if(result.is_ok());
                let _ = reply.send(result);
            }
            Command::SkipTo { position, reply } => {
                let _ = reply.send(self.skip_to(position).await);
            }
            Command::RemoveByRequester { user, reply } => {
                let removed = self.queue.remove_by_requester(user);
                self.queue_changed_if(!removed.is_empty());
                let _ = reply.send(Ok(removed));
            }
            Command::RemoveDuplicates(reply) => {
                let removed = self.queue.remove_duplicates();
                self.queue_changed_if(removed > 0);
                let _ = reply.send(Ok(removed));
            }
            Command::Vote {
                action,
                voter,
                eligible,
                reply,
            } => {
                let _ = reply.send(self.vote(action, voter, eligible).await);
            }
            Command::Connect { channel, reply } => {
                let _ = reply.send(self.connect(channel).await);
            }
            Command::VoteStatus { action, reply } => {
                let status = self.votes.status(action, Instant::now());
                if status == Ok(VoteStatus::Expired) {
                    self.vote_expired(action);
                }
                let _ = reply.send(status.map_err(SessionError::from));
            }
            Command::SweepVotes => {
                for action in self.votes.sweep(Instant::now()) {
                    self.vote_expired(action);
                }
            }
            Command::IdleExpired { reason } => {
                if reason == TerminationReason::IdleTimeout && !self.is_idle() {
                    debug!(guild = %self.guild_id, "Idle timeout overtaken by new work");
                } else {
                    self.pending_teardown.get_or_insert(reason);
                }
            }
            Command::Terminate { reason, ack } => {
                self.pending_teardown.get_or_insert(reason);
                self.teardown_acks.extend(ack);
            }
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        self.events.emit(self.guild_id, kind);
    }

    fn publish(&self) {
        self.snapshot.send_replace(QueueSnapshot {
            state: self.state,
            now_playing: self.current.clone(),
            entries: self.queue.peek_all().into_iter().map(|entry| entry.track).collect(),
            repeat_mode: self.repeat_mode,
            repeats_remaining: self.repeats_remaining,
            volume: self.volume,
            channel: self.channel,
        });
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!(guild = %self.guild_id, "State {} → {}", self.state, state);
            self.state = state;
        }
    }

    fn queue_changed_if(&mut self, changed: bool) {
        if !changed {
            return;
        }
        self.emit(SessionEventKind::QueueChanged { len: self.queue.len() });

        // nothing left to shuffle or clear
        if self.queue.is_empty() {
            for action in [VoteAction::Shuffle, VoteAction::Clear] {
                if self.votes.cancel(action).is_ok() {
                    self.emit(SessionEventKind::VoteResolved {
                        action,
                        outcome: VoteResolution::Cancelled,
                    });
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle && self.current.is_none() && self.queue.is_empty()
    }

    fn vote_expired(&self, action: VoteAction) {
        debug!(guild = %self.guild_id, "⌛ {} vote expired", action);
        self.emit(SessionEventKind::VoteResolved {
            action,
            outcome: VoteResolution::Expired,
        });
    }

    /// Records a sink failure; a lost connection ends the session.
    fn transport_failed(&mut self, error: &TransportError) {
        warn!(guild = %self.guild_id, "🔌 Voice sink error: {}", error);
        if *error == TransportError::Disconnected {
            self.pending_teardown.get_or_insert(TerminationReason::TransportLost);
        }
    }

    fn play(&mut self, query: String, requester: UserId, reply: Reply<PlayOutcome>) {
        if self.is_idle() {
            self.set_state(PlaybackState::Loading);
        }

        let Some(mailbox) = self.weak_mailbox.upgrade() else {
            let _ = reply.send(Err(SessionError::Terminated));
            return;
        };

        debug!(guild = %self.guild_id, "🔍 Resolving '{}'", query);
        let resolver = self.resolver.clone();
        let cancelled = self.loads.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancelled.cancelled() => None,
                result = resolver.resolve(&query, requester) => Some(result),
            };
            let _ = mailbox.send(Command::Resolved { epoch, outcome, reply });
        });
    }

    /// Loading with no current track means a query is still being resolved.
    fn resolving(&self) -> bool {
        self.state == PlaybackState::Loading && self.current.is_none()
    }

    fn on_resolved(
        &mut self,
        epoch: u64,
        outcome: Option<Result<Resolution, ResolutionError>>,
        reply: Reply<PlayOutcome>,
    ) {
        let outcome = match outcome {
            Some(outcome) if epoch == self.epoch => outcome,
            _ => {
                debug!(guild = %self.guild_id, "Dropping resolution from epoch {}", epoch);
                let _ = reply.send(Err(SessionError::Cancelled));
                return;
            }
        };

        let result = match outcome {
            Ok(resolution) => self.accept_tracks(resolution.into_tracks()),
            Err(error) => {
                warn!(guild = %self.guild_id, "❌ Resolution failed: {}", error);
                if self.resolving() {
                    self.emit(SessionEventKind::TrackEnded {
                        track: None,
                        reason: TrackEndReason::LoadFailed(error.to_string()),
                    });
                    self.set_state(PlaybackState::Idle);
                    self.advance(None, self.repeat_mode);
                }
                Err(error.into())
            }
        };
        let _ = reply.send(result);
    }

    /// Starts or queues freshly resolved tracks.
    fn accept_tracks(&mut self, mut tracks: Vec<Track>) -> SessionResult<PlayOutcome> {
        if tracks.is_empty() {
            return Err(ResolutionError::NotFound.into());
        }

        let starts_now = self.current.is_none()
            && matches!(self.state, PlaybackState::Idle | PlaybackState::Loading);

        if starts_now && self.queue.is_empty() {
            let track = tracks.remove(0);
            let queued = self.queue.enqueue_many(tracks);
            self.queue_changed_if(queued > 0);
            self.start(track.clone());
            return Ok(PlayOutcome::Started { track, queued });
        }

        let track = tracks[0].clone();
        let position = self.queue.len();
        let added = self.queue.enqueue_many(tracks);
        if added == 0 {
            return Err(QueueError::Full(self.queue.max_size()).into());
        }
        self.queue_changed_if(true);

        if starts_now {
            self.advance(None, self.repeat_mode);
        }
        Ok(PlayOutcome::Enqueued { track, position, added })
    }

    /// Makes `track` current and opens its stream.
    fn start(&mut self, track: Track) {
        self.load_id += 1;
        info!(guild = %self.guild_id, "⏳ Loading: {}", track);
        self.current = Some(track);
        self.set_state(PlaybackState::Loading);

        // one stream start at a time; a stale one in flight launches this one when it lands
        if !self.starting {
            self.launch_stream();
        }
    }

    fn launch_stream(&mut self) {
        let (Some(track), Some(mailbox)) = (self.current.clone(), self.weak_mailbox.upgrade()) else {
            return;
        };

        self.starting = true;
        self.stream_volume = self.volume;

        let sink = self.sink.clone();
        let load_id = self.load_id;
        let volume = self.volume;
        let notifier = TrackEndNotifier::new(mailbox.clone(), load_id);

        tokio::spawn(async move {
            let result = sink.send_frames(track.stream(), volume, notifier).await;
            let _ = mailbox.send(Command::StreamStarted { load_id, result });
        });
    }

    async fn on_stream_started(&mut self, load_id: u64, result: Result<(), TransportError>) {
        self.starting = false;

        if load_id != self.load_id {
            debug!(guild = %self.guild_id, "Stream {} superseded", load_id);
            if result.is_ok() {
                if let Err(e) = self.sink.halt().await {
                    self.transport_failed(&e);
                }
            }
            if self.state == PlaybackState::Loading && self.current.is_some() {
                self.launch_stream();
            }
            return;
        }

        match result {
            Ok(()) => {
                let Some(track) = self.current.clone() else { return };
                self.set_state(PlaybackState::Playing);
                info!(guild = %self.guild_id, "🎵 Now playing: {}", track);
                if self.stream_volume != self.volume {
                    if let Err(e) = self.sink.set_volume(self.volume).await {
                        self.transport_failed(&e);
                    }
                }
                self.emit(SessionEventKind::TrackStarted { track });
            }
            Err(TransportError::Disconnected) => self.transport_failed(&TransportError::Disconnected),
            Err(error) => {
                warn!(guild = %self.guild_id, "❌ Stream failed to start: {}", error);
                let track = self.current.take();
                self.emit(SessionEventKind::TrackEnded {
                    track,
                    reason: TrackEndReason::LoadFailed(error.to_string()),
                });
                self.set_state(PlaybackState::Idle);
                self.advance(None, self.repeat_mode);
            }
        }
    }

    fn on_stream_ended(&mut self, load_id: u64, result: Result<(), TransportError>) {
        let live = matches!(
            self.state,
            PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Paused
        );
        if load_id != self.load_id || !live || self.current.is_none() {
            debug!(guild = %self.guild_id, "Ignoring end of stream {}", load_id);
            return;
        }

        match result {
            Ok(()) => {
                let finished = self.current.take();
                self.emit(SessionEventKind::TrackEnded {
                    track: finished.clone(),
                    reason: TrackEndReason::Finished,
                });
                self.advance(finished, self.repeat_mode);
            }
            Err(TransportError::Disconnected) => self.transport_failed(&TransportError::Disconnected),
            Err(error) => {
                warn!(guild = %self.guild_id, "⚠️ Playback failed: {}", error);
                let failed = self.current.take();
                self.emit(SessionEventKind::TrackEnded {
                    track: failed,
                    reason: TrackEndReason::TransportFailed(error.to_string()),
                });
                self.advance(None, self.repeat_mode);
            }
        }
    }

    /// Moves on after the current track is gone, or goes idle.
    fn advance(&mut self, finished: Option<Track>, mode: RepeatMode) {
        if let Some(track) = finished.as_ref().filter(|_| self.repeats_remaining > 0) {
            self.repeats_remaining -= 1;
            self.start(track.clone());
            return;
        }

        let before = self.queue.len();
        match self.queue.dequeue_next(finished.as_ref(), mode) {
            Some(next) => {
                self.queue_changed_if(before != self.queue.len() || mode == RepeatMode::Queue);
                self.start(next);
            }
            None => {
                self.current = None;
                self.set_state(PlaybackState::Idle);
                self.cancel_votes();
                debug!(guild = %self.guild_id, "📭 Queue drained");
            }
        }
    }

    async fn pause(&mut self) -> SessionResult<()> {
        if self.state != PlaybackState::Playing {
            return Err(StateError::NotPlaying.into());
        }
        if let Err(e) = self.sink.set_paused(true).await {
            self.transport_failed(&e);
            return Err(e.into());
        }
        self.set_state(PlaybackState::Paused);
        info!(guild = %self.guild_id, "⏸️ Paused");
        Ok(())
    }

    async fn resume(&mut self) -> SessionResult<()> {
        if self.state != PlaybackState::Paused {
            return Err(StateError::NotPaused.into());
        }
        if let Err(e) = self.sink.set_paused(false).await {
            self.transport_failed(&e);
            return Err(e.into());
        }
        self.set_state(PlaybackState::Playing);
        info!(guild = %self.guild_id, "▶️ Resumed");
        Ok(())
    }

    /// Halts the current stream and takes the current track out.
    async fn interrupt(&mut self) -> SessionResult<Track> {
        match self.state {
            PlaybackState::Loading => return Err(StateError::AlreadyLoading.into()),
            PlaybackState::Playing | PlaybackState::Paused => {}
            _ => return Err(StateError::NotPlaying.into()),
        }
        let track = self.current.take().ok_or(StateError::NotPlaying)?;

        self.load_id += 1;
        self.repeats_remaining = 0;
        if let Err(e) = self.sink.halt().await {
            self.transport_failed(&e);
        }
        self.emit(SessionEventKind::TrackEnded {
            track: Some(track.clone()),
            reason: TrackEndReason::Skipped,
        });
        if self.votes.cancel(VoteAction::Skip).is_ok() {
            self.emit(SessionEventKind::VoteResolved {
                action: VoteAction::Skip,
                outcome: VoteResolution::Cancelled,
            });
        }
        Ok(track)
    }

    async fn skip(&mut self) -> SessionResult<Track> {
        let skipped = self.interrupt().await?;
        info!(guild = %self.guild_id, "⏭️ Skipped: {}", skipped);

        // a skipped track still cycles back under queue repeat, never under track repeat
        match self.repeat_mode {
            RepeatMode::Queue => self.advance(Some(skipped.clone()), RepeatMode::Queue),
            _ => self.advance(None, RepeatMode::Off),
        }
        Ok(skipped)
    }

    async fn skip_to(&mut self, position: usize) -> SessionResult<Track> {
        let len = self.queue.len();
        if position >= len {
            return Err(BoundsError::QueueIndexOutOfBounds { position, len }.into());
        }
        self.interrupt().await?;

        let target = self.queue.skip_to(position)?;
        self.queue_changed_if(true);
        self.start(target.clone());
        Ok(target)
    }

    async fn stop(&mut self) -> usize {
        self.epoch += 1;
        self.load_id += 1;
        self.loads.cancel();
        self.loads = CancellationToken::new();
        self.repeats_remaining = 0;

        if self.current.is_some() {
            if let Err(e) = self.sink.halt().await {
                self.transport_failed(&e);
            }
        }
        if let Some(track) = self.current.take() {
            self.emit(SessionEventKind::TrackEnded {
                track: Some(track),
                reason: TrackEndReason::Stopped,
            });
        }

        let cleared = self.queue.clear();
        self.queue_changed_if(cleared > 0);
        self.cancel_votes();
        self.set_state(PlaybackState::Idle);

        info!(guild = %self.guild_id, "⏹️ Stopped, {} queued tracks dropped", cleared);
        cleared
    }

    async fn set_volume(&mut self, volume: u16) -> SessionResult<u16> {
        let max = self.config.volume_limit();
        if volume > max {
            return Err(BoundsError::VolumeOutOfBounds { requested: volume, max }.into());
        }

        self.volume = volume;
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            if let Err(e) = self.sink.set_volume(volume).await {
                self.transport_failed(&e);
                return Err(e.into());
            }
            self.stream_volume = volume;
        }
        info!(guild = %self.guild_id, "🔊 Volume set to {}%", volume);
        Ok(volume)
    }

    fn shuffle(&mut self) -> SessionResult<usize> {
        if self.queue.is_empty() {
            return Err(QueueError::Empty.into());
        }
        self.queue.shuffle();
        self.queue_changed_if(true);
        Ok(self.queue.len())
    }

    fn clear(&mut self) -> usize {
        let removed = self.queue.clear();
        self.queue_changed_if(removed > 0);
        removed
    }

    async fn vote(&mut self, action: VoteAction, voter: UserId, eligible: usize) -> SessionResult<VoteOutcome> {
        match action {
            VoteAction::Skip
                if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) =>
            {
                return Err(StateError::NotPlaying.into())
            }
            VoteAction::Shuffle | VoteAction::Clear if self.queue.is_empty() => {
                return Err(QueueError::Empty.into())
            }
            _ => {}
        }

        let now = Instant::now();
        if self.votes.status(action, now) == Ok(VoteStatus::Expired) {
            self.vote_expired(action);
        }
        let outcome = self.votes.cast_vote(
            action,
            voter,
            eligible,
            self.config.vote_threshold_ratio,
            self.config.vote_timeout,
            now,
        );

        match outcome {
            VoteOutcome::Registered { current, required } => {
                self.emit(SessionEventKind::VoteRegistered {
                    action,
                    current,
                    required,
                });
            }
            VoteOutcome::ThresholdReached { .. } => {
                self.emit(SessionEventKind::VoteResolved {
                    action,
                    outcome: VoteResolution::Passed,
                });
                match action {
                    VoteAction::Skip => {
                        self.skip().await?;
                    }
                    VoteAction::Shuffle => {
                        self.shuffle()?;
                    }
                    VoteAction::Clear => {
                        self.clear();
                    }
                }
            }
            VoteOutcome::AlreadyVoted { .. } => {}
        }
        Ok(outcome)
    }

    fn cancel_votes(&mut self) {
        for action in self.votes.cancel_all() {
            self.emit(SessionEventKind::VoteResolved {
                action,
                outcome: VoteResolution::Cancelled,
            });
        }
    }

    async fn connect(&mut self, channel: ChannelId) -> SessionResult<()> {
        self.sink.connect(channel).await?;
        self.channel = Some(channel);
        info!(guild = %self.guild_id, "🔊 Connected to voice channel {}", channel);
        Ok(())
    }

    async fn teardown(&mut self, reason: TerminationReason) {
        self.epoch += 1;
        self.load_id += 1;
        self.loads.cancel();
        self.monitor_cancel.cancel();

        if let Err(e) = self.sink.halt().await {
            debug!(guild = %self.guild_id, "Halt during teardown failed: {}", e);
        }
        if let Err(e) = self.sink.disconnect().await {
            debug!(guild = %self.guild_id, "Disconnect during teardown failed: {}", e);
        }

        self.cancel_votes();
        self.queue.clear();
        self.current = None;
        self.repeats_remaining = 0;
        self.set_state(PlaybackState::Stopped);
        self.publish();

        if let Some(sessions) = self.registry.upgrade() {
            let session_id = self.session_id;
            sessions.remove_if(&self.guild_id, |_, handle| handle.id() == session_id);
        }

        info!(guild = %self.guild_id, "👋 Session {} ended ({})", self.session_id, reason);
        self.emit(SessionEventKind::SessionTerminated { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            events::{EventReceiver, SessionEvent},
            testing::{self, FakePresence, FakeSink, SinkCall},
        },
        error::VoteError,
    };
    use futures::future::join_all;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);

    struct Fixture {
        handle: SessionHandle,
        sink: Arc<FakeSink>,
        presence: Arc<FakePresence>,
        events: EventReceiver,
    }

    fn fixture_with(config: GuildPlaybackConfig) -> Fixture {
        fixture_checking_every(config, Duration::from_secs(1))
    }

    /// Idle checks (and vote sweeps) only run once at startup.
    fn fixture_unswept(config: GuildPlaybackConfig) -> Fixture {
        fixture_checking_every(config, Duration::from_secs(3600))
    }

    fn fixture_checking_every(config: GuildPlaybackConfig, idle_check_interval: Duration) -> Fixture {
        let sink = Arc::new(FakeSink::default());
        let presence = Arc::new(FakePresence::new(Some(4)));
        let (events, rx) = EventSender::channel();

        let handle = spawn(SessionParts {
            guild_id: GUILD,
            session_id: 1,
            config,
            resolver: testing::resolver(),
            sink: sink.clone(),
            presence: presence.clone(),
            events,
            idle_check_interval,
            registry: Weak::new(),
        });

        Fixture {
            handle,
            sink,
            presence,
            events: rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GuildPlaybackConfig::default())
    }

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    /// Next event matching `wanted`, skipping the rest.
    async fn wait_for(events: &mut EventReceiver, wanted: impl Fn(&SessionEventKind) -> bool) -> SessionEventKind {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if wanted(&event.kind) {
                return event.kind;
            }
        }
    }

    async fn started(events: &mut EventReceiver) -> String {
        match wait_for(events, |k| matches!(k, SessionEventKind::TrackStarted { .. })).await {
            SessionEventKind::TrackStarted { track } => track.title().to_string(),
            _ => unreachable!(),
        }
    }

    fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn play_loads_plays_and_skip_goes_idle() {
        let mut f = fixture();

        let outcome = f.handle.play("song a", user(7)).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Started { ref track, queued: 0 } if track.title() == "song a"));

        assert_eq!(started(&mut f.events).await, "song a");
        let snapshot = f.handle.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.now_playing.map(|t| t.requested_by()), Some(user(7)));

        let skipped = f.handle.skip().await.unwrap();
        assert_eq!(skipped.title(), "song a");
        assert_eq!(f.handle.snapshot().state, PlaybackState::Idle);
        assert!(f.sink.calls().contains(&SinkCall::Halt));
    }

    #[tokio::test(start_paused = true)]
    async fn later_plays_queue_in_insertion_order() {
        let mut f = fixture();
        f.handle.play("first", user(1)).await.unwrap();
        started(&mut f.events).await;

        for (i, query) in ["second", "third", "fourth"].into_iter().enumerate() {
            let outcome = f.handle.play(query, user(1)).await.unwrap();
            assert!(matches!(outcome, PlayOutcome::Enqueued { position, added: 1, .. } if position == i));
        }

        let titles: Vec<_> = f.handle.snapshot().entries.iter().map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["second", "third", "fourth"]);
    }

    #[tokio::test(start_paused = true)]
    async fn natural_completion_advances_and_track_repeat_replays() {
        let mut f = fixture();
        f.handle.play("a", user(1)).await.unwrap();
        f.handle.play("b", user(1)).await.unwrap();
        assert_eq!(started(&mut f.events).await, "a");

        f.handle.set_repeat_mode(RepeatMode::Track).await.unwrap();
        f.sink.finish_current();
        assert_eq!(started(&mut f.events).await, "a");

        f.handle.set_repeat_mode(RepeatMode::Off).await.unwrap();
        f.sink.finish_current();
        assert_eq!(started(&mut f.events).await, "b");
        assert!(f.handle.snapshot().entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_repeat_cycles_through_everything() {
        let mut f = fixture();
        f.handle.set_repeat_mode(RepeatMode::Queue).await.unwrap();
        f.handle.play("a", user(1)).await.unwrap();
        f.handle.play("b", user(1)).await.unwrap();

        let mut order = vec![started(&mut f.events).await];
        for _ in 0..3 {
            f.sink.finish_current();
            order.push(started(&mut f.events).await);
        }

        assert_eq!(order, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_count_replays_then_moves_on() {
        let mut f = fixture();
        f.handle.play("a", user(1)).await.unwrap();
        f.handle.play("b", user(1)).await.unwrap();
        started(&mut f.events).await;

        f.handle.set_repeat_count(1).await.unwrap();
        assert_eq!(f.handle.snapshot().repeats_remaining, 1);

        f.sink.finish_current();
        assert_eq!(started(&mut f.events).await, "a");
        f.sink.finish_current();
        assert_eq!(started(&mut f.events).await, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_volume_is_rejected_and_unchanged() {
        let f = fixture();

        let err = f.handle.set_volume(200).await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Bounds(BoundsError::VolumeOutOfBounds { requested: 200, max: 150 })
        );
        assert_eq!(f.handle.snapshot().volume, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_capped_by_guild_maximum_and_resettable() {
        let mut f = fixture_with(GuildPlaybackConfig {
            max_volume: 80,
            default_volume: 60,
            ..GuildPlaybackConfig::default()
        });
        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;

        assert!(f.handle.set_volume(90).await.is_err());
        assert_eq!(f.handle.set_volume(75).await, Ok(75));
        assert!(f.sink.calls().contains(&SinkCall::Volume(75)));
        assert_eq!(f.handle.reset_volume().await, Ok(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_follow_the_state_machine() {
        let mut f = fixture();
        assert_eq!(f.handle.pause().await, Err(StateError::NotPlaying.into()));

        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;

        assert_eq!(f.handle.resume().await, Err(StateError::NotPaused.into()));
        f.handle.pause().await.unwrap();
        assert_eq!(f.handle.snapshot().state, PlaybackState::Paused);
        f.handle.resume().await.unwrap();
        assert_eq!(f.handle.snapshot().state, PlaybackState::Playing);
        assert_eq!(
            f.sink.calls().iter().filter(|c| matches!(c, SinkCall::Paused(_))).count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skip_while_loading_and_stop_discards_the_load() {
        let mut f = fixture();
        let handle = f.handle.clone();
        let pending = tokio::spawn(async move { handle.play("slow tune", user(1)).await });

        let mut snapshots = f.handle.subscribe();
        snapshots.wait_for(|s| s.state == PlaybackState::Loading).await.unwrap();

        assert_eq!(f.handle.skip().await, Err(StateError::AlreadyLoading.into()));
        assert_eq!(f.handle.skip_to(0).await.unwrap_err(), BoundsError::QueueIndexOutOfBounds { position: 0, len: 0 }.into());

        assert_eq!(f.handle.stop().await, Ok(0));
        assert_eq!(pending.await.unwrap(), Err(SessionError::Cancelled));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.handle.snapshot().state, PlaybackState::Idle);
        assert!(!drain(&mut f.events)
            .iter()
            .any(|e| matches!(e.kind, SessionEventKind::TrackStarted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resolution_reports_load_failure_and_goes_idle() {
        let mut f = fixture();

        let err = f.handle.play("missing song", user(1)).await.unwrap_err();

        assert_eq!(err, ResolutionError::NotFound.into());
        let ended = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::TrackEnded { .. })).await;
        assert!(matches!(
            ended,
            SessionEventKind::TrackEnded { track: None, reason: TrackEndReason::LoadFailed(_) }
        ));
        assert_eq!(f.handle.snapshot().state, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_stream_is_skipped_in_favour_of_the_next_track() {
        let mut f = fixture();
        f.handle.play("broken stream", user(1)).await.unwrap();
        f.handle.play("good", user(1)).await.unwrap();

        let ended = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::TrackEnded { .. })).await;
        assert!(matches!(
            ended,
            SessionEventKind::TrackEnded { track: Some(ref t), reason: TrackEndReason::LoadFailed(_) }
                if t.title() == "broken stream"
        ));
        assert_eq!(started(&mut f.events).await, "good");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_reports_removed_count() {
        let mut f = fixture();
        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        for query in ["x", "y", "z"] {
            f.handle.play(query, user(1)).await.unwrap();
        }

        assert_eq!(f.handle.clear().await, Ok(3));
        let snapshot = f.handle.snapshot();
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_editing_through_the_session() {
        let mut f = fixture();
        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        for (query, requester) in [("a", 1), ("b", 2), ("c", 1), ("d", 2)] {
            f.handle.play(query, user(requester)).await.unwrap();
        }

        assert_eq!(f.handle.move_track(3, 0).await.unwrap().title(), "d");
        assert_eq!(f.handle.remove_at(1).await.unwrap().title(), "a");
        assert_eq!(
            f.handle.remove_at(9).await,
            Err(BoundsError::QueueIndexOutOfBounds { position: 9, len: 3 }.into())
        );
        let removed = f.handle.remove_by_requester(user(2)).await.unwrap();
        assert_eq!(removed.len(), 2);

        let titles: Vec<_> = f.handle.snapshot().entries.iter().map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_to_jumps_over_earlier_entries() {
        let mut f = fixture();
        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        for query in ["a", "b", "c"] {
            f.handle.play(query, user(1)).await.unwrap();
        }

        assert_eq!(f.handle.skip_to(1).await.unwrap().title(), "b");
        assert_eq!(started(&mut f.events).await, "b");
        let titles: Vec<_> = f.handle.snapshot().entries.iter().map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shuffle_keeps_the_same_tracks_and_the_current_one() {
        let mut f = fixture();
        assert_eq!(f.handle.shuffle().await, Err(QueueError::Empty.into()));

        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        let queued: Vec<String> = (0..20).map(|i| format!("track {}", i)).collect();
        for query in &queued {
            f.handle.play(query.as_str(), user(1)).await.unwrap();
        }

        assert_eq!(f.handle.shuffle().await, Ok(20));
        let snapshot = f.handle.snapshot();
        let mut titles: Vec<_> = snapshot.entries.iter().map(|t| t.title().to_string()).collect();
        titles.sort();
        let mut expected = queued.clone();
        expected.sort();

        assert_eq!(titles, expected);
        assert_eq!(snapshot.now_playing.map(|t| t.title().to_string()), Some("now".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_vote_needs_half_the_listeners() {
        let mut f = fixture();
        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;

        assert_eq!(
            f.handle.vote(VoteAction::Skip, user(10)).await,
            Ok(VoteOutcome::Registered { current: 1, required: 2 })
        );
        let again = f.handle.vote(VoteAction::Skip, user(10)).await.unwrap();
        assert_eq!(again.into_result(), Err(VoteError::AlreadyVoted));
        assert_eq!(
            f.handle.vote(VoteAction::Skip, user(11)).await,
            Ok(VoteOutcome::ThresholdReached { required: 2 })
        );

        assert_eq!(f.handle.snapshot().state, PlaybackState::Idle);
        let kinds: Vec<_> = drain(&mut f.events).into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&SessionEventKind::VoteResolved {
            action: VoteAction::Skip,
            outcome: VoteResolution::Passed,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_votes_skip_exactly_once() {
        let mut f = fixture();
        f.presence.set(Some(5));
        for query in ["a", "b", "c"] {
            f.handle.play(query, user(1)).await.unwrap();
        }
        started(&mut f.events).await;

        let outcomes = join_all((100..105).map(|id| {
            let handle = f.handle.clone();
            async move { handle.vote(VoteAction::Skip, user(id)).await }
        }))
        .await;

        let passed = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(VoteOutcome::ThresholdReached { .. })))
            .count();
        assert_eq!(passed, 1);
        assert_eq!(started(&mut f.events).await, "b");
        assert_eq!(f.handle.snapshot().entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_votes_are_swept() {
        let mut f = fixture_with(GuildPlaybackConfig {
            vote_timeout: Duration::from_secs(5),
            ..GuildPlaybackConfig::default()
        });
        f.handle.play("a", user(1)).await.unwrap();
        f.handle.play("b", user(1)).await.unwrap();
        started(&mut f.events).await;
        f.handle.vote(VoteAction::Clear, user(3)).await.unwrap();

        let resolved = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::VoteResolved { .. })).await;

        assert_eq!(
            resolved,
            SessionEventKind::VoteResolved {
                action: VoteAction::Clear,
                outcome: VoteResolution::Expired,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lost_voice_connection_terminates_the_session() {
        let mut f = fixture();
        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;

        f.sink.fail_current(TransportError::Disconnected);

        let terminated = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::SessionTerminated { .. })).await;
        assert_eq!(
            terminated,
            SessionEventKind::SessionTerminated { reason: TerminationReason::TransportLost }
        );
        assert_eq!(f.handle.snapshot().state, PlaybackState::Stopped);
        assert_eq!(f.handle.pause().await, Err(SessionError::Terminated));
        assert!(f.sink.calls().contains(&SinkCall::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_goes_through_the_sink() {
        let f = fixture();
        let channel = ChannelId::new(55);

        f.handle.connect(channel).await.unwrap();

        assert_eq!(f.sink.calls(), vec![SinkCall::Connect(channel)]);
        assert_eq!(f.handle.snapshot().channel, Some(channel));
    }

    #[test]
    fn snapshot_pages() {
        let mut snapshot = QueueSnapshot::initial(100, RepeatMode::Off);
        snapshot.entries = (0..12)
            .map(|i| crate::audio::queue::tests::track(&"x".repeat(i + 1)))
            .collect();

        assert_eq!(snapshot.page_count(5), 3);
        assert_eq!(snapshot.page(0, 5).len(), 5);
        assert_eq!(snapshot.page(2, 5).len(), 2);
        assert!(snapshot.page(3, 5).is_empty());
        // 1 + 2 + ... + 12 minutes
        assert_eq!(snapshot.total_remaining(), Duration::from_secs(60 * 78));
    }

    #[tokio::test(start_paused = true)]
    async fn emptying_the_queue_cancels_queue_votes() {
        let mut f = fixture();
        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        for query in ["x", "y"] {
            f.handle.play(query, user(1)).await.unwrap();
        }
        assert_eq!(
            f.handle.vote(VoteAction::Clear, user(10)).await,
            Ok(VoteOutcome::Registered { current: 1, required: 2 })
        );

        assert_eq!(f.handle.clear().await, Ok(2));
        let cancelled = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::VoteResolved { .. })).await;
        assert_eq!(
            cancelled,
            SessionEventKind::VoteResolved {
                action: VoteAction::Clear,
                outcome: VoteResolution::Cancelled,
            }
        );

        for query in ["fresh1", "fresh2"] {
            f.handle.play(query, user(1)).await.unwrap();
        }
        // the vote cast against the old queue no longer counts
        assert_eq!(
            f.handle.vote(VoteAction::Clear, user(11)).await,
            Ok(VoteOutcome::Registered { current: 1, required: 2 })
        );
        assert_eq!(f.handle.snapshot().entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_the_last_entry_cancels_a_shuffle_vote() {
        let mut f = fixture();
        f.handle.play("now", user(1)).await.unwrap();
        started(&mut f.events).await;
        f.handle.play("only", user(2)).await.unwrap();
        f.handle.vote(VoteAction::Shuffle, user(10)).await.unwrap();

        assert_eq!(f.handle.remove_at(0).await.unwrap().title(), "only");

        let cancelled = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::VoteResolved { .. })).await;
        assert_eq!(
            cancelled,
            SessionEventKind::VoteResolved {
                action: VoteAction::Shuffle,
                outcome: VoteResolution::Cancelled,
            }
        );
        assert_eq!(
            f.handle.vote_status(VoteAction::Shuffle).await,
            Err(SessionError::Vote(VoteError::NoActiveVote))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_overtaken_by_a_play_is_ignored() {
        let mut f = fixture();
        let (reply, response) = oneshot::channel();

        f.handle
            .mailbox
            .send(Command::Play {
                query: "late".into(),
                requester: user(1),
                reply,
            })
            .unwrap();
        f.handle
            .mailbox
            .send(Command::IdleExpired {
                reason: TerminationReason::IdleTimeout,
            })
            .unwrap();

        assert!(matches!(response.await.unwrap(), Ok(PlayOutcome::Started { .. })));
        assert_eq!(started(&mut f.events).await, "late");
        assert!(!f.handle.is_closed());
        assert_eq!(f.handle.snapshot().state, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_ends_a_session_that_is_still_idle() {
        let mut f = fixture();

        f.handle
            .mailbox
            .send(Command::IdleExpired {
                reason: TerminationReason::IdleTimeout,
            })
            .unwrap();

        let terminated = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::SessionTerminated { .. })).await;
        assert_eq!(
            terminated,
            SessionEventKind::SessionTerminated { reason: TerminationReason::IdleTimeout }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn vote_status_reports_progress_then_expiry_once() {
        let mut f = fixture_unswept(GuildPlaybackConfig {
            vote_timeout: Duration::from_secs(5),
            ..GuildPlaybackConfig::default()
        });
        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;
        f.handle.vote(VoteAction::Skip, user(10)).await.unwrap();

        match f.handle.vote_status(VoteAction::Skip).await {
            Ok(VoteStatus::Active { current, required, remaining }) => {
                assert_eq!((current, required), (1, 2));
                assert!(remaining <= Duration::from_secs(5));
            }
            other => panic!("unexpected status {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(f.handle.vote_status(VoteAction::Skip).await, Ok(VoteStatus::Expired));
        assert_eq!(
            f.handle.vote_status(VoteAction::Skip).await,
            Err(SessionError::Vote(VoteError::NoActiveVote))
        );
        let kinds: Vec<_> = drain(&mut f.events).into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&SessionEventKind::VoteResolved {
            action: VoteAction::Skip,
            outcome: VoteResolution::Expired,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn voting_on_a_lapsed_vote_reports_it_and_starts_over() {
        let mut f = fixture_unswept(GuildPlaybackConfig {
            vote_timeout: Duration::from_secs(5),
            ..GuildPlaybackConfig::default()
        });
        f.handle.play("a", user(1)).await.unwrap();
        started(&mut f.events).await;
        f.handle.vote(VoteAction::Skip, user(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(
            f.handle.vote(VoteAction::Skip, user(11)).await,
            Ok(VoteOutcome::Registered { current: 1, required: 2 })
        );
        let resolved = wait_for(&mut f.events, |k| matches!(k, SessionEventKind::VoteResolved { .. })).await;
        assert_eq!(
            resolved,
            SessionEventKind::VoteResolved {
                action: VoteAction::Skip,
                outcome: VoteResolution::Expired,
            }
        );
    }
}
