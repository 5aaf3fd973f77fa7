use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        PlayOutcome, QueueSnapshot, SessionEventKind, TerminationReason, TrackEndReason, VoteAction,
        VoteOutcome, VoteResolution, VoteStatus,
    },
    error::{ResolutionError, SessionError, StateError, VoteError},
    sources::Track,
};

/// Standard colour palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

pub const QUEUE_PAGE_SIZE: usize = 10;

fn duration_label(track: &Track) -> String {
    track
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "🔴 Live".to_string())
}

fn with_track_details(mut embed: CreateEmbed, track: &Track) -> CreateEmbed {
    embed = embed
        .field("🎤 Artist", track.artist().unwrap_or("Unknown"), true)
        .field("⏱️ Duration", duration_label(track), true)
        .field("👤 Requested by", format!("<@{}>", track.requested_by()), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }
    if track.uri().starts_with("http") {
        embed = embed.url(track.uri());
    }
    embed
}

/// Embed for the track that just started
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    with_track_details(
        CreateEmbed::default()
            .title("🎵 Now Playing")
            .description(format!("**{}**", track.title()))
            .color(colors::SUCCESS_GREEN),
        track,
    )
    .timestamp(Timestamp::now())
    .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Now-playing view built from a snapshot, with what comes next
pub fn create_status_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let Some(track) = snapshot.now_playing.as_ref() else {
        return create_info_embed("📭 Nothing Playing", "Use `/play` to start the music");
    };

    let mut embed = with_track_details(
        CreateEmbed::default()
            .title(format!("🎵 {}", state_label(snapshot)))
            .description(format!("**{}**", track.title()))
            .color(colors::MUSIC_PURPLE),
        track,
    )
    .field("🔊 Volume", format!("{}%", snapshot.volume), true)
    .field("🔁 Repeat", repeat_label(snapshot), true);

    if let Some(next) = snapshot.entries.first() {
        embed = embed.field("⏭️ Up next", next.to_string(), false);
    }
    embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn state_label(snapshot: &QueueSnapshot) -> &'static str {
    use crate::audio::PlaybackState::*;
    match snapshot.state {
        Playing => "Now Playing",
        Paused => "Paused",
        Loading => "Loading",
        Idle | Stopped => "Stopped",
    }
}

fn repeat_label(snapshot: &QueueSnapshot) -> String {
    if snapshot.repeats_remaining > 0 {
        format!("{} more time(s)", snapshot.repeats_remaining)
    } else {
        snapshot.repeat_mode.to_string()
    }
}

/// Reply to `/play` and search picks
pub fn create_play_outcome_embed(outcome: &PlayOutcome) -> CreateEmbed {
    match outcome {
        PlayOutcome::Started { track, queued } => {
            let mut embed = with_track_details(
                CreateEmbed::default()
                    .title("⏳ Starting")
                    .description(format!("**{}**", track.title()))
                    .color(colors::SUCCESS_GREEN),
                track,
            );
            if *queued > 0 {
                embed = embed.field("📋 Playlist", format!("{} more tracks queued", queued), false);
            }
            embed
        }
        PlayOutcome::Enqueued { track, position, added } => {
            let description = if *added > 1 {
                format!("**{}** and {} more tracks added to the queue", track.title(), added - 1)
            } else {
                format!("**{}** added to the queue", track.title())
            };
            with_track_details(
                CreateEmbed::default()
                    .title("✅ Added to Queue")
                    .description(description)
                    .color(colors::SUCCESS_GREEN),
                track,
            )
            .field("📍 Position", format!("#{}", position + 1), true)
        }
    }
}

/// One page of the queue; `page` is zero-based
pub fn create_queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let pages = snapshot.page_count(QUEUE_PAGE_SIZE);
    let page = page.min(pages - 1);

    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if let Some(track) = &snapshot.now_playing {
        embed = embed.field("🎵 Now", format!("{} `[{}]`", track, duration_label(track)), false);
    }

    if snapshot.entries.is_empty() {
        return embed
            .description("The queue is empty")
            .color(colors::NEUTRAL_GRAY);
    }

    let lines: Vec<String> = snapshot
        .page(page, QUEUE_PAGE_SIZE)
        .iter()
        .enumerate()
        .map(|(i, track)| {
            format!(
                "**{}**. {} `[{}]` - <@{}>",
                page * QUEUE_PAGE_SIZE + i + 1,
                track,
                duration_label(track),
                track.requested_by()
            )
        })
        .collect();

    embed
        .description(lines.join("\n"))
        .field("📊 Tracks", snapshot.entries.len().to_string(), true)
        .field("⏱️ Total", format_duration(snapshot.total_remaining()), true)
        .field("🔁 Repeat", repeat_label(snapshot), true)
        .footer(CreateEmbedFooter::new(format!("Page {}/{}", page + 1, pages)))
}

pub fn create_vote_embed(action: VoteAction, outcome: &VoteOutcome) -> CreateEmbed {
    match outcome {
        VoteOutcome::Registered { current, required } | VoteOutcome::AlreadyVoted { current, required } => {
            CreateEmbed::default()
                .title(format!("🗳️ Vote to {}", action))
                .description(format!("{} {}", vote_bar(*current, *required), progress(*current, *required)))
                .color(colors::WARNING_ORANGE)
        }
        VoteOutcome::ThresholdReached { .. } => {
            create_success_embed("🗳️ Vote Passed", &format!("The crowd decided to {}", action))
        }
    }
}

pub fn create_vote_status_embed(action: VoteAction, status: &VoteStatus) -> CreateEmbed {
    match status {
        VoteStatus::Active { current, required, remaining } => CreateEmbed::default()
            .title(format!("🗳️ Vote to {}", action))
            .description(format!(
                "{} {}\nCloses in {}",
                vote_bar(*current, *required),
                progress(*current, *required),
                format_duration(*remaining)
            ))
            .color(colors::WARNING_ORANGE),
        VoteStatus::Expired => create_info_embed("⌛ Vote Expired", &format!("Nobody finished the vote to {}", action)),
    }
}

fn progress(current: usize, required: usize) -> String {
    format!("{}/{} votes", current, required)
}

fn vote_bar(current: usize, required: usize) -> String {
    let required = required.max(1);
    let filled = current.min(required);
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(required - filled))
}

pub fn create_volume_embed(volume: u16) -> CreateEmbed {
    let status_emoji = match volume {
        0 => "🔇",
        1..=50 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Volume", status_emoji))
        .description(format!("**{}%**", volume))
        .field("📊 Level", volume_bar(volume), false)
        .color(colors::INFO_BLUE)
}

fn volume_bar(volume: u16) -> String {
    let segments = 15;
    let filled = (usize::from(volume) * segments / 150).min(segments);
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(segments - filled))
}

/// Announcement for an engine event, if it is worth one.
///
/// Vote progress is already shown in the reply to `/vote`, so it is not announced.
pub fn create_event_embed(event: &SessionEventKind) -> Option<CreateEmbed> {
    match event {
        SessionEventKind::TrackStarted { track } => Some(create_now_playing_embed(track)),
        SessionEventKind::TrackEnded {
            track,
            reason: TrackEndReason::LoadFailed(detail) | TrackEndReason::TransportFailed(detail),
        } => {
            let title = track.as_ref().map_or("the requested track", Track::title);
            Some(create_error_embed(
                "Playback Failed",
                &format!("Could not play **{}**: {}\nMoving on to the next track.", title, detail),
            ))
        }
        SessionEventKind::VoteResolved {
            action,
            outcome: VoteResolution::Expired,
        } => Some(create_info_embed("⌛ Vote Expired", &format!("Not enough votes to {}", action))),
        SessionEventKind::SessionTerminated { reason } => Some(create_info_embed(
            "👋 Leaving",
            match reason {
                TerminationReason::Alone => "Everyone left the voice channel",
                TerminationReason::IdleTimeout => "Nothing played for a while",
                TerminationReason::TransportLost => "Lost the voice connection",
                TerminationReason::Shutdown => "The bot is shutting down",
                TerminationReason::Requested => "See you next time",
            },
        )),
        _ => None,
    }
}

/// User-facing wording for engine errors.
pub fn describe_error(error: &SessionError) -> String {
    match error {
        SessionError::Resolution(ResolutionError::NotFound) => "No results for that search".to_string(),
        SessionError::Resolution(ResolutionError::SourceUnavailable(_)) => {
            "The music source is not responding, try again later".to_string()
        }
        SessionError::State(StateError::NotPlaying) => "Nothing is playing right now".to_string(),
        SessionError::State(StateError::NotPaused) => "Playback is not paused".to_string(),
        SessionError::State(StateError::AlreadyLoading) => "A track is still loading, hold on".to_string(),
        SessionError::Vote(VoteError::AlreadyVoted) => "You already voted".to_string(),
        SessionError::Cancelled => "The request was cancelled because playback stopped".to_string(),
        SessionError::Terminated => "The player has shut down, use `/play` to start again".to_string(),
        other => {
            let text = other.to_string();
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => text,
            }
        }
    }
}

pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Guild Jukebox - Commands")
        .color(colors::INFO_BLUE)
        .field(
            "▶️ Playback",
            "`/play` `/search` `/pause` `/resume` `/skip` `/skipto` `/stop` `/leave`",
            false,
        )
        .field(
            "📋 Queue",
            "`/queue` `/nowplaying` `/shuffle` `/clear` `/remove` `/move` `/dedupe`",
            false,
        )
        .field("🎛️ Settings", "`/volume` `/repeat` `/join`", false)
        .field("🗳️ Crowd", "`/vote skip|shuffle|clear`", false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
}

/// Formats a duration as `m:ss` or `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
