use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction, ComponentInteractionDataKind},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    audio::{RepeatMode, SessionHandle, VoteAction},
    bot::{search, JukeboxBot},
    error::{SessionError, StateError},
    ui::embeds,
};

/// Why a command could not be carried out; shown to the caller only.
#[derive(Debug, Error)]
pub(super) enum CommandError {
    #[error("Join a voice channel first")]
    NotInVoice,
    #[error("Missing option `{0}`")]
    MissingOption(&'static str),
    #[error("Unknown value `{0}`")]
    InvalidOption(String),
    #[error("That search has expired, run `/search` again")]
    SearchExpired,
    #[error("{}", embeds::describe_error(.0))]
    Session(#[from] SessionError),
}

pub(super) type CommandResult = Result<CreateEmbed, CommandError>;

/// Dispatches slash commands
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside a guild"))?;

    info!(
        guild = %guild_id,
        "📝 /{} used by {}",
        command.data.name, command.user.name
    );
    bot.remember_text_channel(guild_id, command.channel_id);

    let result = match command.data.name.as_str() {
        // Resolution can outlast the interaction deadline
        "play" => return handle_play(ctx, &command, bot, guild_id).await,
        "search" => return search::handle_search_command(ctx, &command, bot, guild_id).await,
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "leave" => handle_leave(bot, guild_id).await,
        "pause" => handle_pause(bot, guild_id).await,
        "resume" => handle_resume(bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "skipto" => handle_skipto(&command, bot, guild_id).await,
        "stop" => handle_stop(bot, guild_id).await,
        "queue" => handle_queue(&command, bot, guild_id),
        "nowplaying" => handle_nowplaying(bot, guild_id),
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "remove" => handle_remove(&command, bot, guild_id).await,
        "move" => handle_move(&command, bot, guild_id).await,
        "dedupe" => handle_dedupe(bot, guild_id).await,
        "repeat" => handle_repeat(&command, bot, guild_id).await,
        "volume" => handle_volume(&command, bot, guild_id).await,
        "vote" => handle_vote_command(ctx, &command, bot, guild_id).await,
        "help" => Ok(embeds::create_help_embed()),
        other => {
            warn!(guild = %guild_id, "❓ Unknown command /{}", other);
            Err(CommandError::InvalidOption(other.to_string()))
        }
    };

    respond(ctx, &command, result).await
}

/// Dispatches message components
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Component used outside a guild"))?;

    debug!(
        guild = %guild_id,
        "🔘 Component {} used by {}",
        component.data.custom_id, component.user.name
    );

    match (component.data.custom_id.as_str(), &component.data.kind) {
        (search::SELECT_MENU_ID, ComponentInteractionDataKind::StringSelect { values }) => {
            let index = values
                .first()
                .and_then(|value| value.strip_prefix("track_"))
                .and_then(|index| index.parse::<usize>().ok());

            if let Some(index) = index {
                search::handle_track_selection(ctx, &component, bot, guild_id, index).await?;
            }
        }
        _ => {
            component
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Unknown action")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

/// Sends the reply; failures are ephemeral so only the caller sees them.
async fn respond(ctx: &Context, command: &CommandInteraction, result: CommandResult) -> Result<()> {
    let message = match result {
        Ok(embed) => CreateInteractionResponseMessage::new().embed(embed),
        Err(err) => {
            debug!("🚫 /{} refused: {}", command.data.name, err);
            CreateInteractionResponseMessage::new()
                .embed(embeds::create_error_embed("Can't do that", &err.to_string()))
                .ephemeral(true)
        }
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

/// Fills in a deferred reply.
pub(super) async fn edit_reply(
    ctx: &Context,
    command: &CommandInteraction,
    result: CommandResult,
) -> Result<()> {
    let embed = result.unwrap_or_else(|err| embeds::create_error_embed("Can't do that", &err.to_string()));
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

// Playback

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let result: CommandResult = async {
        let query = string_option(command, "query").ok_or(CommandError::MissingOption("query"))?;
        let session = join_caller(ctx, bot, guild_id, command.user.id).await?;
        let outcome = session.play(query, command.user.id).await?;
        Ok(embeds::create_play_outcome_embed(&outcome))
    }
    .await;

    edit_reply(ctx, command, result).await
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> CommandResult {
    join_caller(ctx, bot, guild_id, command.user.id).await?;
    Ok(embeds::create_success_embed("🔊 Connected", "Joined your voice channel"))
}

async fn handle_leave(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    if bot.registry.destroy(guild_id).await {
        Ok(embeds::create_success_embed("👋 Disconnected", "Left the voice channel"))
    } else {
        Err(SessionError::State(StateError::NotPlaying).into())
    }
}

async fn handle_pause(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    active_session(bot, guild_id)?.pause().await?;
    Ok(embeds::create_success_embed("⏸️ Paused", "Use `/resume` to continue"))
}

async fn handle_resume(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    active_session(bot, guild_id)?.resume().await?;
    Ok(embeds::create_success_embed("▶️ Resumed", "Back to the music"))
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> CommandResult {
    if needs_vote(bot, command, guild_id).await {
        return cast_vote(ctx, command, bot, guild_id, VoteAction::Skip).await;
    }

    let skipped = active_session(bot, guild_id)?.skip().await?;
    Ok(embeds::create_success_embed(
        "⏭️ Skipped",
        &format!("**{}**", skipped.title()),
    ))
}

async fn handle_skipto(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let position = position_option(command, "position")?;
    let track = active_session(bot, guild_id)?.skip_to(position).await?;
    Ok(embeds::create_success_embed(
        "⏩ Jumping Ahead",
        &format!("Up now: **{}**", track.title()),
    ))
}

async fn handle_stop(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let cleared = active_session(bot, guild_id)?.stop().await?;
    Ok(embeds::create_success_embed(
        "⏹️ Stopped",
        &format!("Playback stopped and {} queued tracks removed", cleared),
    ))
}

// Queue

fn handle_queue(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let page = integer_option(command, "page").unwrap_or(1).max(1) - 1;
    let snapshot = active_session(bot, guild_id)?.snapshot();
    Ok(embeds::create_queue_embed(
        &snapshot,
        usize::try_from(page).unwrap_or(usize::MAX),
    ))
}

fn handle_nowplaying(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let snapshot = active_session(bot, guild_id)?.snapshot();
    Ok(embeds::create_status_embed(&snapshot))
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> CommandResult {
    if needs_vote(bot, command, guild_id).await {
        return cast_vote(ctx, command, bot, guild_id, VoteAction::Shuffle).await;
    }

    let count = active_session(bot, guild_id)?.shuffle().await?;
    Ok(embeds::create_success_embed(
        "🔀 Shuffled",
        &format!("{} tracks reordered", count),
    ))
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> CommandResult {
    let session = active_session(bot, guild_id)?;

    if let Some(user) = user_option(command, "user") {
        let removed = session.remove_by_requester(user).await?;
        return Ok(embeds::create_success_embed(
            "🧹 Cleared",
            &format!("Removed {} tracks requested by <@{}>", removed.len(), user),
        ));
    }

    if needs_vote(bot, command, guild_id).await {
        return cast_vote(ctx, command, bot, guild_id, VoteAction::Clear).await;
    }

    let removed = session.clear().await?;
    Ok(embeds::create_success_embed(
        "🧹 Cleared",
        &format!("Removed {} tracks from the queue", removed),
    ))
}

async fn handle_remove(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let position = position_option(command, "position")?;
    let track = active_session(bot, guild_id)?.remove_at(position).await?;
    Ok(embeds::create_success_embed(
        "🗑️ Removed",
        &format!("**{}**", track.title()),
    ))
}

async fn handle_move(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let from = position_option(command, "from")?;
    let to = position_option(command, "to")?;
    let track = active_session(bot, guild_id)?.move_track(from, to).await?;
    Ok(embeds::create_success_embed(
        "↕️ Moved",
        &format!("**{}** is now #{}", track.title(), to + 1),
    ))
}

async fn handle_dedupe(bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let removed = active_session(bot, guild_id)?.remove_duplicates().await?;
    Ok(embeds::create_success_embed(
        "🧽 Deduplicated",
        &format!("Removed {} duplicate tracks", removed),
    ))
}

// Settings

async fn handle_repeat(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let session = active_session(bot, guild_id)?;
    let mut changes = Vec::new();

    if let Some(mode) = string_option(command, "mode") {
        let mode: RepeatMode = mode
            .parse()
            .map_err(|_| CommandError::InvalidOption(mode.to_string()))?;
        session.set_repeat_mode(mode).await?;
        changes.push(format!("Repeat mode: **{}**", mode));
    }

    if let Some(times) = integer_option(command, "times") {
        let times = u32::try_from(times).map_err(|_| CommandError::InvalidOption(times.to_string()))?;
        session.set_repeat_count(times).await?;
        changes.push(format!("Current track replays **{}** more time(s)", times));
    }

    if changes.is_empty() {
        changes.push(format!("Repeat mode: **{}**", session.snapshot().repeat_mode));
    }

    Ok(embeds::create_info_embed("🔁 Repeat", &changes.join("\n")))
}

async fn handle_volume(command: &CommandInteraction, bot: &JukeboxBot, guild_id: GuildId) -> CommandResult {
    let session = active_session(bot, guild_id)?;

    let volume = if bool_option(command, "reset").unwrap_or(false) {
        session.reset_volume().await?
    } else if let Some(level) = integer_option(command, "level") {
        let level = u16::try_from(level).map_err(|_| CommandError::InvalidOption(level.to_string()))?;
        session.set_volume(level).await?
    } else {
        session.snapshot().volume
    };

    Ok(embeds::create_volume_embed(volume))
}

async fn handle_vote_command(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> CommandResult {
    let action = match string_option(command, "action") {
        Some("skip") => VoteAction::Skip,
        Some("shuffle") => VoteAction::Shuffle,
        Some("clear") => VoteAction::Clear,
        Some(other) => return Err(CommandError::InvalidOption(other.to_string())),
        None => return Err(CommandError::MissingOption("action")),
    };

    if bool_option(command, "status").unwrap_or(false) {
        let status = active_session(bot, guild_id)?.vote_status(action).await?;
        return Ok(embeds::create_vote_status_embed(action, &status));
    }

    cast_vote(ctx, command, bot, guild_id, action).await
}

async fn cast_vote(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    action: VoteAction,
) -> CommandResult {
    user_voice_channel(ctx, guild_id, command.user.id).ok_or(CommandError::NotInVoice)?;
    let outcome = active_session(bot, guild_id)?.vote(action, command.user.id).await?;
    Ok(embeds::create_vote_embed(action, &outcome))
}

// Helpers

/// Members without the configured DJ role go through a vote instead.
async fn needs_vote(bot: &JukeboxBot, command: &CommandInteraction, guild_id: GuildId) -> bool {
    let settings = bot.registry.settings().guild_playback_config(guild_id).await;
    match settings.dj_role_id {
        Some(role) => !command
            .member
            .as_ref()
            .is_some_and(|member| member.roles.contains(&role)),
        None => false,
    }
}

fn active_session(bot: &JukeboxBot, guild_id: GuildId) -> Result<SessionHandle, CommandError> {
    bot.registry
        .get(guild_id)
        .ok_or(CommandError::Session(StateError::NotPlaying.into()))
}

/// Session for the guild, connected to the caller's voice channel.
pub(super) async fn join_caller(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<SessionHandle, CommandError> {
    let channel = user_voice_channel(ctx, guild_id, user_id).ok_or(CommandError::NotInVoice)?;
    let session = bot.registry.get_or_create(guild_id).await;

    if session.snapshot().channel != Some(channel) {
        session.connect(channel).await?;
    }
    Ok(session)
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

pub(super) fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn user_option(command: &CommandInteraction, name: &str) -> Option<UserId> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_user_id())
}

/// Converts a 1-based position from the user into a queue index.
fn position_option(command: &CommandInteraction, name: &'static str) -> Result<usize, CommandError> {
    let position = integer_option(command, name).ok_or(CommandError::MissingOption(name))?;
    to_index(position).ok_or_else(|| CommandError::InvalidOption(position.to_string()))
}

fn to_index(position: i64) -> Option<usize> {
    usize::try_from(position).ok()?.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoundsError;

    #[test]
    fn positions_are_one_based() {
        assert_eq!(to_index(1), Some(0));
        assert_eq!(to_index(12), Some(11));
        assert_eq!(to_index(0), None);
        assert_eq!(to_index(-3), None);
    }

    #[test]
    fn session_errors_use_friendly_wording() {
        let err = CommandError::from(SessionError::State(StateError::NotPlaying));
        assert_eq!(err.to_string(), "Nothing is playing right now");

        let err = CommandError::from(SessionError::Bounds(BoundsError::QueueIndexOutOfBounds {
            position: 4,
            len: 2,
        }));
        assert_eq!(err.to_string(), "Queue position 4 outside 0..2");
    }
}
