use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::settings::VOLUME_CEILING;

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        search_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        skipto_command(),
        stop_command(),
        queue_command(),
        nowplaying_command(),
        shuffle_command(),
        clear_command(),
        remove_command(),
        move_command(),
        dedupe_command(),
        repeat_command(),
        volume_command(),
        vote_command(),
        join_command(),
        leave_command(),
        help_command(),
    ]
}

/// Registers commands globally
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers commands for one guild (development)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn position_option(name: &str, description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Integer, name, description)
        .min_int_value(1)
        .required(true)
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song or playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Search and pick a song from the results")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Search terms")
                .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current song")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume paused playback")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip to the next song")
}

fn skipto_command() -> CreateCommand {
    CreateCommand::new("skipto")
        .description("Jump to a position in the queue")
        .add_option(position_option("position", "Queue position"))
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and clear the queue")
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current song")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the queue")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear")
        .description("Clear the queue")
        .add_option(CreateCommandOption::new(
            CommandOptionType::User,
            "user",
            "Only remove songs requested by this member",
        ))
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove a song from the queue")
        .add_option(position_option("position", "Queue position"))
}

fn move_command() -> CreateCommand {
    CreateCommand::new("move")
        .description("Move a song within the queue")
        .add_option(position_option("from", "Current position"))
        .add_option(position_option("to", "New position"))
}

fn dedupe_command() -> CreateCommand {
    CreateCommand::new("dedupe").description("Remove duplicate songs from the queue")
}

// Settings

fn repeat_command() -> CreateCommand {
    CreateCommand::new("repeat")
        .description("Set the repeat mode")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Repeat mode")
                .add_string_choice("Off", "off")
                .add_string_choice("Track", "track")
                .add_string_choice("Queue", "queue"),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "times",
                "Replay the current song this many extra times",
            )
            .min_int_value(0)
            .max_int_value(100),
        )
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Show or change the volume")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                format!("Volume level (0-{})", VOLUME_CEILING),
            )
            .min_int_value(0)
            .max_int_value(VOLUME_CEILING.into()),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "reset",
            "Back to the server default",
        ))
}

fn vote_command() -> CreateCommand {
    CreateCommand::new("vote")
        .description("Vote with the channel on an action")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "action", "What to vote for")
                .add_string_choice("Skip", "skip")
                .add_string_choice("Shuffle", "shuffle")
                .add_string_choice("Clear", "clear")
                .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "status",
            "Only show how the vote stands",
        ))
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Show the command list")
}
