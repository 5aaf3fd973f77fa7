use anyhow::Result;
use serenity::{
    builder::{
        CreateActionRow, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{GuildId, UserId},
    },
    prelude::Context,
};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::handlers::{edit_reply, join_caller, string_option, CommandError, CommandResult};
use crate::{
    bot::JukeboxBot,
    error::SessionError,
    sources::Track,
    ui::embeds::{self, colors},
};

pub(super) const SELECT_MENU_ID: &str = "track_selection";

/// Search results shown in the select menu
const MENU_SIZE: usize = 5;

/// Each member's last search results, pickable until `timeout` passes.
pub(crate) struct PendingSearches {
    entries: DashMap<UserId, (Vec<Track>, Instant)>,
    timeout: Duration,
}

impl PendingSearches {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    /// Replaces any earlier results of the same member.
    pub(crate) fn insert(&self, user: UserId, results: Vec<Track>) {
        self.entries.insert(user, (results, Instant::now()));
    }

    /// Removes the member's results and returns the picked one, unless they went stale.
    pub(crate) fn take(&self, user: UserId, index: usize) -> Option<Track> {
        let (_, (results, shown_at)) = self.entries.remove(&user)?;
        if shown_at.elapsed() >= self.timeout {
            debug!("⌛ Search results of {} went stale", user);
            return None;
        }
        results.into_iter().nth(index)
    }

    /// Drops stale results and returns how many went.
    pub(crate) fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, shown_at)| shown_at.elapsed() < self.timeout);
        before - self.entries.len()
    }
}

/// Runs a search and offers the results in a select menu
pub async fn handle_search_command(
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

    let Some(query) = string_option(command, "query") else {
        return edit_reply(ctx, command, Err(CommandError::MissingOption("query"))).await;
    };

    info!(guild = %guild_id, "🔍 Search by {}: {}", command.user.name, query);

    let results = match bot
        .registry
        .resolver()
        .search(query, MENU_SIZE, command.user.id)
        .await
    {
        Ok(results) => results,
        Err(err) => {
            return edit_reply(ctx, command, Err(SessionError::from(err).into())).await;
        }
    };

    let embed = create_search_results_embed(query, &results);
    let menu = create_track_selection_menu(&results);
    bot.pending_searches.insert(command.user.id, results);

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .embed(embed)
                .components(vec![CreateActionRow::SelectMenu(menu)]),
        )
        .await?;

    Ok(())
}

/// Queues the track a member picked from their own search results
pub async fn handle_track_selection(
    ctx: &Context,
    interaction: &ComponentInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    index: usize,
) -> Result<()> {
    let picked = bot.pending_searches.take(interaction.user.id, index);

    let result: CommandResult = async {
        let track = picked.ok_or(CommandError::SearchExpired)?;
        info!(guild = %guild_id, "✅ {} picked {}", interaction.user.name, track);

        let session = join_caller(ctx, bot, guild_id, interaction.user.id).await?;
        let outcome = session.enqueue(track).await?;
        Ok(embeds::create_play_outcome_embed(&outcome))
    }
    .await;

    let embed = result.unwrap_or_else(|err| embeds::create_error_embed("Can't do that", &err.to_string()));
    interaction
        .create_response(
            &ctx.http,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .components(Vec::new()),
            ),
        )
        .await?;

    Ok(())
}

fn create_search_results_embed(query: &str, results: &[Track]) -> CreateEmbed {
    let listing: String = results
        .iter()
        .enumerate()
        .map(|(i, track)| format!("**{}**. {} `[{}]`\n", i + 1, track, duration_text(track)))
        .collect();

    CreateEmbed::default()
        .title("🔍 Search Results")
        .description(format!("Results for **{}**\nPick a song from the menu below:", query))
        .field("Songs", listing, false)
        .color(colors::INFO_BLUE)
}

fn create_track_selection_menu(results: &[Track]) -> CreateSelectMenu {
    let options = results
        .iter()
        .enumerate()
        .map(|(i, track)| {
            CreateSelectMenuOption::new(menu_label(track), format!("track_{}", i))
                .description(track.artist().unwrap_or("Unknown artist").chars().take(100).collect::<String>())
        })
        .collect();

    CreateSelectMenu::new(SELECT_MENU_ID, CreateSelectMenuKind::String { options })
        .placeholder("Pick a song to queue...")
        .min_values(1)
        .max_values(1)
}

fn duration_text(track: &Track) -> String {
    track
        .duration()
        .map(embeds::format_duration)
        .unwrap_or_else(|| "Live".to_string())
}

/// Discord caps option labels at 100 characters
fn menu_label(track: &Track) -> String {
    let label = format!("{} [{}]", track.title(), duration_text(track));
    if label.chars().count() > 100 {
        let mut truncated: String = label.chars().take(97).collect();
        truncated.push_str("...");
        truncated
    } else {
        label
    }
}
