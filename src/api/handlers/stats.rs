//! Command usage statistics, global and per guild.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::Snowflake;
use crate::error::StoreError;
use crate::service::CommandStats;

/// `GET /stats/commands` — Command usage across every guild.
///
/// # Errors
///
/// Returns [`StoreError`] if the statistics queries fail.
pub async fn global_command_stats(
    State(state): State<AppState>,
) -> Result<Json<CommandStats>, StoreError> {
    Ok(Json(state.guilds.command_stats().await?))
}

/// `GET /guilds/{guild_id}/stats/commands` — Command usage in one guild.
///
/// # Errors
///
/// Returns [`StoreError::GuildNotFound`] if the guild is not registered,
/// or any query failure.
pub async fn guild_command_stats(
    State(state): State<AppState>,
    Path(guild_id): Path<i64>,
) -> Result<Json<CommandStats>, StoreError> {
    let guild_id = Snowflake::new(guild_id);
    let handle = state
        .guilds
        .guild(guild_id)
        .await
        .ok_or(StoreError::GuildNotFound(guild_id))?;
    let stats = handle.read().await.command_stats(state.guilds.db()).await?;
    Ok(Json(stats))
}

/// Statistics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats/commands", get(global_command_stats))
        .route("/guilds/{guild_id}/stats/commands", get(guild_command_stats))
}
