//! Reminder handlers: create, list, cancel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::domain::Snowflake;
use crate::error::StoreError;
use crate::persistence::models::{Reminder, ReminderPayload};

/// Body of `POST /reminders`.
#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    /// User to remind.
    pub user_id: Snowflake,
    /// Guild the reminder was set in, if any.
    pub guild_id: Option<Snowflake>,
    /// Channel to deliver the reminder to.
    pub channel_id: Snowflake,
    /// Reminder text.
    pub message: String,
    /// When to fire.
    pub fire_at: DateTime<Utc>,
}

/// Query of `GET /users/{user_id}/reminders`.
#[derive(Debug, Default, Deserialize)]
pub struct ListRemindersParams {
    /// Only reminders for this channel.
    pub channel_id: Option<i64>,
}

/// `POST /reminders` — Create and arm a reminder.
///
/// # Errors
///
/// Returns [`StoreError`] if the reminder had to be persisted and the write
/// failed.
pub async fn create_reminder(
    State(state): State<AppState>,
    Json(req): Json<CreateReminderRequest>,
) -> Result<impl IntoResponse, StoreError> {
    let payload = ReminderPayload::new(req.user_id, req.guild_id, req.channel_id, req.message);
    let reminder = state.reminders.create(req.fire_at, payload).await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

/// `GET /users/{user_id}/reminders` — A user's upcoming reminders.
///
/// # Errors
///
/// Returns [`StoreError`] on storage failure.
pub async fn list_reminders(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<ListRemindersParams>,
) -> Result<Json<Vec<Reminder>>, StoreError> {
    let reminders = state
        .reminders
        .list_for(Snowflake::new(user_id), params.channel_id.map(Snowflake::new))
        .await?;
    Ok(Json(reminders))
}

/// `DELETE /reminders/{reminder_id}` — Cancel a reminder.
///
/// # Errors
///
/// Returns [`StoreError::ReminderNotFound`] for unknown reminders, or a
/// storage failure.
pub async fn cancel_reminder(
    State(state): State<AppState>,
    Path(reminder_id): Path<i64>,
) -> Result<StatusCode, StoreError> {
    state.reminders.cancel(Snowflake::new(reminder_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reminder routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reminders", post(create_reminder))
        .route("/reminders/{reminder_id}", delete(cancel_reminder))
        .route("/users/{user_id}/reminders", get(list_reminders))
}
