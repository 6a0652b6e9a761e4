use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// Event name carried by reminders unless the caller picks another one.
pub const REMINDER_COMPLETE_EVENT: &str = "reminder_complete";

/// What a reminder delivers when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    /// User to remind.
    pub user_id: Snowflake,
    /// Guild the reminder was set in, `None` for direct messages.
    pub guild_id: Option<Snowflake>,
    /// Channel to deliver to.
    pub channel_id: Snowflake,
    /// Reminder text.
    pub message: String,
    /// Event name dispatched on completion.
    pub event: String,
}

impl ReminderPayload {
    /// A payload dispatched as [`REMINDER_COMPLETE_EVENT`].
    #[must_use]
    pub fn new(
        user_id: Snowflake,
        guild_id: Option<Snowflake>,
        channel_id: Snowflake,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            guild_id,
            channel_id,
            message: message.into(),
            event: REMINDER_COMPLETE_EVENT.to_string(),
        }
    }
}

/// A deferred notification.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reminder {
    /// Row id.
    pub id: Snowflake,
    /// User to remind.
    pub user_id: Snowflake,
    /// Guild the reminder was set in.
    pub guild_id: Option<Snowflake>,
    /// Channel to deliver to.
    pub channel_id: Snowflake,
    /// Reminder text.
    pub message: String,
    /// Event name dispatched on completion.
    pub event: String,
    /// When the reminder was set.
    pub created_at: DateTime<Utc>,
    /// When it fires.
    pub fire_at: DateTime<Utc>,
}

impl Reminder {
    /// A reminder created now, firing at `fire_at`.
    #[must_use]
    pub fn new(id: Snowflake, fire_at: DateTime<Utc>, payload: ReminderPayload) -> Self {
        let ReminderPayload {
            user_id,
            guild_id,
            channel_id,
            message,
            event,
        } = payload;
        Self {
            id,
            user_id,
            guild_id,
            channel_id,
            message,
            event,
            created_at: Utc::now(),
            fire_at,
        }
    }

    /// Returns `true` once `fire_at` is not after `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }
}

impl Entity for Reminder {
    const SCHEMA: Schema = Schema::new(
        "reminders",
        &[
            "id",
            "user_id",
            "guild_id",
            "channel_id",
            "message",
            "event",
            "created_at",
            "fire_at",
        ],
        "CREATE TABLE reminders (
            id BIGINT PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            guild_id BIGINT REFERENCES guilds (id) ON DELETE CASCADE,
            channel_id BIGINT NOT NULL,
            message TEXT NOT NULL,
            event TEXT NOT NULL DEFAULT 'reminder_complete',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            fire_at TIMESTAMPTZ NOT NULL
        );
        CREATE INDEX IF NOT EXISTS reminders_fire_at_idx ON reminders (fire_at)",
    )
    .depends_on(&["accounts", "guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.user_id.into(),
            self.guild_id.into(),
            self.channel_id.into(),
            self.message.clone().into(),
            self.event.clone().into(),
            self.created_at.into(),
            self.fire_at.into(),
        ]
    }
}

crate::impl_entity_identity!(Reminder);
