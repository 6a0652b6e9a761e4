//! Outbound events emitted by the persistence core.
//!
//! Events flow through the [`super::EventBus`] to whatever notification
//! collaborator is subscribed. Delivery and formatting are not handled
//! here.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Snowflake;
use crate::persistence::models::Reminder;

/// Event emitted after a state change other components care about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BotEvent {
    /// A reminder reached its fire time. Carries the full payload; the
    /// reminder has already left the active-timer table.
    ReminderCompleted {
        /// The fired reminder.
        reminder: Reminder,
        /// When the timer loop fired it.
        fired_at: DateTime<Utc>,
    },

    /// The bot started tracking a guild it had not seen before.
    GuildJoined {
        /// Guild identifier.
        guild_id: Snowflake,
        /// Registration timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The bot was removed from a guild and its state was discarded.
    GuildRemoved {
        /// Guild identifier.
        guild_id: Snowflake,
        /// Removal timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl BotEvent {
    /// Returns the event type as a string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::ReminderCompleted { .. } => "reminder_completed",
            Self::GuildJoined { .. } => "guild_joined",
            Self::GuildRemoved { .. } => "guild_removed",
        }
    }

    /// Returns the guild the event concerns, if any.
    #[must_use]
    pub const fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::ReminderCompleted { reminder, .. } => reminder.guild_id,
            Self::GuildJoined { guild_id, .. } | Self::GuildRemoved { guild_id, .. } => {
                Some(*guild_id)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_type_tag() {
        let event = BotEvent::GuildJoined {
            guild_id: Snowflake::new(12),
            timestamp: Utc::now(),
        };
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(json.get("event_type").and_then(|v| v.as_str()), Some("guild_joined"));
        assert_eq!(json.get("guild_id").and_then(serde_json::Value::as_i64), Some(12));
        assert_eq!(event.event_type_str(), "guild_joined");
        assert_eq!(event.guild_id(), Some(Snowflake::new(12)));
    }
}
