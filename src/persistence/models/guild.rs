use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// Guild-wide settings. Owns every guild-scoped child row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Guild {
    /// Platform guild id.
    pub id: Snowflake,
    /// Channel greeting new members.
    pub welcome_channel: Option<Snowflake>,
    /// Greeting text.
    pub welcome_message: Option<String>,
    /// Channel announcing departures.
    pub leaving_channel: Option<Snowflake>,
    /// Departure text.
    pub leaving_message: Option<String>,
    /// Whether member activity is tracked.
    pub tracking: bool,
    /// Premium features enabled.
    pub premium: bool,
}

impl Guild {
    /// Default settings for a newly joined guild.
    #[must_use]
    pub const fn new(id: Snowflake) -> Self {
        Self {
            id,
            welcome_channel: None,
            welcome_message: None,
            leaving_channel: None,
            leaving_message: None,
            tracking: true,
            premium: false,
        }
    }

    /// Overwrites every field present in `settings`.
    pub fn apply(&mut self, settings: GuildSettings) {
        let GuildSettings {
            welcome_channel,
            welcome_message,
            leaving_channel,
            leaving_message,
            tracking,
            premium,
        } = settings;
        if let Some(v) = welcome_channel {
            self.welcome_channel = v;
        }
        if let Some(v) = welcome_message {
            self.welcome_message = v;
        }
        if let Some(v) = leaving_channel {
            self.leaving_channel = v;
        }
        if let Some(v) = leaving_message {
            self.leaving_message = v;
        }
        if let Some(v) = tracking {
            self.tracking = v;
        }
        if let Some(v) = premium {
            self.premium = v;
        }
    }
}

impl Entity for Guild {
    const SCHEMA: Schema = Schema::new(
        "guilds",
        &[
            "id",
            "welcome_channel",
            "welcome_message",
            "leaving_channel",
            "leaving_message",
            "tracking",
            "premium",
        ],
        "CREATE TABLE guilds (
            id BIGINT PRIMARY KEY,
            welcome_channel BIGINT,
            welcome_message TEXT,
            leaving_channel BIGINT,
            leaving_message TEXT,
            tracking BOOLEAN NOT NULL DEFAULT TRUE,
            premium BOOLEAN NOT NULL DEFAULT FALSE
        )",
    );

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.welcome_channel.into(),
            self.welcome_message.clone().into(),
            self.leaving_channel.into(),
            self.leaving_message.clone().into(),
            self.tracking.into(),
            self.premium.into(),
        ]
    }
}

/// Partial update of [`Guild`] settings.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildSettings {
    /// New welcome channel.
    pub welcome_channel: Option<Option<Snowflake>>,
    /// New welcome message.
    pub welcome_message: Option<Option<String>>,
    /// New leaving channel.
    pub leaving_channel: Option<Option<Snowflake>>,
    /// New leaving message.
    pub leaving_message: Option<Option<String>>,
    /// New tracking flag.
    pub tracking: Option<bool>,
    /// New premium flag.
    pub premium: Option<bool>,
}

/// A custom command prefix. Unique per guild.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Prefix {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Prefix text.
    pub prefix: String,
    /// Member who added it.
    pub author_id: Option<Snowflake>,
    /// Times the prefix has been used.
    pub uses: i32,
    /// When it was added.
    pub created_at: DateTime<Utc>,
}

impl Prefix {
    /// A new, unused prefix.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        prefix: impl Into<String>,
        author_id: Option<Snowflake>,
    ) -> Self {
        Self {
            id,
            guild_id,
            prefix: prefix.into(),
            author_id,
            uses: 0,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Prefix {
    const SCHEMA: Schema = Schema::new(
        "prefixes",
        &["id", "guild_id", "prefix", "author_id", "uses", "created_at"],
        "CREATE TABLE prefixes (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            prefix TEXT NOT NULL,
            author_id BIGINT,
            uses INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (guild_id, prefix)
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.prefix.clone().into(),
            self.author_id.into(),
            self.uses.into(),
            self.created_at.into(),
        ]
    }
}

/// A frequently asked question and its answer.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Faq {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Member who wrote it.
    pub author_id: Snowflake,
    /// Question text.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// When it was written.
    pub created_at: DateTime<Utc>,
    /// Times it has been shown.
    pub uses: i32,
}

impl Faq {
    /// A new FAQ entry.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        author_id: Snowflake,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id,
            guild_id,
            author_id,
            question: question.into(),
            answer: answer.into(),
            created_at: Utc::now(),
            uses: 0,
        }
    }
}

impl Entity for Faq {
    const SCHEMA: Schema = Schema::new(
        "faqs",
        &[
            "id",
            "guild_id",
            "author_id",
            "question",
            "answer",
            "created_at",
            "uses",
        ],
        "CREATE TABLE faqs (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            author_id BIGINT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            uses INTEGER NOT NULL DEFAULT 0
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.author_id.into(),
            self.question.clone().into(),
            self.answer.clone().into(),
            self.created_at.into(),
            self.uses.into(),
        ]
    }
}

/// Maps a playing-status name to a role granted while members play it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Activity {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Activity name, always lower-cased.
    pub status: String,
    /// Role granted.
    pub role_id: Snowflake,
}

impl Activity {
    /// A new mapping. The activity name is stored lower-cased.
    #[must_use]
    pub fn new(id: Snowflake, guild_id: Snowflake, status: &str, role_id: Snowflake) -> Self {
        Self {
            id,
            guild_id,
            status: status.to_lowercase(),
            role_id,
        }
    }
}

impl Entity for Activity {
    const SCHEMA: Schema = Schema::new(
        "activities",
        &["id", "guild_id", "status", "role_id"],
        "CREATE TABLE activities (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            role_id BIGINT NOT NULL,
            UNIQUE (guild_id, status)
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.status.clone().into(),
            self.role_id.into(),
        ]
    }
}

/// A channel the bot ignores commands in.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelBlock {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Blocked channel.
    pub channel_id: Snowflake,
    /// Member who blocked it.
    pub blocker_id: Snowflake,
    /// Optional reason.
    pub reason: Option<String>,
    /// When the block was placed.
    pub created_at: DateTime<Utc>,
}

impl ChannelBlock {
    /// A new block on `channel_id`.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        channel_id: Snowflake,
        blocker_id: Snowflake,
        reason: Option<String>,
    ) -> Self {
        Self {
            id,
            guild_id,
            channel_id,
            blocker_id,
            reason,
            created_at: Utc::now(),
        }
    }
}

impl Entity for ChannelBlock {
    const SCHEMA: Schema = Schema::new(
        "channel_blocks",
        &[
            "id",
            "guild_id",
            "channel_id",
            "blocker_id",
            "reason",
            "created_at",
        ],
        "CREATE TABLE channel_blocks (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            channel_id BIGINT NOT NULL,
            blocker_id BIGINT NOT NULL,
            reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (guild_id, channel_id)
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.channel_id.into(),
            self.blocker_id.into(),
            self.reason.clone().into(),
            self.created_at.into(),
        ]
    }
}

/// Grants a role to members who react to a message with an emoji.
/// Unique per `(message_id, emoji)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReactionRole {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Message the reaction is watched on.
    pub message_id: Snowflake,
    /// Emoji name or custom emoji mention.
    pub emoji: String,
    /// Role granted.
    pub role_id: Snowflake,
    /// Member who set it up.
    pub author_id: Option<Snowflake>,
    /// When it was created.
    pub created_at: DateTime<Utc>,
}

impl ReactionRole {
    /// A new reaction role binding.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        message_id: Snowflake,
        emoji: impl Into<String>,
        role_id: Snowflake,
        author_id: Option<Snowflake>,
    ) -> Self {
        Self {
            id,
            guild_id,
            message_id,
            emoji: emoji.into(),
            role_id,
            author_id,
            created_at: Utc::now(),
        }
    }
}

impl Entity for ReactionRole {
    const SCHEMA: Schema = Schema::new(
        "reaction_roles",
        &[
            "id",
            "guild_id",
            "message_id",
            "emoji",
            "role_id",
            "author_id",
            "created_at",
        ],
        "CREATE TABLE reaction_roles (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            message_id BIGINT NOT NULL,
            emoji VARCHAR(256) NOT NULL,
            role_id BIGINT NOT NULL,
            author_id BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (message_id, emoji)
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.message_id.into(),
            self.emoji.clone().into(),
            self.role_id.into(),
            self.author_id.into(),
            self.created_at.into(),
        ]
    }
}

crate::impl_entity_identity!(Guild, Prefix, Faq, Activity, ChannelBlock, ReactionRole);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_names_are_lower_cased() {
        let activity = Activity::new(
            Snowflake::new(1),
            Snowflake::new(2),
            "Rocket League",
            Snowflake::new(3),
        );
        assert_eq!(activity.status, "rocket league");
    }

    #[test]
    fn settings_apply_only_present_fields() {
        let mut guild = Guild::new(Snowflake::new(1));
        guild.welcome_message = Some("hi".to_string());
        guild.apply(GuildSettings {
            leaving_message: Some(Some("bye".to_string())),
            premium: Some(true),
            ..GuildSettings::default()
        });
        assert_eq!(guild.welcome_message.as_deref(), Some("hi"));
        assert_eq!(guild.leaving_message.as_deref(), Some("bye"));
        assert!(guild.premium);
        assert!(guild.tracking);

        guild.apply(GuildSettings {
            welcome_message: Some(None),
            ..GuildSettings::default()
        });
        assert_eq!(guild.welcome_message, None);
    }

    #[test]
    fn new_guild_tracks_by_default() {
        let guild = Guild::new(Snowflake::new(5));
        assert!(guild.tracking);
        assert!(!guild.premium);
        assert_eq!(guild.values().len(), Guild::SCHEMA.columns.len());
    }
}
