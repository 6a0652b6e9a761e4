//! Append-only audit rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// One invocation of a bot command.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommandCall {
    /// Row id.
    pub id: Snowflake,
    /// Guild it was called in, `None` for direct messages.
    pub guild_id: Option<Snowflake>,
    /// Calling user.
    pub author_id: Snowflake,
    /// Qualified command name.
    pub command: String,
    /// Call time.
    pub called_at: DateTime<Utc>,
}

impl CommandCall {
    /// A call recorded now.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Option<Snowflake>,
        author_id: Snowflake,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id,
            guild_id,
            author_id,
            command: command.into(),
            called_at: Utc::now(),
        }
    }
}

impl Entity for CommandCall {
    const SCHEMA: Schema = Schema::new(
        "command_calls",
        &["id", "guild_id", "author_id", "command", "called_at"],
        "CREATE TABLE command_calls (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT REFERENCES guilds (id) ON DELETE CASCADE,
            author_id BIGINT NOT NULL,
            command TEXT NOT NULL,
            called_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS command_calls_guild_idx ON command_calls (guild_id, called_at)",
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
            self.command.clone().into(),
            self.called_at.into(),
        ]
    }
}

/// One use of a tag, through a specific lookup title.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TagCall {
    /// Row id.
    pub id: Snowflake,
    /// Lookup the tag was called through.
    pub tag_lookup_id: Snowflake,
    /// Guild it was called in.
    pub guild_id: Snowflake,
    /// Calling user.
    pub author_id: Snowflake,
    /// Channel it was called in.
    pub channel_id: Snowflake,
    /// Call time.
    pub called_at: DateTime<Utc>,
}

impl TagCall {
    /// A call recorded now.
    #[must_use]
    pub fn new(
        id: Snowflake,
        tag_lookup_id: Snowflake,
        guild_id: Snowflake,
        author_id: Snowflake,
        channel_id: Snowflake,
    ) -> Self {
        Self {
            id,
            tag_lookup_id,
            guild_id,
            author_id,
            channel_id,
            called_at: Utc::now(),
        }
    }
}

impl Entity for TagCall {
    const SCHEMA: Schema = Schema::new(
        "tag_calls",
        &[
            "id",
            "tag_lookup_id",
            "guild_id",
            "author_id",
            "channel_id",
            "called_at",
        ],
        "CREATE TABLE tag_calls (
            id BIGINT PRIMARY KEY,
            tag_lookup_id BIGINT NOT NULL,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            author_id BIGINT NOT NULL,
            channel_id BIGINT NOT NULL,
            called_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .depends_on(&["guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.tag_lookup_id.into(),
            self.guild_id.into(),
            self.author_id.into(),
            self.channel_id.into(),
            self.called_at.into(),
        ]
    }
}

crate::impl_entity_identity!(CommandCall, TagCall);
