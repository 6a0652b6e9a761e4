use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// A platform user, shared across guilds.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    /// Platform user id.
    pub id: Snowflake,
    /// Free-form location set by the user.
    pub location: Option<String>,
    /// Whether the user is barred from using the bot.
    pub blocked: bool,
}

impl Account {
    /// A fresh, unblocked account.
    #[must_use]
    pub const fn new(id: Snowflake) -> Self {
        Self {
            id,
            location: None,
            blocked: false,
        }
    }
}

impl Entity for Account {
    const SCHEMA: Schema = Schema::new(
        "accounts",
        &["id", "location", "blocked"],
        "CREATE TABLE accounts (
            id BIGINT PRIMARY KEY,
            location TEXT,
            blocked BOOLEAN NOT NULL DEFAULT FALSE
        )",
    );

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.location.clone().into(),
            self.blocked.into(),
        ]
    }
}

/// A user's membership in one guild. Keyed by `(id, guild_id)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Member {
    /// Platform user id.
    pub id: Snowflake,
    /// Guild the membership belongs to.
    pub guild_id: Snowflake,
    /// Last time the member sent a message.
    pub last_spoke: Option<DateTime<Utc>>,
    /// Activity level.
    pub level: i32,
    /// Experience towards the next level.
    pub experience: i32,
    /// Guild currency balance.
    pub wallet: i64,
    /// Whether the member administers the bot in this guild.
    pub administrator: bool,
}

impl Member {
    /// A fresh membership with zeroed progress.
    #[must_use]
    pub const fn new(id: Snowflake, guild_id: Snowflake) -> Self {
        Self {
            id,
            guild_id,
            last_spoke: None,
            level: 0,
            experience: 0,
            wallet: 0,
            administrator: false,
        }
    }
}

impl Entity for Member {
    const SCHEMA: Schema = Schema::new(
        "members",
        &[
            "id",
            "guild_id",
            "last_spoke",
            "level",
            "experience",
            "wallet",
            "administrator",
        ],
        "CREATE TABLE members (
            id BIGINT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            last_spoke TIMESTAMPTZ,
            level INTEGER NOT NULL DEFAULT 0,
            experience INTEGER NOT NULL DEFAULT 0,
            wallet BIGINT NOT NULL DEFAULT 0,
            administrator BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (id, guild_id)
        )",
    )
    .with_primary_key(&["id", "guild_id"])
    .depends_on(&["accounts", "guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.last_spoke.into(),
            self.level.into(),
            self.experience.into(),
            self.wallet.into(),
            self.administrator.into(),
        ]
    }
}

/// One entry of a member's nickname history.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Nickname {
    /// Row id.
    pub id: Snowflake,
    /// Member the nickname belonged to.
    pub member_id: Snowflake,
    /// Guild the nickname was used in.
    pub guild_id: Snowflake,
    /// The nickname.
    pub nickname: String,
    /// When the member switched to it.
    pub changed_at: DateTime<Utc>,
}

impl Nickname {
    /// A nickname adopted now.
    #[must_use]
    pub fn new(
        id: Snowflake,
        member_id: Snowflake,
        guild_id: Snowflake,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            id,
            member_id,
            guild_id,
            nickname: nickname.into(),
            changed_at: Utc::now(),
        }
    }
}

impl Entity for Nickname {
    const SCHEMA: Schema = Schema::new(
        "nicknames",
        &["id", "member_id", "guild_id", "nickname", "changed_at"],
        "CREATE TABLE nicknames (
            id BIGINT PRIMARY KEY,
            member_id BIGINT NOT NULL,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            nickname TEXT NOT NULL,
            changed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            FOREIGN KEY (member_id, guild_id) REFERENCES members (id, guild_id) ON DELETE CASCADE
        )",
    )
    .depends_on(&["members", "guilds"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.member_id.into(),
            self.guild_id.into(),
            self.nickname.clone().into(),
            self.changed_at.into(),
        ]
    }
}

crate::impl_entity_identity!(Account, Nickname);

// A member is identified by the user and the guild together.
impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.guild_id == other.guild_id
    }
}

impl Eq for Member {}

impl std::hash::Hash for Member {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&(self.id, self.guild_id), state);
    }
}
