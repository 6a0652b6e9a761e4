use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// Canonical tag content.
///
/// Every tag is reached through at least one [`TagLookup`]: the one created
/// alongside it under the same title, plus one per alias. Deleting the tag
/// removes all of them.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tag {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Authoring member. Cleared when the member leaves.
    pub author_id: Option<Snowflake>,
    /// Canonical title, lower-cased.
    pub title: String,
    /// Tag body.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last content edit.
    pub last_edited: Option<DateTime<Utc>>,
}

impl Tag {
    /// A new tag. The title is stored lower-cased.
    #[must_use]
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        author_id: Snowflake,
        title: &str,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            guild_id,
            author_id: Some(author_id),
            title: title.to_lowercase(),
            content: content.into(),
            created_at: Utc::now(),
            last_edited: None,
        }
    }

    /// The lookup row that resolves the canonical title to this tag.
    #[must_use]
    pub fn canonical_lookup(&self, id: Snowflake) -> TagLookup {
        TagLookup {
            id,
            guild_id: self.guild_id,
            tag_id: self.id,
            title: self.title.clone(),
            author_id: self.author_id,
            uses: 0,
        }
    }
}

impl Entity for Tag {
    const SCHEMA: Schema = Schema::new(
        "tags",
        &[
            "id",
            "guild_id",
            "author_id",
            "title",
            "content",
            "created_at",
            "last_edited",
        ],
        "CREATE TABLE tags (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            author_id BIGINT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_edited TIMESTAMPTZ,
            UNIQUE (guild_id, title),
            FOREIGN KEY (author_id, guild_id) REFERENCES members (id, guild_id)
                ON DELETE SET NULL (author_id)
        )",
    )
    .depends_on(&["guilds", "members"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.author_id.into(),
            self.title.clone().into(),
            self.content.clone().into(),
            self.created_at.into(),
            self.last_edited.into(),
        ]
    }
}

/// A title resolving to a canonical [`Tag`]; either its own title or an
/// alias.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TagLookup {
    /// Row id.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Canonical tag.
    pub tag_id: Snowflake,
    /// Title this lookup answers to, lower-cased.
    pub title: String,
    /// Member who created the lookup.
    pub author_id: Option<Snowflake>,
    /// Times the tag was called through this title.
    pub uses: i64,
}

impl TagLookup {
    /// Returns `true` when this lookup is an alias rather than the
    /// canonical title of `tag`.
    #[must_use]
    pub fn is_alias_of(&self, tag: &Tag) -> bool {
        self.tag_id == tag.id && self.title != tag.title
    }
}

impl Entity for TagLookup {
    const SCHEMA: Schema = Schema::new(
        "tag_lookups",
        &["id", "guild_id", "tag_id", "title", "author_id", "uses"],
        "CREATE TABLE tag_lookups (
            id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL REFERENCES guilds (id) ON DELETE CASCADE,
            tag_id BIGINT NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            author_id BIGINT,
            uses BIGINT NOT NULL DEFAULT 0,
            UNIQUE (guild_id, title),
            FOREIGN KEY (author_id, guild_id) REFERENCES members (id, guild_id)
                ON DELETE SET NULL (author_id)
        )",
    )
    .depends_on(&["guilds", "tags", "members"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.guild_id.into(),
            self.tag_id.into(),
            self.title.clone().into(),
            self.author_id.into(),
            self.uses.into(),
        ]
    }
}

/// A tag resolved through one of its lookups.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ResolvedTag {
    /// Lookup the title resolved through.
    pub lookup_id: Snowflake,
    /// Title that was looked up.
    pub lookup_title: String,
    /// `true` when `lookup_title` is an alias.
    pub alias: bool,
    /// Uses through this lookup.
    pub uses: i64,
    /// The canonical tag.
    #[sqlx(flatten)]
    pub tag: Tag,
}

impl ResolvedTag {
    /// Column list for queries joining `tag_lookups l` with `tags t`.
    pub const SELECT: &'static str = "SELECT l.id AS lookup_id, l.title AS lookup_title, \
        l.title <> t.title AS alias, l.uses, t.id, t.guild_id, t.author_id, t.title, \
        t.content, t.created_at, t.last_edited \
        FROM tag_lookups l INNER JOIN tags t ON t.id = l.tag_id";
}

crate::impl_entity_identity!(Tag, TagLookup);
