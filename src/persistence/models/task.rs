use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Snowflake;
use crate::persistence::{Entity, Schema, SqlValue};

/// A to-do item on a user's personal list.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Task {
    /// Row id.
    pub id: Snowflake,
    /// Owner of the list.
    pub author_id: Snowflake,
    /// Task text.
    pub content: String,
    /// When it was added.
    pub created_at: DateTime<Utc>,
    /// Whether it has been ticked off.
    pub finished: bool,
}

impl Task {
    /// An open task added now.
    #[must_use]
    pub fn new(id: Snowflake, author_id: Snowflake, content: impl Into<String>) -> Self {
        Self {
            id,
            author_id,
            content: content.into(),
            created_at: Utc::now(),
            finished: false,
        }
    }
}

impl Entity for Task {
    const SCHEMA: Schema = Schema::new(
        "tasks",
        &["id", "author_id", "content", "created_at", "finished"],
        "CREATE TABLE tasks (
            id BIGINT PRIMARY KEY,
            author_id BIGINT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            finished BOOLEAN NOT NULL DEFAULT FALSE
        )",
    )
    .depends_on(&["accounts"]);

    fn id(&self) -> Snowflake {
        self.id
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            self.author_id.into(),
            self.content.clone().into(),
            self.created_at.into(),
            self.finished.into(),
        ]
    }
}

crate::impl_entity_identity!(Task);
