//! Per-guild cache of guild-scoped state.
//!
//! A [`GuildAggregate`] is the single point of mutation for one guild. Every
//! cached collection changes only after the matching write has been
//! committed, so the cache never holds a row storage does not. Leaderboards,
//! searches and statistics are read-mostly and always go to storage.

use std::collections::HashMap;

use futures_util::TryStreamExt;
use serde::Serialize;

use super::reminder_scheduler::LIST_LIMIT;
use super::stats::{self, CommandStats, LEADERBOARD_SIZE, TagStats, UserCount};
use crate::domain::Snowflake;
use crate::error::StoreError;
use crate::persistence::models::{
    Activity, ChannelBlock, CommandCall, Faq, Guild, GuildSettings, Nickname, Prefix, ReactionRole,
    Reminder, ResolvedTag, Tag, TagCall, TagLookup,
};
use crate::persistence::{BindValues, Entity, PersistenceClient, SqlValue, ensure_member};

/// `tag_lookups` columns qualified with the `l` alias.
const LOOKUP_COLUMNS: &str = "l.id, l.guild_id, l.tag_id, l.title, l.author_id, l.uses";

/// Where a tag title resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TagIndexEntry {
    /// The lookup row for this title.
    pub lookup_id: Snowflake,
    /// The canonical tag the lookup points at.
    pub tag_id: Snowflake,
}

/// In-memory owner of one guild's scoped collections.
///
/// Collections are keyed by natural key: prefix text, FAQ id, lower-cased
/// activity name, channel id, `(message id, emoji)` and tag title.
#[derive(Debug, Clone)]
pub struct GuildAggregate {
    guild: Guild,
    prefixes: HashMap<String, Prefix>,
    faqs: HashMap<Snowflake, Faq>,
    activities: HashMap<String, Activity>,
    blocked_channels: HashMap<Snowflake, ChannelBlock>,
    reaction_roles: HashMap<(Snowflake, String), ReactionRole>,
    tags: HashMap<String, TagIndexEntry>,
}

impl GuildAggregate {
    /// An aggregate with empty collections, for a guild with no stored
    /// children yet.
    #[must_use]
    pub fn new(guild: Guild) -> Self {
        Self {
            guild,
            prefixes: HashMap::new(),
            faqs: HashMap::new(),
            activities: HashMap::new(),
            blocked_channels: HashMap::new(),
            reaction_roles: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    /// Loads every cached collection of `guild` from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any collection fails to load.
    pub async fn load(db: &PersistenceClient, guild: Guild) -> Result<Self, StoreError> {
        let guild_id = guild.id;
        let (prefixes, faqs, activities, blocks, reaction_roles, lookups) = tokio::try_join!(
            load_children::<Prefix>(db, guild_id),
            load_children::<Faq>(db, guild_id),
            load_children::<Activity>(db, guild_id),
            load_children::<ChannelBlock>(db, guild_id),
            load_children::<ReactionRole>(db, guild_id),
            load_children::<TagLookup>(db, guild_id),
        )?;

        let aggregate = Self {
            guild,
            prefixes: prefixes.into_iter().map(|p| (p.prefix.clone(), p)).collect(),
            faqs: faqs.into_iter().map(|f| (f.id, f)).collect(),
            activities: activities
                .into_iter()
                .map(|a| (a.status.clone(), a))
                .collect(),
            blocked_channels: blocks.into_iter().map(|b| (b.channel_id, b)).collect(),
            reaction_roles: reaction_roles
                .into_iter()
                .map(|r| ((r.message_id, r.emoji.clone()), r))
                .collect(),
            tags: lookups
                .into_iter()
                .map(|l| {
                    let entry = TagIndexEntry {
                        lookup_id: l.id,
                        tag_id: l.tag_id,
                    };
                    (l.title, entry)
                })
                .collect(),
        };
        tracing::debug!(
            %guild_id,
            prefixes = aggregate.prefixes.len(),
            faqs = aggregate.faqs.len(),
            activities = aggregate.activities.len(),
            blocked_channels = aggregate.blocked_channels.len(),
            reaction_roles = aggregate.reaction_roles.len(),
            tags = aggregate.tags.len(),
            "guild aggregate loaded"
        );
        Ok(aggregate)
    }

    /// Guild id.
    #[must_use]
    pub const fn id(&self) -> Snowflake {
        self.guild.id
    }

    /// Current guild settings row.
    #[must_use]
    pub const fn guild(&self) -> &Guild {
        &self.guild
    }

    /// Persists `settings` over the current guild row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails; the cached row is then
    /// unchanged.
    pub async fn update_settings(
        &mut self,
        db: &PersistenceClient,
        settings: GuildSettings,
    ) -> Result<&Guild, StoreError> {
        let mut updated = self.guild.clone();
        updated.apply(settings);
        updated.save(db).await?;
        self.guild = updated;
        tracing::info!(guild_id = %self.id(), "guild settings updated");
        Ok(&self.guild)
    }

    // ---- prefixes ----

    /// Cached prefixes.
    pub fn prefixes(&self) -> impl Iterator<Item = &Prefix> {
        self.prefixes.values()
    }

    /// Cached prefix by text.
    #[must_use]
    pub fn prefix(&self, text: &str) -> Option<&Prefix> {
        self.prefixes.get(text)
    }

    /// Adds a command prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the guild already has this
    /// prefix, or any other write failure. The cache is untouched on error.
    pub async fn add_prefix(
        &mut self,
        db: &PersistenceClient,
        text: &str,
        author_id: Option<Snowflake>,
    ) -> Result<Prefix, StoreError> {
        let prefix = Prefix::new(db.next_id(), self.id(), text, author_id);
        prefix.save(db).await?;
        tracing::info!(guild_id = %self.id(), prefix = text, "prefix added");
        self.prefixes.insert(prefix.prefix.clone(), prefix.clone());
        Ok(prefix)
    }

    /// Removes a prefix. Returns `None` if the guild has no such prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the prefix stays cached.
    pub async fn remove_prefix(
        &mut self,
        db: &PersistenceClient,
        text: &str,
    ) -> Result<Option<Prefix>, StoreError> {
        let Some(prefix) = self.prefixes.get(text) else {
            return Ok(None);
        };
        prefix.delete(db).await?;
        tracing::info!(guild_id = %self.id(), prefix = text, "prefix removed");
        Ok(self.prefixes.remove(text))
    }

    /// Counts one use of a prefix. Returns `false` if it is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn record_prefix_use(
        &mut self,
        db: &PersistenceClient,
        text: &str,
    ) -> Result<bool, StoreError> {
        let updated = db
            .execute(
                "UPDATE prefixes SET uses = uses + 1 WHERE guild_id = $1 AND prefix = $2",
                vec![self.id().into(), text.into()],
            )
            .await?;
        if updated > 0
            && let Some(prefix) = self.prefixes.get_mut(text)
        {
            prefix.uses = prefix.uses.saturating_add(1);
        }
        Ok(updated > 0)
    }

    // ---- faqs ----

    /// Cached FAQs.
    pub fn faqs(&self) -> impl Iterator<Item = &Faq> {
        self.faqs.values()
    }

    /// Cached FAQ by id.
    #[must_use]
    pub fn faq(&self, id: Snowflake) -> Option<&Faq> {
        self.faqs.get(&id)
    }

    /// Adds a question and answer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn add_faq(
        &mut self,
        db: &PersistenceClient,
        author_id: Snowflake,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<Faq, StoreError> {
        let faq = Faq::new(db.next_id(), self.id(), author_id, question, answer);
        faq.save(db).await?;
        tracing::info!(guild_id = %self.id(), faq_id = %faq.id, "faq added");
        self.faqs.insert(faq.id, faq.clone());
        Ok(faq)
    }

    /// Removes a FAQ. Returns `None` if the guild has no such FAQ.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the FAQ stays cached.
    pub async fn remove_faq(
        &mut self,
        db: &PersistenceClient,
        id: Snowflake,
    ) -> Result<Option<Faq>, StoreError> {
        let Some(faq) = self.faqs.get(&id) else {
            return Ok(None);
        };
        faq.delete(db).await?;
        tracing::info!(guild_id = %self.id(), faq_id = %id, "faq removed");
        Ok(self.faqs.remove(&id))
    }

    // ---- activities ----

    /// Cached activity-role mappings.
    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }

    /// Mapping for an activity name, matched case-insensitively.
    #[must_use]
    pub fn activity(&self, name: &str) -> Option<&Activity> {
        self.activities.get(&name.to_lowercase())
    }

    /// Maps an activity name to a role.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the activity is already mapped,
    /// or any other write failure.
    pub async fn add_activity(
        &mut self,
        db: &PersistenceClient,
        name: &str,
        role_id: Snowflake,
    ) -> Result<Activity, StoreError> {
        let activity = Activity::new(db.next_id(), self.id(), name, role_id);
        activity.save(db).await?;
        tracing::info!(
            guild_id = %self.id(),
            activity = %activity.status,
            %role_id,
            "activity mapped"
        );
        self.activities
            .insert(activity.status.clone(), activity.clone());
        Ok(activity)
    }

    /// Drops an activity mapping. Returns `None` if it was not mapped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the mapping stays cached.
    pub async fn remove_activity(
        &mut self,
        db: &PersistenceClient,
        name: &str,
    ) -> Result<Option<Activity>, StoreError> {
        let key = name.to_lowercase();
        let Some(activity) = self.activities.get(&key) else {
            return Ok(None);
        };
        activity.delete(db).await?;
        tracing::info!(guild_id = %self.id(), activity = %key, "activity unmapped");
        Ok(self.activities.remove(&key))
    }

    // ---- channel blocks ----

    /// Cached channel blocks.
    pub fn blocked_channels(&self) -> impl Iterator<Item = &ChannelBlock> {
        self.blocked_channels.values()
    }

    /// Returns `true` if commands are blocked in `channel_id`.
    #[must_use]
    pub fn is_channel_blocked(&self, channel_id: Snowflake) -> bool {
        self.blocked_channels.contains_key(&channel_id)
    }

    /// Blocks commands in a channel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the channel is already
    /// blocked, or any other write failure.
    pub async fn block_channel(
        &mut self,
        db: &PersistenceClient,
        channel_id: Snowflake,
        blocker_id: Snowflake,
        reason: Option<String>,
    ) -> Result<ChannelBlock, StoreError> {
        let block = ChannelBlock::new(db.next_id(), self.id(), channel_id, blocker_id, reason);
        block.save(db).await?;
        tracing::info!(guild_id = %self.id(), %channel_id, "channel blocked");
        self.blocked_channels.insert(channel_id, block.clone());
        Ok(block)
    }

    /// Lifts a channel block. Returns `None` if the channel was not
    /// blocked.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the block stays cached.
    pub async fn unblock_channel(
        &mut self,
        db: &PersistenceClient,
        channel_id: Snowflake,
    ) -> Result<Option<ChannelBlock>, StoreError> {
        let Some(block) = self.blocked_channels.get(&channel_id) else {
            return Ok(None);
        };
        block.delete(db).await?;
        tracing::info!(guild_id = %self.id(), %channel_id, "channel unblocked");
        Ok(self.blocked_channels.remove(&channel_id))
    }

    // ---- reaction roles ----

    /// Cached reaction roles.
    pub fn reaction_roles(&self) -> impl Iterator<Item = &ReactionRole> {
        self.reaction_roles.values()
    }

    /// Role bound to `emoji` on `message_id`, if any.
    #[must_use]
    pub fn reaction_role(&self, message_id: Snowflake, emoji: &str) -> Option<&ReactionRole> {
        self.reaction_roles.get(&(message_id, emoji.to_string()))
    }

    /// Binds a role to reactions with `emoji` on `message_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the emoji is already bound on
    /// that message, or any other write failure.
    pub async fn add_reaction_role(
        &mut self,
        db: &PersistenceClient,
        message_id: Snowflake,
        emoji: &str,
        role_id: Snowflake,
        author_id: Option<Snowflake>,
    ) -> Result<ReactionRole, StoreError> {
        let binding =
            ReactionRole::new(db.next_id(), self.id(), message_id, emoji, role_id, author_id);
        binding.save(db).await?;
        tracing::info!(guild_id = %self.id(), %message_id, emoji, %role_id, "reaction role added");
        self.reaction_roles
            .insert((message_id, binding.emoji.clone()), binding.clone());
        Ok(binding)
    }

    /// Unbinds a reaction role. Returns `None` if nothing was bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the binding stays cached.
    pub async fn remove_reaction_role(
        &mut self,
        db: &PersistenceClient,
        message_id: Snowflake,
        emoji: &str,
    ) -> Result<Option<ReactionRole>, StoreError> {
        let key = (message_id, emoji.to_string());
        let Some(binding) = self.reaction_roles.get(&key) else {
            return Ok(None);
        };
        binding.delete(db).await?;
        tracing::info!(guild_id = %self.id(), %message_id, emoji, "reaction role removed");
        Ok(self.reaction_roles.remove(&key))
    }

    // ---- nicknames ----

    /// Appends a nickname to a member's history, creating the member if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails.
    pub async fn record_nickname(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
        nickname: &str,
    ) -> Result<Nickname, StoreError> {
        let entry = Nickname::new(db.next_id(), member_id, self.id(), nickname);
        let mut tx = db.begin().await?;
        ensure_member(&mut *tx, member_id, self.id()).await?;
        db.upsert_on(&mut *tx, &entry).await?;
        tx.commit().await?;
        tracing::debug!(guild_id = %self.id(), %member_id, "nickname recorded");
        Ok(entry)
    }

    /// A member's nicknames in this guild, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn nickname_history(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
    ) -> Result<Vec<Nickname>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 AND member_id = $2 ORDER BY changed_at DESC, id DESC",
            db.statements::<Nickname>()?.select_all()
        );
        db.get_vec(&query, vec![self.id().into(), member_id.into()])
            .await
    }

    // ---- tags ----

    /// Index entry for a tag title or alias.
    #[must_use]
    pub fn tag_entry(&self, title: &str) -> Option<TagIndexEntry> {
        self.tags.get(&title.to_lowercase()).copied()
    }

    /// Every cached tag title and alias, unordered.
    pub fn tag_titles(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Creates a tag and its canonical lookup in one transaction.
    ///
    /// The author's account and membership rows are created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the title is taken, or any
    /// other write failure. Nothing is stored or cached on error.
    pub async fn create_tag(
        &mut self,
        db: &PersistenceClient,
        author_id: Snowflake,
        title: &str,
        content: impl Into<String>,
    ) -> Result<Tag, StoreError> {
        let tag = Tag::new(db.next_id(), self.id(), author_id, title, content);
        let lookup = tag.canonical_lookup(db.next_id());

        let mut tx = db.begin().await?;
        ensure_member(&mut *tx, author_id, self.id()).await?;
        db.upsert_on(&mut *tx, &tag).await?;
        db.upsert_on(&mut *tx, &lookup).await?;
        tx.commit().await?;

        tracing::info!(guild_id = %self.id(), tag = %tag.title, tag_id = %tag.id, "tag created");
        self.tags.insert(
            lookup.title,
            TagIndexEntry {
                lookup_id: lookup.id,
                tag_id: tag.id,
            },
        );
        Ok(tag)
    }

    /// Adds `alias` as another title for the tag `original` resolves to.
    ///
    /// Returns `None` if `original` does not resolve.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if `alias` is taken, or any other
    /// write failure.
    pub async fn create_alias(
        &mut self,
        db: &PersistenceClient,
        author_id: Snowflake,
        original: &str,
        alias: &str,
    ) -> Result<Option<TagLookup>, StoreError> {
        let columns = db.statements::<TagLookup>()?.column_list();
        let query = format!(
            "INSERT INTO tag_lookups ({columns}) \
             SELECT $1, guild_id, tag_id, $2, $3, 0 FROM tag_lookups \
             WHERE guild_id = $4 AND title = $5 RETURNING {columns}"
        );

        let mut tx = db.begin().await?;
        ensure_member(&mut *tx, author_id, self.id()).await?;
        let created = sqlx::query_as::<_, TagLookup>(&query)
            .bind_values(vec![
                db.next_id().into(),
                alias.to_lowercase().into(),
                author_id.into(),
                self.id().into(),
                original.to_lowercase().into(),
            ])
            .fetch_optional(&mut *tx)
            .await?;
        let Some(created) = created else {
            return Ok(None);
        };
        tx.commit().await?;

        tracing::info!(
            guild_id = %self.id(),
            alias = %created.title,
            tag_id = %created.tag_id,
            "tag alias created"
        );
        self.tags.insert(
            created.title.clone(),
            TagIndexEntry {
                lookup_id: created.id,
                tag_id: created.tag_id,
            },
        );
        Ok(Some(created))
    }

    /// Resolves a title or alias to its tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn get_tag(
        &self,
        db: &PersistenceClient,
        title: &str,
    ) -> Result<Option<ResolvedTag>, StoreError> {
        let query = format!("{} WHERE l.guild_id = $1 AND l.title = $2", ResolvedTag::SELECT);
        db.get_one(&query, vec![self.id().into(), title.to_lowercase().into()])
            .await
    }

    /// Fetches a canonical tag of this guild by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn tag_by_id(
        &self,
        db: &PersistenceClient,
        tag_id: Snowflake,
    ) -> Result<Option<Tag>, StoreError> {
        let tag = db.get_by_key::<Tag>(vec![tag_id.into()]).await?;
        Ok(tag.filter(|t| t.guild_id == self.id()))
    }

    /// Replaces the content of the tag `title` resolves to. Returns `None`
    /// if the title does not resolve.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn edit_tag(
        &mut self,
        db: &PersistenceClient,
        title: &str,
        content: impl Into<String>,
    ) -> Result<Option<Tag>, StoreError> {
        let Some(entry) = self.tag_entry(title) else {
            return Ok(None);
        };
        let content: String = content.into();
        let query = format!(
            "UPDATE tags SET content = $1, last_edited = now() \
             WHERE id = $2 AND guild_id = $3 RETURNING {}",
            db.statements::<Tag>()?.column_list()
        );
        let edited: Option<Tag> = db
            .get_one(
                &query,
                vec![content.into(), entry.tag_id.into(), self.id().into()],
            )
            .await?;
        if edited.is_some() {
            tracing::info!(guild_id = %self.id(), tag_id = %entry.tag_id, "tag edited");
        }
        Ok(edited)
    }

    /// Deletes the canonical tag `title` resolves to, together with every
    /// alias of it. Returns `None` if the title does not resolve.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; the index is then
    /// unchanged.
    pub async fn delete_tag(
        &mut self,
        db: &PersistenceClient,
        title: &str,
    ) -> Result<Option<Tag>, StoreError> {
        let Some(entry) = self.tag_entry(title) else {
            return Ok(None);
        };
        let query = format!(
            "DELETE FROM tags WHERE id = $1 AND guild_id = $2 RETURNING {}",
            db.statements::<Tag>()?.column_list()
        );
        let deleted: Option<Tag> = db
            .get_one(&query, vec![entry.tag_id.into(), self.id().into()])
            .await?;
        if deleted.is_some() {
            let before = self.tags.len();
            self.tags.retain(|_, e| e.tag_id != entry.tag_id);
            tracing::info!(
                guild_id = %self.id(),
                tag_id = %entry.tag_id,
                lookups = before - self.tags.len(),
                "tag deleted"
            );
        }
        Ok(deleted)
    }

    /// Deletes an alias, leaving its tag in place. Returns `None` if
    /// `alias` is not an alias of any tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_alias(
        &mut self,
        db: &PersistenceClient,
        alias: &str,
    ) -> Result<Option<TagLookup>, StoreError> {
        let key = alias.to_lowercase();
        let query = format!(
            "DELETE FROM tag_lookups l USING tags t \
             WHERE t.id = l.tag_id AND l.title <> t.title \
             AND l.guild_id = $1 AND l.title = $2 RETURNING {LOOKUP_COLUMNS}"
        );
        let deleted: Option<TagLookup> = db
            .get_one(&query, vec![self.id().into(), key.clone().into()])
            .await?;
        if deleted.is_some() {
            self.tags.remove(&key);
            tracing::info!(guild_id = %self.id(), alias = %key, "tag alias deleted");
        }
        Ok(deleted)
    }

    /// Aliases of the tag `title` resolves to, excluding its canonical
    /// title.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn aliases_of(
        &self,
        db: &PersistenceClient,
        title: &str,
    ) -> Result<Vec<TagLookup>, StoreError> {
        let query = format!(
            "SELECT {LOOKUP_COLUMNS} FROM tag_lookups l INNER JOIN tags t ON t.id = l.tag_id \
             WHERE l.guild_id = $1 AND l.title <> t.title AND l.tag_id = \
             (SELECT tag_id FROM tag_lookups WHERE guild_id = $1 AND title = $2) \
             ORDER BY l.title"
        );
        db.get_vec(&query, vec![self.id().into(), title.to_lowercase().into()])
            .await
    }

    /// Invokes a tag: counts the use, records who called it where, and
    /// returns its content. Returns `None` if the title does not resolve.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any step fails; the transaction is then
    /// rolled back.
    pub async fn call_tag(
        &self,
        db: &PersistenceClient,
        title: &str,
        author_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<Option<String>, StoreError> {
        let mut tx = db.begin().await?;
        let resolved = sqlx::query_as::<_, (Snowflake, String)>(
            "UPDATE tag_lookups l SET uses = l.uses + 1 FROM tags t \
             WHERE t.id = l.tag_id AND l.guild_id = $1 AND l.title = $2 \
             RETURNING l.id, t.content",
        )
        .bind_values(vec![self.id().into(), title.to_lowercase().into()])
        .fetch_optional(&mut *tx)
        .await?;
        let Some((lookup_id, content)) = resolved else {
            return Ok(None);
        };
        let call = TagCall::new(db.next_id(), lookup_id, self.id(), author_id, channel_id);
        db.upsert_on(&mut *tx, &call).await?;
        tx.commit().await?;
        Ok(Some(content))
    }

    /// Up to five lookups whose title contains `needle`, most used first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn search_tags(
        &self,
        db: &PersistenceClient,
        needle: &str,
    ) -> Result<Vec<TagLookup>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 AND title ILIKE $2 \
             ORDER BY uses DESC, title LIMIT {LEADERBOARD_SIZE}",
            db.statements::<TagLookup>()?.select_all()
        );
        let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
        db.get_vec(&query, vec![self.id().into(), pattern.into()])
            .await
    }

    /// A random tag of this guild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn random_tag(&self, db: &PersistenceClient) -> Result<Option<Tag>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 ORDER BY random() LIMIT 1",
            db.statements::<Tag>()?.select_all()
        );
        db.get_one(&query, vec![self.id().into()]).await
    }

    /// Tags authored by `member_id`, by title.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn member_tags(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
    ) -> Result<Vec<Tag>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 AND author_id = $2 ORDER BY title",
            db.statements::<Tag>()?.select_all()
        );
        db.get_vec(&query, vec![self.id().into(), member_id.into()])
            .await
    }

    /// Lookup count and total uses across the guild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn tag_stats(&self, db: &PersistenceClient) -> Result<TagStats, StoreError> {
        self.lookup_totals(db, None).await
    }

    /// Lookup count and total uses of lookups created by `member_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn member_tag_stats(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
    ) -> Result<TagStats, StoreError> {
        self.lookup_totals(db, Some(member_id)).await
    }

    async fn lookup_totals(
        &self,
        db: &PersistenceClient,
        author_id: Option<Snowflake>,
    ) -> Result<TagStats, StoreError> {
        let stats: Option<TagStats> = db
            .get_one(
                "SELECT COUNT(*) AS lookups, COALESCE(SUM(uses), 0)::BIGINT AS uses \
                 FROM tag_lookups WHERE guild_id = $1 AND ($2::BIGINT IS NULL OR author_id = $2)",
                vec![self.id().into(), author_id.into()],
            )
            .await?;
        Ok(stats.unwrap_or_default())
    }

    /// The five most used lookups.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn top_tags(&self, db: &PersistenceClient) -> Result<Vec<TagLookup>, StoreError> {
        self.top_lookups(db, None).await
    }

    /// The five most used lookups created by `member_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn member_top_tags(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
    ) -> Result<Vec<TagLookup>, StoreError> {
        self.top_lookups(db, Some(member_id)).await
    }

    async fn top_lookups(
        &self,
        db: &PersistenceClient,
        author_id: Option<Snowflake>,
    ) -> Result<Vec<TagLookup>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 AND ($2::BIGINT IS NULL OR author_id = $2) \
             ORDER BY uses DESC, title LIMIT {LEADERBOARD_SIZE}",
            db.statements::<TagLookup>()?.select_all()
        );
        db.get_vec(&query, vec![self.id().into(), author_id.into()])
            .await
    }

    /// Users who called tags most often.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn top_tag_users(
        &self,
        db: &PersistenceClient,
    ) -> Result<Vec<UserCount>, StoreError> {
        let query = format!(
            "SELECT author_id, COUNT(*) AS count FROM tag_calls WHERE guild_id = $1 \
             GROUP BY author_id ORDER BY count DESC, author_id LIMIT {LEADERBOARD_SIZE}"
        );
        db.get_vec(&query, vec![self.id().into()]).await
    }

    /// Users who authored the most tags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn top_tag_creators(
        &self,
        db: &PersistenceClient,
    ) -> Result<Vec<UserCount>, StoreError> {
        let query = format!(
            "SELECT author_id, COUNT(*) AS count FROM tags \
             WHERE guild_id = $1 AND author_id IS NOT NULL \
             GROUP BY author_id ORDER BY count DESC, author_id LIMIT {LEADERBOARD_SIZE}"
        );
        db.get_vec(&query, vec![self.id().into()]).await
    }

    // ---- commands and reminders ----

    /// Appends a command-call audit row for this guild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn record_command(
        &self,
        db: &PersistenceClient,
        author_id: Snowflake,
        command: impl Into<String>,
    ) -> Result<CommandCall, StoreError> {
        let call = CommandCall::new(db.next_id(), Some(self.id()), author_id, command);
        call.save(db).await?;
        Ok(call)
    }

    /// Command usage statistics for this guild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any query fails.
    pub async fn command_stats(&self, db: &PersistenceClient) -> Result<CommandStats, StoreError> {
        stats::command_stats(db, Some(self.id())).await
    }

    /// A member's stored reminders in this guild, optionally limited to one
    /// channel, earliest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn member_reminders(
        &self,
        db: &PersistenceClient,
        member_id: Snowflake,
        channel_id: Option<Snowflake>,
    ) -> Result<Vec<Reminder>, StoreError> {
        let query = format!(
            "{} WHERE guild_id = $1 AND user_id = $2 AND ($3::BIGINT IS NULL OR channel_id = $3) \
             ORDER BY fire_at LIMIT {LIST_LIMIT}",
            db.statements::<Reminder>()?.select_all()
        );
        db.get_vec(
            &query,
            vec![self.id().into(), member_id.into(), channel_id.into()],
        )
        .await
    }
}

async fn load_children<T: Entity>(
    db: &PersistenceClient,
    guild_id: Snowflake,
) -> Result<Vec<T>, StoreError> {
    let query = format!("{} WHERE guild_id = $1", db.statements::<T>()?.select_all());
    db.get_all::<T>(&query, vec![SqlValue::from(guild_id)])
        .try_collect()
        .await
}

/// Escapes `LIKE` wildcards so `text` matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn aggregate() -> GuildAggregate {
        GuildAggregate::new(Guild::new(Snowflake::new(10)))
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn failed_add_leaves_cache_unchanged() {
        let db = PersistenceClient::unreachable();
        let mut guild = aggregate();

        let result = guild.add_prefix(&db, "!!", None).await;
        assert!(matches!(result, Err(StoreError::Acquisition(_))));
        assert!(guild.prefix("!!").is_none());

        let result = guild
            .block_channel(&db, Snowflake::new(5), Snowflake::new(6), None)
            .await;
        assert!(result.is_err());
        assert!(!guild.is_channel_blocked(Snowflake::new(5)));

        let result = guild.create_tag(&db, Snowflake::new(6), "rules", "be nice").await;
        assert!(result.is_err());
        assert!(guild.tag_entry("rules").is_none());
    }

    #[tokio::test]
    async fn failed_remove_keeps_cached_entry() {
        let db = PersistenceClient::unreachable();
        let mut guild = aggregate();
        let prefix = Prefix::new(Snowflake::new(1), guild.id(), "?", None);
        guild.prefixes.insert("?".to_string(), prefix);

        let result = guild.remove_prefix(&db, "?").await;
        assert!(matches!(result, Err(StoreError::Acquisition(_))));
        assert!(guild.prefix("?").is_some());
    }

    #[tokio::test]
    async fn removing_unknown_entries_skips_storage() {
        let db = PersistenceClient::unreachable();
        let mut guild = aggregate();

        let Ok(removed) = guild.remove_prefix(&db, "missing").await else {
            panic!("unknown prefix should not reach storage");
        };
        assert!(removed.is_none());
        assert!(matches!(guild.remove_faq(&db, Snowflake::new(3)).await, Ok(None)));
        assert!(matches!(guild.remove_activity(&db, "Chess").await, Ok(None)));
        assert!(matches!(guild.unblock_channel(&db, Snowflake::new(3)).await, Ok(None)));
        assert!(matches!(
            guild.remove_reaction_role(&db, Snowflake::new(3), "👍").await,
            Ok(None)
        ));
        assert!(matches!(guild.edit_tag(&db, "nope", "x").await, Ok(None)));
        assert!(matches!(guild.delete_tag(&db, "nope").await, Ok(None)));
    }

    #[tokio::test]
    async fn failed_settings_update_keeps_previous_row() {
        let db = PersistenceClient::unreachable();
        let mut guild = aggregate();
        let settings = GuildSettings {
            premium: Some(true),
            ..GuildSettings::default()
        };
        assert!(guild.update_settings(&db, settings).await.is_err());
        assert!(!guild.guild().premium);
    }

    #[test]
    fn activity_lookup_ignores_case() {
        let mut guild = aggregate();
        let activity = Activity::new(Snowflake::new(1), guild.id(), "Chess", Snowflake::new(2));
        guild.activities.insert(activity.status.clone(), activity);
        assert!(guild.activity("CHESS").is_some());
        assert_eq!(guild.activities().count(), 1);
    }

    #[test]
    fn tag_index_resolves_aliases_case_insensitively() {
        let mut guild = aggregate();
        let entry = TagIndexEntry {
            lookup_id: Snowflake::new(2),
            tag_id: Snowflake::new(1),
        };
        guild.tags.insert("rules".to_string(), entry);
        assert_eq!(guild.tag_entry("Rules"), Some(entry));
        assert_eq!(guild.tag_titles().count(), 1);
    }

    #[tokio::test]
    async fn reaction_roles_are_keyed_by_message_and_emoji() {
        let db = PersistenceClient::unreachable();
        let mut guild = aggregate();
        let message = Snowflake::new(40);

        let result = guild
            .add_reaction_role(&db, message, "👍", Snowflake::new(41), None)
            .await;
        assert!(matches!(result, Err(StoreError::Acquisition(_))));
        assert!(guild.reaction_role(message, "👍").is_none());

        let binding = ReactionRole::new(
            Snowflake::new(1),
            guild.id(),
            message,
            "👍",
            Snowflake::new(41),
            None,
        );
        guild.reaction_roles.insert((message, "👍".to_string()), binding);
        assert!(guild.reaction_role(message, "👍").is_some());
        assert!(guild.reaction_role(message, "👎").is_none());
        assert!(guild.reaction_role(Snowflake::new(42), "👍").is_none());

        let result = guild.remove_reaction_role(&db, message, "👍").await;
        assert!(result.is_err());
        assert_eq!(guild.reaction_roles().count(), 1);
    }
}
