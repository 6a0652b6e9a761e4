//! Guild service: guild lifecycle, population and membership.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;

use super::GuildAggregate;
use super::stats::{self, CommandStats};
use crate::domain::guild_registry::GuildHandle;
use crate::domain::{BotEvent, EventBus, GuildRegistry, ReadySignal, Snowflake};
use crate::error::StoreError;
use crate::persistence::models::{Guild, Member};
use crate::persistence::{
    BindValues, Entity, PersistenceClient, SqlValue, ensure_account, ensure_member,
};

/// Outcome of [`GuildService::populate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulationReport {
    /// Stored guilds loaded into the registry.
    pub loaded: usize,
    /// Guilds the platform reported that had no stored row yet.
    pub created: usize,
}

/// Orchestration layer for guild state.
///
/// Owns the [`GuildRegistry`] of live aggregates and publishes guild
/// lifecycle events on the [`EventBus`]. Every write goes to storage
/// before the registry changes.
#[derive(Debug)]
pub struct GuildService {
    db: PersistenceClient,
    registry: Arc<GuildRegistry>,
    event_bus: EventBus,
    populated: AtomicBool,
}

impl GuildService {
    /// Creates a service with an empty registry.
    #[must_use]
    pub fn new(db: PersistenceClient, event_bus: EventBus) -> Self {
        Self {
            db,
            registry: Arc::new(GuildRegistry::new()),
            event_bus,
            populated: AtomicBool::new(false),
        }
    }

    /// Persistence client the service writes through.
    #[must_use]
    pub const fn db(&self) -> &PersistenceClient {
        &self.db
    }

    /// Registry of live aggregates.
    #[must_use]
    pub const fn registry(&self) -> &Arc<GuildRegistry> {
        &self.registry
    }

    /// Returns `true` once initial population has finished.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Waits for `ready`, then loads every stored guild and creates the
    /// ones in `present` that have never been stored.
    ///
    /// Returns an empty report without marking the service populated if
    /// the readiness trigger is dropped before firing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a guild cannot be read, loaded or created.
    pub async fn populate(
        &self,
        mut ready: ReadySignal,
        present: &[Snowflake],
    ) -> Result<PopulationReport, StoreError> {
        if !ready.wait().await {
            tracing::warn!("readiness trigger dropped, skipping guild population");
            return Ok(PopulationReport::default());
        }

        let query = self.db.statements::<Guild>()?.select_all();
        let stored: Vec<Guild> = self.db.get_all::<Guild>(query, Vec::new()).try_collect().await?;

        let mut report = PopulationReport::default();
        for guild in stored {
            let guild_id = guild.id;
            if self.registry.contains(guild_id).await {
                continue;
            }
            let aggregate = GuildAggregate::load(&self.db, guild).await?;
            match self.registry.insert(aggregate).await {
                Ok(_) => report.loaded += 1,
                Err(StoreError::GuildExists(_)) => {}
                Err(err) => return Err(err),
            }
        }

        for &guild_id in present {
            if self.registry.contains(guild_id).await {
                continue;
            }
            let (_, joined) = self.register(guild_id).await?;
            if joined {
                report.created += 1;
            }
        }

        self.populated.store(true, Ordering::Release);
        tracing::info!(
            loaded = report.loaded,
            created = report.created,
            "guild population complete"
        );
        Ok(report)
    }

    /// Returns the aggregate for `guild_id`, if registered.
    pub async fn guild(&self, guild_id: Snowflake) -> Option<GuildHandle> {
        self.registry.get(guild_id).await
    }

    /// Returns the aggregate for `guild_id`, loading or creating it on
    /// first contact.
    ///
    /// A guild with no stored row is persisted before it is registered,
    /// and a [`BotEvent::GuildJoined`] is published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the guild cannot be read, loaded or
    /// stored. The registry is unchanged on error.
    pub async fn get_or_create(&self, guild_id: Snowflake) -> Result<GuildHandle, StoreError> {
        if let Some(handle) = self.registry.get(guild_id).await {
            return Ok(handle);
        }
        let (handle, _) = self.register(guild_id).await?;
        Ok(handle)
    }

    async fn register(&self, guild_id: Snowflake) -> Result<(GuildHandle, bool), StoreError> {
        let (aggregate, joined) = match self.db.get_by_key::<Guild>(vec![guild_id.into()]).await? {
            Some(guild) => (GuildAggregate::load(&self.db, guild).await?, false),
            None => {
                let guild = Guild::new(guild_id);
                guild.save(&self.db).await?;
                (GuildAggregate::new(guild), true)
            }
        };

        let handle = match self.registry.insert(aggregate).await {
            Ok(handle) => handle,
            Err(StoreError::GuildExists(_)) => {
                return self
                    .registry
                    .get(guild_id)
                    .await
                    .map(|handle| (handle, false))
                    .ok_or(StoreError::GuildNotFound(guild_id));
            }
            Err(err) => return Err(err),
        };

        if joined {
            let _ = self.event_bus.publish(BotEvent::GuildJoined {
                guild_id,
                timestamp: Utc::now(),
            });
            tracing::info!(%guild_id, "guild created");
        }
        Ok((handle, joined))
    }

    /// Deletes a guild and every row scoped to it, then drops its
    /// aggregate.
    ///
    /// Holds the aggregate's write lock across the delete so no mutation
    /// of the guild interleaves with its removal. The published
    /// [`BotEvent::GuildRemoved`] makes a running
    /// [`ReminderScheduler`](super::ReminderScheduler) disarm the guild's
    /// reminders, whose rows the delete has already cascaded away.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::GuildNotFound`] if the guild is neither stored
    /// nor registered, or any delete failure. The registry is unchanged on
    /// error.
    pub async fn remove_guild(&self, guild_id: Snowflake) -> Result<(), StoreError> {
        let handle = self.registry.get(guild_id).await;
        let guard = match &handle {
            Some(handle) => Some(handle.write().await),
            None => None,
        };

        let deleted = Guild::new(guild_id).delete(&self.db).await?;
        let unregistered = self.registry.remove(guild_id).await.is_some();
        drop(guard);

        if !deleted && !unregistered {
            return Err(StoreError::GuildNotFound(guild_id));
        }

        let _ = self.event_bus.publish(BotEvent::GuildRemoved {
            guild_id,
            timestamp: Utc::now(),
        });
        tracing::info!(%guild_id, "guild removed");
        Ok(())
    }

    /// Ensures `user_id` is a member of `guild_id`, creating the account
    /// and member rows in one transaction when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the guild is not stored, or
    /// any other write failure. Nothing is written on error.
    pub async fn add_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Member, StoreError> {
        let select = self.db.statements::<Member>()?.select_by_key();
        let mut tx = self.db.begin().await?;
        ensure_member(&mut *tx, user_id, guild_id).await?;
        let member = sqlx::query_as::<_, Member>(select)
            .bind_values(vec![user_id.into(), guild_id.into()])
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(%guild_id, %user_id, "member ensured");
        Ok(member)
    }

    /// Bulk form of [`add_member`](Self::add_member). Returns the number of
    /// memberships that did not exist before.
    ///
    /// # Errors
    ///
    /// As [`add_member`](Self::add_member).
    pub async fn add_members(
        &self,
        guild_id: Snowflake,
        user_ids: &[Snowflake],
    ) -> Result<u64, StoreError> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db.begin().await?;
        sqlx::query(ENSURE_ACCOUNTS)
            .bind_values(vec![SqlValue::from(user_ids)])
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO members (id, guild_id) SELECT UNNEST($1::BIGINT[]), $2 \
             ON CONFLICT (id, guild_id) DO NOTHING",
        )
        .bind_values(vec![SqlValue::from(user_ids), guild_id.into()])
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        tracing::info!(%guild_id, requested = user_ids.len(), inserted, "members added");
        Ok(inserted)
    }

    /// Ensures an account row exists for every id. Returns how many were
    /// created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn ensure_accounts(&self, user_ids: &[Snowflake]) -> Result<u64, StoreError> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        self.db
            .execute(ENSURE_ACCOUNTS, vec![SqlValue::from(user_ids)])
            .await
    }

    /// Looks up a membership.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn get_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Option<Member>, StoreError> {
        self.db
            .get_by_key::<Member>(vec![user_id.into(), guild_id.into()])
            .await
    }

    /// Deletes a membership. Tags the member authored lose their author
    /// but are kept. Returns `false` if there was no such membership.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn remove_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<bool, StoreError> {
        let removed = Member::new(user_id, guild_id).delete(&self.db).await?;
        if removed {
            tracing::debug!(%guild_id, %user_id, "member removed");
        }
        Ok(removed)
    }

    /// Records when a member last spoke, creating the membership if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn touch_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        spoke_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        ensure_account(&mut *tx, user_id).await?;
        sqlx::query(
            "INSERT INTO members (id, guild_id, last_spoke) VALUES ($1, $2, $3) \
             ON CONFLICT (id, guild_id) DO UPDATE SET last_spoke = EXCLUDED.last_spoke",
        )
        .bind_values(vec![user_id.into(), guild_id.into(), spoke_at.into()])
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Command usage statistics across every guild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any query fails.
    pub async fn command_stats(&self) -> Result<CommandStats, StoreError> {
        stats::command_stats(&self.db, None).await
    }
}

const ENSURE_ACCOUNTS: &str =
    "INSERT INTO accounts (id) SELECT UNNEST($1::BIGINT[]) ON CONFLICT (id) DO NOTHING";
