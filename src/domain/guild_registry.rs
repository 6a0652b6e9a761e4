//! Concurrent guild storage with per-guild locking.
//!
//! [`GuildRegistry`] owns every live [`GuildAggregate`], keyed by guild id.
//! Each aggregate sits behind its own [`tokio::sync::RwLock`], so reads of
//! one guild run concurrently while its mutations are serialized, and
//! different guilds never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Snowflake;
use crate::error::StoreError;
use crate::service::GuildAggregate;

/// Handle to one registered aggregate.
pub type GuildHandle = Arc<RwLock<GuildAggregate>>;

/// Arena of guild aggregates indexed by guild id.
///
/// Uses a `RwLock<HashMap<...>>` for the outer map and a per-entry
/// `Arc<RwLock<GuildAggregate>>` for fine-grained locking.
///
/// # Concurrency
///
/// - Readers of the same guild proceed concurrently.
/// - Mutations of different guilds are concurrent.
/// - Mutations of the same guild are serialized by its write lock.
#[derive(Debug)]
pub struct GuildRegistry {
    guilds: RwLock<HashMap<Snowflake, GuildHandle>>,
}

impl GuildRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            guilds: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a loaded aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::GuildExists`] if the guild is already
    /// registered.
    pub async fn insert(&self, aggregate: GuildAggregate) -> Result<GuildHandle, StoreError> {
        let guild_id = aggregate.id();
        let mut map = self.guilds.write().await;
        if map.contains_key(&guild_id) {
            return Err(StoreError::GuildExists(guild_id));
        }
        let handle = Arc::new(RwLock::new(aggregate));
        map.insert(guild_id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Returns the aggregate for `guild_id`, if registered.
    pub async fn get(&self, guild_id: Snowflake) -> Option<GuildHandle> {
        self.guilds.read().await.get(&guild_id).map(Arc::clone)
    }

    /// Unregisters a guild, returning its aggregate.
    pub async fn remove(&self, guild_id: Snowflake) -> Option<GuildHandle> {
        self.guilds.write().await.remove(&guild_id)
    }

    /// Returns `true` if the guild is registered.
    pub async fn contains(&self, guild_id: Snowflake) -> bool {
        self.guilds.read().await.contains_key(&guild_id)
    }

    /// Returns every registered guild id, in ascending order.
    pub async fn ids(&self) -> Vec<Snowflake> {
        let mut ids: Vec<Snowflake> = self.guilds.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of registered guilds.
    pub async fn len(&self) -> usize {
        self.guilds.read().await.len()
    }

    /// Returns `true` if no guild is registered.
    pub async fn is_empty(&self) -> bool {
        self.guilds.read().await.is_empty()
    }
}

impl Default for GuildRegistry {
    fn default() -> Self {
        Self::new()
    }
}
