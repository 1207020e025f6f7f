//! In-memory cache of guild state, keyed by guild id.
//!
//! The store is the single runtime source of truth. Each guild lives behind
//! its own `tokio::sync::Mutex`, so read-modify-write sequences against one
//! guild serialize with each other while different guilds never contend. The
//! first access to a guild loads it from [`GuildStorage`] through a per-guild
//! `OnceCell`: concurrent first accesses share one load and one instance.

use crate::guilds::error::GuildDataResult;
use crate::guilds::state::{GuildConfig, GuildState, MemberState};
use crate::guilds::storage::GuildStorage;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Shared handle to one guild's state. Holders lock it, mutate fields
/// directly and mark the guild dirty; the store does not version or diff.
pub type GuildHandle = Arc<Mutex<GuildState>>;

#[derive(Default)]
struct GuildSlot {
    cell: OnceCell<GuildHandle>,
}

/// Concurrency-safe keyed store of guild state with lazy single-flight loads.
pub struct GuildStore {
    guilds: DashMap<u64, Arc<GuildSlot>>,
    storage: GuildStorage,
}

impl GuildStore {
    #[must_use]
    pub fn new(storage: GuildStorage) -> Self {
        Self {
            guilds: DashMap::new(),
            storage,
        }
    }

    /// Get the in-memory state for a guild, loading it on first access.
    ///
    /// Loading is single-flight: when several tasks race on a guild that has
    /// never been loaded, exactly one performs the load and all of them
    /// receive the same handle. `NotFound` (and corrupt records, which
    /// storage quarantines) yield a fresh default state.
    pub async fn get_or_create(&self, guild_id: u64) -> GuildHandle {
        let slot = self.guilds.entry(guild_id).or_default().clone();
        slot.cell
            .get_or_init(|| async {
                let state = match self.storage.load(guild_id).await {
                    Some(state) => state,
                    None => GuildState::new(guild_id),
                };
                debug!("Guild {guild_id} is now resident");
                Arc::new(Mutex::new(state))
            })
            .await
            .clone()
    }

    /// Snapshot of a member's state, creating the default record if absent.
    ///
    /// Creation alone does not mark the guild dirty: a default member carries
    /// no information worth persisting.
    pub async fn member(&self, guild_id: u64, member_id: u64) -> MemberState {
        let handle = self.get_or_create(guild_id).await;
        let mut state = handle.lock().await;
        state.member_mut(member_id).clone()
    }

    /// Convenience read of a guild's configuration; implies `get_or_create`.
    pub async fn configuration(&self, guild_id: u64) -> GuildConfig {
        let handle = self.get_or_create(guild_id).await;
        let state = handle.lock().await;
        state.config.clone()
    }

    /// Run a mutation against a guild's state under its lock and mark the
    /// guild dirty.
    pub async fn update_guild<F, R>(&self, guild_id: u64, mutate: F) -> R
    where
        F: FnOnce(&mut GuildState) -> R,
    {
        let handle = self.get_or_create(guild_id).await;
        let mut state = handle.lock().await;
        let result = mutate(&mut state);
        state.dirty = true;
        result
    }

    /// Run a mutation against one member's state, creating the record if
    /// needed, and mark the guild dirty.
    pub async fn update_member<F, R>(&self, guild_id: u64, member_id: u64, mutate: F) -> R
    where
        F: FnOnce(&mut MemberState) -> R,
    {
        let handle = self.get_or_create(guild_id).await;
        let mut state = handle.lock().await;
        let result = mutate(state.member_mut(member_id));
        state.dirty = true;
        result
    }

    /// Ids of every guild currently resident in the cache.
    #[must_use]
    pub fn resident(&self) -> Vec<u64> {
        self.guilds
            .iter()
            .filter(|entry| entry.value().cell.initialized())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Persist a guild if it has unsaved mutations.
    ///
    /// The dirty flag is cleared only after a successful save, so a failed
    /// save is retried on the next persist attempt for that guild.
    ///
    /// # Errors
    /// Returns the storage error when the save fails; the in-memory state is
    /// untouched and stays dirty.
    pub async fn persist(&self, guild_id: u64) -> GuildDataResult<()> {
        let Some(handle) = self.resident_handle(guild_id) else {
            return Ok(());
        };
        let mut state = handle.lock().await;
        if !state.dirty {
            return Ok(());
        }
        self.storage.save(&state).await?;
        state.dirty = false;
        Ok(())
    }

    /// Load every stored guild into the cache. Called at startup so the
    /// sweep sees guilds with outstanding timers even before any command
    /// touches them.
    pub async fn preload(&self) -> usize {
        let stored = self.storage.stored_guilds();
        let count = stored.len();
        for guild_id in stored {
            self.get_or_create(guild_id).await;
        }
        count
    }

    fn resident_handle(&self, guild_id: u64) -> Option<GuildHandle> {
        self.guilds
            .get(&guild_id)
            .and_then(|slot| slot.cell.get().cloned())
    }
}

impl std::fmt::Debug for GuildStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildStore")
            .field("resident_guilds", &self.guilds.len())
            .field("storage", &self.storage)
            .finish()
    }
}
