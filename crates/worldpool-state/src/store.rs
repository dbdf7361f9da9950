//! RedbStore — redb-backed persistence for pools and world records.
//!
//! Implements the [`ResourceStore`] port with typed CRUD over redb. Values
//! are JSON-serialized into `&[u8]` columns. The store supports both on-disk
//! and in-memory backends (the latter for testing).
//!
//! Saves are optimistic: the aggregate's version must match the stored
//! version or the save fails with [`StateError::Conflict`]. A successful
//! save bumps the aggregate's version in place.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use worldpool_core::{ResourcePool, WorldResources};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Load/store port for the two aggregates.
///
/// Implementations must provide atomic save-per-aggregate and optimistic
/// conflict detection: a stale-version save fails, never silently overwrites.
pub trait ResourceStore: Send + Sync {
    fn find_pool_by_owner(&self, owner_id: &str) -> StateResult<Option<ResourcePool>>;
    fn exists_pool_for_owner(&self, owner_id: &str) -> StateResult<bool>;
    /// Save the pool, bumping its version on success.
    fn save_pool(&self, pool: &mut ResourcePool) -> StateResult<()>;

    fn find_world(&self, owner_id: &str, world_id: &str) -> StateResult<Option<WorldResources>>;
    fn list_worlds_for_owner(&self, owner_id: &str) -> StateResult<Vec<WorldResources>>;
    fn list_worlds(&self) -> StateResult<Vec<WorldResources>>;
    /// Save the world record, bumping its version on success.
    fn save_world(&self, world: &mut WorldResources) -> StateResult<()>;
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(WORLDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn world_key(owner_id: &str, world_id: &str) -> String {
        format!("{owner_id}/{world_id}")
    }
}

impl ResourceStore for RedbStore {
    // ── Pools ──────────────────────────────────────────────────────

    fn find_pool_by_owner(&self, owner_id: &str) -> StateResult<Option<ResourcePool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(owner_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let pool: ResourcePool =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    fn exists_pool_for_owner(&self, owner_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        Ok(table.get(owner_id).map_err(map_err!(Read))?.is_some())
    }

    fn save_pool(&self, pool: &mut ResourcePool) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let stored_version = match table.get(pool.owner_id()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let existing: ResourcePool =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(existing.version())
                }
                None => None,
            };
            if let Some(actual) = stored_version
                && actual != pool.version()
            {
                return Err(StateError::Conflict {
                    expected: pool.version(),
                    actual,
                });
            }
            pool.bump_version();
            let value = serde_json::to_vec(pool).map_err(map_err!(Serialize))?;
            table
                .insert(pool.owner_id(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(owner_id = %pool.owner_id(), version = pool.version(), "pool saved");
        Ok(())
    }

    // ── Worlds ─────────────────────────────────────────────────────

    fn find_world(&self, owner_id: &str, world_id: &str) -> StateResult<Option<WorldResources>> {
        let key = Self::world_key(owner_id, world_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let world: WorldResources =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(world))
            }
            None => Ok(None),
        }
    }

    fn list_worlds_for_owner(&self, owner_id: &str) -> StateResult<Vec<WorldResources>> {
        let prefix = format!("{owner_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let world: WorldResources =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(world);
            }
        }
        Ok(results)
    }

    fn list_worlds(&self) -> StateResult<Vec<WorldResources>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let world: WorldResources =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(world);
        }
        Ok(results)
    }

    fn save_world(&self, world: &mut WorldResources) -> StateResult<()> {
        let key = Self::world_key(world.owner_id(), world.world_id());
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            let stored_version = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let existing: WorldResources =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(existing.version())
                }
                None => None,
            };
            if let Some(actual) = stored_version
                && actual != world.version()
            {
                return Err(StateError::Conflict {
                    expected: world.version(),
                    actual,
                });
            }
            world.bump_version();
            let value = serde_json::to_vec(world).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(world_id = %world.world_id(), version = world.version(), "world saved");
        Ok(())
    }
}
