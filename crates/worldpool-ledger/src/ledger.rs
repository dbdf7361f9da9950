//! AllocationLedger — owner-scoped coordination of the two quota ledgers.
//!
//! Every allocation touches two aggregates: the owner's `ResourcePool`
//! (conservation) and the world's `WorldResources` (quota bound). The
//! ledger applies both mutations inside a per-owner critical section, so
//! all of an owner's worlds see a single writer, and saves both records
//! with the store's version check. A request either succeeds immediately
//! or fails fast; nothing is queued and conflicts are never retried here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use worldpool_core::{ResourcePool, ResourceType, WorldResources};
use worldpool_state::ResourceStore;

use crate::error::{LedgerError, LedgerResult};

/// Coordinates pool and world records for all owners.
pub struct AllocationLedger<S> {
    store: S,
    /// Per-owner write locks: owner_id → mutex.
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: ResourceStore> AllocationLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Direct read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The single-writer mutex for one owner's pool.
    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().await;
        locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create the owner's pool. Fails if one already exists.
    pub async fn create_pool(&self, owner_id: &str, tier: &str) -> LedgerResult<ResourcePool> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        if self.store.exists_pool_for_owner(owner_id)? {
            return Err(LedgerError::PoolExists(owner_id.to_string()));
        }
        let mut pool = ResourcePool::new(owner_id, tier);
        self.store.save_pool(&mut pool)?;
        info!(owner_id, tier, "resource pool created");
        Ok(pool)
    }

    /// Create a world's quota record under an existing pool.
    pub async fn register_world(
        &self,
        owner_id: &str,
        world_id: &str,
        world_name: &str,
    ) -> LedgerResult<WorldResources> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        if !self.store.exists_pool_for_owner(owner_id)? {
            return Err(LedgerError::PoolNotFound(owner_id.to_string()));
        }
        if self.store.find_world(owner_id, world_id)?.is_some() {
            return Err(LedgerError::WorldExists(world_id.to_string()));
        }
        let mut world = WorldResources::new(world_id, owner_id, world_name);
        self.store.save_world(&mut world)?;
        info!(owner_id, world_id, world_name, "world registered");
        Ok(world)
    }

    /// Grant `amount` of `rtype` from the owner's pool to a world.
    ///
    /// Both ledgers move together: the pool's `allocated` grows and the
    /// world's allocation grows by the same amount. Fails fast with
    /// `InsufficientResource` when either the pool or the world's quota
    /// cannot cover the request; the failed request mutates nothing.
    pub async fn allocate(
        &self,
        owner_id: &str,
        world_id: &str,
        rtype: ResourceType,
        amount: f64,
    ) -> LedgerResult<()> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut pool = self
            .store
            .find_pool_by_owner(owner_id)?
            .ok_or_else(|| LedgerError::PoolNotFound(owner_id.to_string()))?;
        let mut world = self
            .store
            .find_world(owner_id, world_id)?
            .ok_or_else(|| LedgerError::WorldNotFound(world_id.to_string()))?;

        world.set_allocation(rtype, world.allocation(rtype) + amount)?;
        pool.allocate_to_world(rtype, amount)?;

        // Pool first: if the world save then fails, the pool over-reserves
        // rather than over-commits.
        self.store.save_pool(&mut pool)?;
        self.store.save_world(&mut world)?;

        info!(
            owner_id,
            world_id,
            resource = %rtype,
            amount,
            pool_allocated = pool.allocated(rtype),
            "capacity allocated"
        );
        Ok(())
    }

    /// Return `amount` of `rtype` from a world to the owner's pool.
    pub async fn release(
        &self,
        owner_id: &str,
        world_id: &str,
        rtype: ResourceType,
        amount: f64,
    ) -> LedgerResult<()> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut pool = self
            .store
            .find_pool_by_owner(owner_id)?
            .ok_or_else(|| LedgerError::PoolNotFound(owner_id.to_string()))?;
        let mut world = self
            .store
            .find_world(owner_id, world_id)?
            .ok_or_else(|| LedgerError::WorldNotFound(world_id.to_string()))?;

        let next = (world.allocation(rtype) - amount).max(0.0);
        world.set_allocation(rtype, next)?;
        pool.release_from_world(rtype, amount)?;

        // World first: if the pool save then fails, the pool still holds
        // the reservation rather than under-reserving.
        self.store.save_world(&mut world)?;
        self.store.save_pool(&mut pool)?;

        debug!(
            owner_id,
            world_id,
            resource = %rtype,
            amount,
            pool_allocated = pool.allocated(rtype),
            "capacity released"
        );
        Ok(())
    }
}
