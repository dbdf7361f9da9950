//! Reclaim schedule — cancellable delayed reclamation of lent capacity.
//!
//! Pending reclaims sit in a time-ordered min-heap keyed by
//! `(donor, borrower, resource)`. Nothing here sleeps; the arbiter polls
//! `due(now)` with clock-injected time, so tests fast-forward
//! deterministically.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use worldpool_core::{ResourceType, WorldId};

/// Identity of one scheduled reclaim: the loan it will revoke.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReclaimKey {
    pub donor_id: WorldId,
    pub borrower_id: WorldId,
    pub resource: ResourceType,
}

/// Min-heap schedule of pending reclaims with lazy cancellation.
///
/// Cancelling removes the key from the pending map and leaves the heap
/// entry behind; `due` skips entries whose deadline no longer matches the
/// map. Cancellation is idempotent: a missing or already-fired entry is a
/// no-op, not an error.
#[derive(Debug, Default)]
pub struct ReclaimSchedule {
    heap: BinaryHeap<Reverse<(u64, ReclaimKey)>>,
    pending: HashMap<ReclaimKey, u64>,
}

impl ReclaimSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` to fire at `fire_at`.
    ///
    /// Re-scheduling an already-pending key keeps the earlier deadline — a
    /// donor whose need persists must not keep pushing the reclaim out.
    /// Returns whether the schedule changed.
    pub fn schedule(&mut self, key: ReclaimKey, fire_at: u64) -> bool {
        match self.pending.get(&key) {
            Some(&existing) if existing <= fire_at => false,
            _ => {
                self.pending.insert(key.clone(), fire_at);
                self.heap.push(Reverse((fire_at, key)));
                true
            }
        }
    }

    /// Cancel a pending reclaim. Returns whether one was pending.
    pub fn cancel(&mut self, key: &ReclaimKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &ReclaimKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Earliest pending deadline.
    pub fn next_fire_at(&self) -> Option<u64> {
        self.pending.values().copied().min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pop every reclaim due at `now`, skipping cancelled and superseded
    /// heap entries.
    pub fn due(&mut self, now: u64) -> Vec<ReclaimKey> {
        let mut fired = Vec::new();
        while let Some(Reverse((fire_at, key))) = self.heap.peek().cloned() {
            if fire_at > now {
                break;
            }
            self.heap.pop();
            if self.pending.get(&key) == Some(&fire_at) {
                self.pending.remove(&key);
                fired.push(key);
            }
        }
        fired
    }
}
