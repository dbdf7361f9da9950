//! worldpool-state — persistence port and embedded store.
//!
//! The [`ResourceStore`] trait is the load/store boundary the rest of the
//! system depends on: find/save per aggregate, atomic save-per-aggregate,
//! and optimistic conflict detection (a stale-version save fails with
//! [`StateError::Conflict`] rather than silently overwriting).
//!
//! [`RedbStore`] is the embedded implementation, backed by
//! [redb](https://docs.rs/redb) with JSON-serialized values and composite
//! `{owner_id}/{world_id}` keys for prefix scans. It is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{RedbStore, ResourceStore};
