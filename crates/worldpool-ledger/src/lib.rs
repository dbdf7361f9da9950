//! worldpool-ledger — owner-scoped allocation coordination.
//!
//! The pool is a single shared ledger per owner; every allocate/release
//! across that owner's worlds must be serialized to keep the conservation
//! invariant. [`AllocationLedger`] provides that discipline: a per-owner
//! mutex makes each read-modify-write a critical section, and the store's
//! optimistic version check catches any out-of-band writer. Conflicts are
//! surfaced to the orchestration layer, never retried here.

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::AllocationLedger;
