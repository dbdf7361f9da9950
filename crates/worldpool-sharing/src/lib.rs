//! worldpool-sharing — delay-reclaimable capacity lending between worlds.
//!
//! The [`SharingArbiter`] lends a donor world's unused quota to peer worlds
//! under the same pool. Grants are priority-ordered (High, Equal, Low) and
//! FIFO within a priority; loans are transient and never alter the donor's
//! quota. Reclamation goes through a cancellable, clock-driven
//! [`ReclaimSchedule`] so a donor's transient spike doesn't immediately
//! claw back lent capacity.

pub mod arbiter;
pub mod reclaim;

pub use arbiter::{Loan, ReclaimCallback, ReclaimEvent, ShareRequest, SharingArbiter};
pub use reclaim::{ReclaimKey, ReclaimSchedule};
