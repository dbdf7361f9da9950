//! worldpool-core — domain model for owner resource pools and world quotas.
//!
//! An owner's subscription backs a single [`ResourcePool`], a per-type ledger
//! of limit, burst allowance, and allocated capacity. Each world the owner
//! runs has a [`WorldResources`] record: its quota, current allocation,
//! alerting thresholds, auto-scaling rules, and sharing configuration.
//!
//! Both aggregates expose invariant-checking operations only — conservation
//! (`allocated <= limit + burst`) and quota bounds cannot be bypassed by raw
//! field writes. Time-dependent state (rule cooldowns, reclaim delays) is
//! expressed in epoch seconds against the injectable [`Clock`].

pub mod clock;
pub mod error;
pub mod pool;
pub mod types;
pub mod world;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QuotaError, QuotaResult};
pub use pool::{BudgetConfig, BudgetLevel, ResourcePool};
pub use types::{OwnerId, ResourcePriority, ResourceTable, ResourceType, WorldId};
pub use world::{
    AutoScalingConfig, AutoScalingRule, ResourceThreshold, ScalingAction, SharingConfig,
    SharingMode, ThresholdLevel, WorldResources,
};
