//! ResourcePool — per-owner ledger of pooled capacity.
//!
//! One pool exists per owner, sized by their subscription. Worlds draw
//! capacity from it through `allocate_to_world`, the only mutator of the
//! `allocated` table, which holds the conservation invariant:
//!
//! ```text
//! allocated[t] <= limits[t] + burst_limits[t]   for every resource type t
//! ```
//!
//! The pool also tracks metered usage against the billing period and budget
//! threshold levels. It never computes monetary billing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ensure_amount, ensure_percent, QuotaError, QuotaResult};
use crate::types::{OwnerId, ResourceTable, ResourceType};

/// Monthly spend ceiling and alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Monthly spend ceiling.
    pub monthly_budget: f64,
    /// Percentage of the budget at which `BudgetLevel::Warning` is reported.
    pub alert_percent: f64,
    /// When true the orchestrator should stop allocations once the budget
    /// is exceeded; the pool itself only reports the level.
    pub hard_limit_enabled: bool,
}

impl BudgetConfig {
    /// Budget with the default 80% warning threshold and no hard limit.
    pub fn new(monthly_budget: f64) -> Self {
        Self {
            monthly_budget,
            alert_percent: 80.0,
            hard_limit_enabled: false,
        }
    }
}

/// Where the period spend sits relative to the configured budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Normal,
    Warning,
    Exceeded,
}

/// Per-owner resource pool aggregate.
///
/// All mutation goes through invariant-checking operations; there are no raw
/// field setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    owner_id: OwnerId,
    subscription_tier: String,
    limits: ResourceTable,
    burst_limits: ResourceTable,
    allocated: ResourceTable,
    used: ResourceTable,
    budget: Option<BudgetConfig>,
    period_spend: f64,
    billing_period_start: Option<u64>,
    billing_period_end: Option<u64>,
    /// Optimistic-concurrency version, bumped by the store on save.
    version: u64,
    created_at: u64,
    updated_at: u64,
}

impl ResourcePool {
    /// Create a pool with zero limits and nothing allocated.
    ///
    /// The one-pool-per-owner check belongs to the ledger, which owns the
    /// store handle.
    pub fn new(owner_id: impl Into<OwnerId>, subscription_tier: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            owner_id: owner_id.into(),
            subscription_tier: subscription_tier.into(),
            limits: ResourceTable::zeroed(),
            burst_limits: ResourceTable::zeroed(),
            allocated: ResourceTable::zeroed(),
            used: ResourceTable::zeroed(),
            budget: None,
            period_spend: 0.0,
            billing_period_start: None,
            billing_period_end: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ── Configuration ──────────────────────────────────────────────

    /// Set the base limit for a resource type.
    ///
    /// Rejects negative amounts and any limit that would leave the current
    /// allocation above `limit + burst_limit`.
    pub fn set_limit(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("limit", amount)?;
        let ceiling = amount + self.burst_limits.get(rtype);
        if self.allocated.get(rtype) > ceiling {
            return Err(QuotaError::InvalidConfiguration(format!(
                "{rtype} limit {amount} would drop the ceiling below the current allocation {}",
                self.allocated.get(rtype)
            )));
        }
        self.limits.set(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Set the temporary overflow allowance above the base limit.
    pub fn set_burst_limit(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("burst limit", amount)?;
        let ceiling = self.limits.get(rtype) + amount;
        if self.allocated.get(rtype) > ceiling {
            return Err(QuotaError::InvalidConfiguration(format!(
                "{rtype} burst limit {amount} would drop the ceiling below the current allocation {}",
                self.allocated.get(rtype)
            )));
        }
        self.burst_limits.set(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Set the billing period bounds. `start` must precede `end`.
    pub fn set_billing_period(&mut self, start: u64, end: u64) -> QuotaResult<()> {
        if start >= end {
            return Err(QuotaError::InvalidConfiguration(format!(
                "billing period start {start} must precede end {end}"
            )));
        }
        self.billing_period_start = Some(start);
        self.billing_period_end = Some(end);
        self.touch();
        Ok(())
    }

    /// Configure the monthly budget.
    pub fn configure_budget(&mut self, budget: BudgetConfig) -> QuotaResult<()> {
        ensure_amount("monthly budget", budget.monthly_budget)?;
        ensure_percent("budget alert percent", budget.alert_percent)?;
        self.budget = Some(budget);
        self.touch();
        Ok(())
    }

    // ── Allocation ─────────────────────────────────────────────────

    /// Unallocated capacity: `limit + burst_limit - allocated`.
    pub fn available(&self, rtype: ResourceType) -> f64 {
        (self.limits.get(rtype) + self.burst_limits.get(rtype) - self.allocated.get(rtype))
            .max(0.0)
    }

    /// Whether `amount` fits in the remaining capacity.
    pub fn can_allocate(&self, rtype: ResourceType, amount: f64) -> bool {
        amount.is_finite() && amount >= 0.0 && amount <= self.available(rtype)
    }

    /// Grant `amount` to a world. The only mutator of `allocated`.
    pub fn allocate_to_world(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("allocation", amount)?;
        if !self.can_allocate(rtype, amount) {
            return Err(QuotaError::InsufficientResource {
                resource: rtype,
                requested: amount,
                available: self.available(rtype),
            });
        }
        self.allocated.add(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Return previously granted capacity. Floors at zero.
    pub fn release_from_world(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("release", amount)?;
        self.allocated.sub_floor(rtype, amount);
        self.touch();
        Ok(())
    }

    // ── Metered usage ──────────────────────────────────────────────

    /// Record metered usage against the pool for the current period.
    pub fn record_usage(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("usage", amount)?;
        self.used.add(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Usage as a percentage of the base limit. Zero when no limit is set.
    pub fn usage_percent(&self, rtype: ResourceType) -> f64 {
        let limit = self.limits.get(rtype);
        if limit == 0.0 {
            return 0.0;
        }
        self.used.get(rtype) / limit * 100.0
    }

    pub fn is_limit_exceeded(&self, rtype: ResourceType) -> bool {
        self.used.get(rtype) >= self.limits.get(rtype) && self.limits.get(rtype) > 0.0
    }

    pub fn is_burst_limit_exceeded(&self, rtype: ResourceType) -> bool {
        let ceiling = self.limits.get(rtype) + self.burst_limits.get(rtype);
        self.used.get(rtype) >= ceiling && ceiling > 0.0
    }

    /// Record spend against the monthly budget.
    pub fn record_spend(&mut self, amount: f64) -> QuotaResult<()> {
        ensure_amount("spend", amount)?;
        self.period_spend += amount;
        self.touch();
        Ok(())
    }

    /// Budget threshold level for the current period spend.
    pub fn budget_level(&self) -> BudgetLevel {
        let Some(budget) = &self.budget else {
            return BudgetLevel::Normal;
        };
        if budget.monthly_budget == 0.0 || self.period_spend >= budget.monthly_budget {
            return BudgetLevel::Exceeded;
        }
        if self.period_spend >= budget.monthly_budget * budget.alert_percent / 100.0 {
            return BudgetLevel::Warning;
        }
        BudgetLevel::Normal
    }

    /// Reset metered usage and spend at the start of a new billing period.
    pub fn reset_usage_for_period(&mut self) {
        self.used.clear();
        self.period_spend = 0.0;
        self.touch();
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn subscription_tier(&self) -> &str {
        &self.subscription_tier
    }

    pub fn limit(&self, rtype: ResourceType) -> f64 {
        self.limits.get(rtype)
    }

    pub fn burst_limit(&self, rtype: ResourceType) -> f64 {
        self.burst_limits.get(rtype)
    }

    pub fn allocated(&self, rtype: ResourceType) -> f64 {
        self.allocated.get(rtype)
    }

    pub fn used(&self, rtype: ResourceType) -> f64 {
        self.used.get(rtype)
    }

    pub fn period_spend(&self) -> f64 {
        self.period_spend
    }

    pub fn budget(&self) -> Option<&BudgetConfig> {
        self.budget.as_ref()
    }

    pub fn billing_period(&self) -> Option<(u64, u64)> {
        self.billing_period_start.zip(self.billing_period_end)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bump the optimistic-concurrency version. Called by store
    /// implementations on successful save.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    fn touch(&mut self) {
        self.updated_at = epoch_secs();
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
