//! WorldResources — per-world quota record.
//!
//! Tracks what a world may claim (quota), what it currently holds
//! (allocation), warning/critical alert thresholds, its auto-scaling
//! configuration and rule set, and its capacity-sharing configuration.
//! Invariant: `allocation[t] <= quota[t]` for every resource type.
//!
//! Pool-side availability is NOT verified here; the ledger coordinates this
//! record and the owner's `ResourcePool` in the same critical section.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ensure_amount, ensure_percent, QuotaError, QuotaResult};
use crate::types::{OwnerId, ResourcePriority, ResourceTable, ResourceType, WorldId};

// ── Thresholds ─────────────────────────────────────────────────────

/// Alerting thresholds for one resource type, as percentages of quota.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceThreshold {
    warning_percent: f64,
    critical_percent: f64,
}

impl ResourceThreshold {
    /// Requires `0 <= warning < critical <= 100`.
    pub fn new(warning_percent: f64, critical_percent: f64) -> QuotaResult<Self> {
        ensure_percent("warning threshold", warning_percent)?;
        ensure_percent("critical threshold", critical_percent)?;
        if warning_percent >= critical_percent {
            return Err(QuotaError::InvalidConfiguration(format!(
                "warning threshold {warning_percent} must be below critical {critical_percent}"
            )));
        }
        Ok(Self {
            warning_percent,
            critical_percent,
        })
    }

    pub fn warning_percent(&self) -> f64 {
        self.warning_percent
    }

    pub fn critical_percent(&self) -> f64 {
        self.critical_percent
    }

    /// Bucket a utilization percentage. The buckets are mutually exclusive:
    /// at or above critical is `Critical`, never `Warning`.
    pub fn level(&self, percent: f64) -> ThresholdLevel {
        if percent >= self.critical_percent {
            ThresholdLevel::Critical
        } else if percent >= self.warning_percent {
            ThresholdLevel::Warning
        } else {
            ThresholdLevel::Normal
        }
    }
}

/// Alert level for a resource's utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLevel {
    Normal,
    Warning,
    Critical,
}

// ── Auto-scaling ───────────────────────────────────────────────────

/// What a triggered rule asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    /// Alert-only rule; never emits a decision.
    NoOp,
}

/// A metric-threshold-triggered scaling rule.
///
/// `last_triggered_at` is the rule's mutable cooldown state: the rule cannot
/// re-trigger before `last_triggered_at + cooldown_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingRule {
    pub id: Uuid,
    pub metric_name: String,
    pub threshold: f64,
    pub action: ScalingAction,
    pub cooldown_secs: u64,
    pub last_triggered_at: Option<u64>,
}

impl AutoScalingRule {
    pub fn new(
        metric_name: impl Into<String>,
        threshold: f64,
        action: ScalingAction,
        cooldown_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric_name: metric_name.into(),
            threshold,
            action,
            cooldown_secs,
            last_triggered_at: None,
        }
    }

    /// Whether the rule is still inside its cooldown window at `now`.
    pub fn is_cooling_down(&self, now: u64) -> bool {
        match self.last_triggered_at {
            Some(at) => now < at + self.cooldown_secs,
            None => false,
        }
    }

    /// Start the cooldown window.
    pub fn mark_triggered(&mut self, now: u64) {
        self.last_triggered_at = Some(now);
    }
}

/// World-level auto-scaling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingConfig {
    pub enabled: bool,
    /// When true, rule evaluation is suspended without touching the rule set.
    pub paused: bool,
    pub min_instances: u32,
    pub max_instances: u32,
    pub max_cost_per_hour: Option<f64>,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paused: false,
            min_instances: 1,
            max_instances: 1,
            max_cost_per_hour: None,
        }
    }
}

// ── Sharing ────────────────────────────────────────────────────────

/// How a world participates in capacity sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Quota is fixed; no lending.
    Static,
    /// Unused quota may be lent to peer worlds under the same pool.
    Dynamic,
}

/// Capacity-sharing settings for a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingConfig {
    pub enabled: bool,
    pub mode: SharingMode,
    /// Cap on the share of spare capacity this world will lend, in percent.
    pub max_share_percent: f64,
    /// Priority this world carries when requesting borrowed capacity.
    pub priority: ResourcePriority,
    /// Delay before a scheduled reclaim of lent capacity fires.
    pub reclaim_delay_secs: u64,
}

impl SharingConfig {
    /// Dynamic lending with the given share cap.
    pub fn dynamic(max_share_percent: f64) -> Self {
        Self {
            enabled: true,
            mode: SharingMode::Dynamic,
            max_share_percent,
            priority: ResourcePriority::Equal,
            reclaim_delay_secs: 0,
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: SharingMode::Static,
            max_share_percent: 0.0,
            priority: ResourcePriority::Equal,
            reclaim_delay_secs: 0,
        }
    }
}

// ── World record ───────────────────────────────────────────────────

/// Per-world quota record aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldResources {
    world_id: WorldId,
    owner_id: OwnerId,
    world_name: String,
    priority: ResourcePriority,
    quotas: ResourceTable,
    allocations: ResourceTable,
    thresholds: [Option<ResourceThreshold>; ResourceType::ALL.len()],
    auto_scaling: AutoScalingConfig,
    rules: Vec<AutoScalingRule>,
    sharing: SharingConfig,
    retired: bool,
    /// Optimistic-concurrency version, bumped by the store on save.
    version: u64,
    created_at: u64,
    updated_at: u64,
}

impl WorldResources {
    /// Create a record with zero quotas; auto-scaling and sharing start
    /// disabled.
    pub fn new(
        world_id: impl Into<WorldId>,
        owner_id: impl Into<OwnerId>,
        world_name: impl Into<String>,
    ) -> Self {
        let now = epoch_secs();
        Self {
            world_id: world_id.into(),
            owner_id: owner_id.into(),
            world_name: world_name.into(),
            priority: ResourcePriority::Equal,
            quotas: ResourceTable::zeroed(),
            allocations: ResourceTable::zeroed(),
            thresholds: [None; ResourceType::ALL.len()],
            auto_scaling: AutoScalingConfig::default(),
            rules: Vec::new(),
            sharing: SharingConfig::default(),
            retired: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ── Quota and allocation ───────────────────────────────────────

    /// Set this world's cap for a resource type.
    ///
    /// Rejects negative amounts and any quota below the current allocation.
    pub fn set_quota(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("quota", amount)?;
        if self.allocations.get(rtype) > amount {
            return Err(QuotaError::InvalidConfiguration(format!(
                "{rtype} quota {amount} is below the current allocation {}",
                self.allocations.get(rtype)
            )));
        }
        self.quotas.set(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Record the amount currently granted to this world.
    ///
    /// Bookkeeping only: pool availability is the ledger's responsibility,
    /// but the world-local invariant `allocation <= quota` is enforced here.
    pub fn set_allocation(&mut self, rtype: ResourceType, amount: f64) -> QuotaResult<()> {
        ensure_amount("allocation", amount)?;
        let quota = self.quotas.get(rtype);
        if amount > quota {
            return Err(QuotaError::InsufficientResource {
                resource: rtype,
                requested: amount,
                available: quota,
            });
        }
        self.allocations.set(rtype, amount);
        self.touch();
        Ok(())
    }

    /// Unused portion of this world's own quota.
    pub fn headroom(&self, rtype: ResourceType) -> f64 {
        (self.quotas.get(rtype) - self.allocations.get(rtype)).max(0.0)
    }

    // ── Thresholds ─────────────────────────────────────────────────

    /// Configure warning/critical thresholds for a resource type.
    pub fn set_threshold(
        &mut self,
        rtype: ResourceType,
        warning_percent: f64,
        critical_percent: f64,
    ) -> QuotaResult<()> {
        let threshold = ResourceThreshold::new(warning_percent, critical_percent)?;
        self.thresholds[rtype.ordinal()] = Some(threshold);
        self.touch();
        Ok(())
    }

    pub fn threshold(&self, rtype: ResourceType) -> Option<&ResourceThreshold> {
        self.thresholds[rtype.ordinal()].as_ref()
    }

    /// Utilization of quota in percent. Zero when no quota is set.
    pub fn utilization_percent(&self, rtype: ResourceType) -> f64 {
        let quota = self.quotas.get(rtype);
        if quota == 0.0 {
            return 0.0;
        }
        self.allocations.get(rtype) / quota * 100.0
    }

    /// Alert level for one resource type.
    pub fn threshold_level(&self, rtype: ResourceType) -> ThresholdLevel {
        match self.threshold(rtype) {
            Some(t) => t.level(self.utilization_percent(rtype)),
            None => ThresholdLevel::Normal,
        }
    }

    /// Types whose utilization sits in the warning band.
    ///
    /// A type at or above its critical threshold is excluded; the warning
    /// and critical buckets never overlap.
    pub fn resources_at_warning_level(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|&t| self.threshold_level(t) == ThresholdLevel::Warning)
            .collect()
    }

    /// Types whose utilization is at or above the critical threshold.
    pub fn resources_at_critical_level(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|&t| self.threshold_level(t) == ThresholdLevel::Critical)
            .collect()
    }

    // ── Auto-scaling ───────────────────────────────────────────────

    /// Replace the auto-scaling settings. Requires `min <= max` and a
    /// non-negative cost ceiling.
    pub fn configure_auto_scaling(&mut self, config: AutoScalingConfig) -> QuotaResult<()> {
        if config.min_instances > config.max_instances {
            return Err(QuotaError::InvalidConfiguration(format!(
                "min instances {} exceeds max instances {}",
                config.min_instances, config.max_instances
            )));
        }
        if let Some(cost) = config.max_cost_per_hour {
            ensure_amount("max cost per hour", cost)?;
        }
        self.auto_scaling = config;
        self.touch();
        Ok(())
    }

    /// Append a rule to the evaluation order.
    pub fn add_auto_scaling_rule(&mut self, rule: AutoScalingRule) -> QuotaResult<()> {
        if !rule.threshold.is_finite() {
            return Err(QuotaError::InvalidConfiguration(format!(
                "rule threshold must be finite, got {}",
                rule.threshold
            )));
        }
        if rule.metric_name.is_empty() {
            return Err(QuotaError::InvalidConfiguration(
                "rule metric name must not be empty".to_string(),
            ));
        }
        self.rules.push(rule);
        self.touch();
        Ok(())
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn remove_auto_scaling_rule(&mut self, id: Uuid) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        let removed = self.rules.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn enable_auto_scaling(&mut self) {
        self.auto_scaling.enabled = true;
        self.touch();
    }

    /// Flip `enabled` off. The rule set and the rest of the configuration
    /// are preserved; re-enabling restores the exact prior behavior.
    pub fn disable_auto_scaling(&mut self) {
        self.auto_scaling.enabled = false;
        self.touch();
    }

    pub fn is_auto_scaling_enabled(&self) -> bool {
        self.auto_scaling.enabled
    }

    pub fn auto_scaling(&self) -> &AutoScalingConfig {
        &self.auto_scaling
    }

    pub fn rules(&self) -> &[AutoScalingRule] {
        &self.rules
    }

    /// Mutable access to the rule set, in evaluation order. Used by the
    /// evaluator to persist cooldown state.
    pub fn rules_mut(&mut self) -> &mut [AutoScalingRule] {
        &mut self.rules
    }

    // ── Sharing ────────────────────────────────────────────────────

    /// Replace the sharing settings.
    pub fn configure_sharing(&mut self, config: SharingConfig) -> QuotaResult<()> {
        ensure_percent("max share percent", config.max_share_percent)?;
        self.sharing = config;
        self.touch();
        Ok(())
    }

    pub fn enable_sharing(&mut self) {
        self.sharing.enabled = true;
        self.touch();
    }

    /// Flip `enabled` off, preserving mode, share cap, priority, and
    /// reclaim delay for a later re-enable.
    pub fn disable_sharing(&mut self) {
        self.sharing.enabled = false;
        self.touch();
    }

    pub fn is_sharing_enabled(&self) -> bool {
        self.sharing.enabled
    }

    pub fn sharing(&self) -> &SharingConfig {
        &self.sharing
    }

    // ── Lifecycle and accessors ────────────────────────────────────

    pub fn set_priority(&mut self, priority: ResourcePriority) {
        self.priority = priority;
        self.touch();
    }

    /// Soft-retire the record alongside its world. Retired worlds are
    /// skipped by the evaluator and the sharing arbiter.
    pub fn retire(&mut self) {
        self.retired = true;
        self.touch();
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    pub fn priority(&self) -> ResourcePriority {
        self.priority
    }

    pub fn quota(&self, rtype: ResourceType) -> f64 {
        self.quotas.get(rtype)
    }

    pub fn allocation(&self, rtype: ResourceType) -> f64 {
        self.allocations.get(rtype)
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
