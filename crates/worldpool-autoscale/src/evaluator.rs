//! Evaluator — metric-driven scaling decisions per world.
//!
//! Reads the current metric values for each world from a [`MetricsSource`],
//! walks the world's rule set in configured order, and emits at most one
//! [`ScalingDecision`] per world per tick. The actual scaling is performed
//! by a callback to an external executor; the evaluator neither waits for
//! nor verifies execution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use worldpool_core::{Clock, ScalingAction, WorldId, WorldResources};
use worldpool_state::{ResourceStore, StateError};

/// Read-only source of current metric values, keyed by world and metric
/// name. Possibly stale; a missing value means "no trigger this tick".
pub trait MetricsSource: Send + Sync {
    fn value(&self, world_id: &str, metric: &str) -> Option<f64>;
    /// Number of instances currently running for a world.
    fn active_instances(&self, world_id: &str) -> Option<u32>;
}

/// A scaling decision for a single world.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingDecision {
    pub world_id: WorldId,
    /// The rule whose trigger won the tick.
    pub rule_id: Uuid,
    pub action: ScalingAction,
    pub metric: String,
    pub observed: f64,
    pub current_instances: u32,
    pub target_instances: u32,
}

/// Callback type for handing decisions to the scaling executor.
pub type ScaleCallback = Box<dyn Fn(&ScalingDecision) -> BoxFuture + Send + Sync>;

type BoxFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// The evaluator walks each world's scaling rules and decides whether a
/// scaling action should fire, respecting per-rule cooldowns and the
/// world's instance bounds.
pub struct Evaluator<S> {
    store: S,
    metrics: Arc<dyn MetricsSource>,
    clock: Arc<dyn Clock>,
    /// Callback to hand decisions to the executor.
    scale_fn: Option<ScaleCallback>,
}

impl<S: ResourceStore> Evaluator<S> {
    pub fn new(store: S, metrics: Arc<dyn MetricsSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            metrics,
            clock,
            scale_fn: None,
        }
    }

    /// Set the callback used to dispatch decisions.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Evaluate a single world's rule set and return a decision, if any.
    ///
    /// Rules evaluate sequentially in configured order; every rule that
    /// fires enters its cooldown, and the last winning action is the
    /// decision for the tick. A trigger clamped back to the current
    /// instance count emits nothing and does not consume its cooldown.
    pub fn evaluate(&self, world: &mut WorldResources) -> Option<ScalingDecision> {
        let config = world.auto_scaling().clone();
        if !config.enabled || world.is_retired() {
            return None;
        }
        if config.paused {
            debug!(world_id = %world.world_id(), "auto-scaling paused, skipping evaluation");
            return None;
        }

        let world_id = world.world_id().to_string();
        let current = match self.metrics.active_instances(&world_id) {
            Some(n) => n,
            None => {
                debug!(world_id = %world_id, "no instance count this tick");
                return None;
            }
        };

        let now = self.clock.epoch_secs();
        let mut decision = None;

        for rule in world.rules_mut() {
            // A stale or missing metric is not a trigger.
            let observed = match self.metrics.value(&world_id, &rule.metric_name) {
                Some(v) => v,
                None => continue,
            };

            let crossed = match rule.action {
                ScalingAction::ScaleUp => observed >= rule.threshold,
                ScalingAction::ScaleDown => observed <= rule.threshold,
                ScalingAction::NoOp => false,
            };
            if !crossed {
                continue;
            }

            if rule.is_cooling_down(now) {
                debug!(
                    world_id = %world_id,
                    rule_id = %rule.id,
                    metric = %rule.metric_name,
                    "rule cooling down, trigger suppressed"
                );
                continue;
            }

            let (target, moves) = match rule.action {
                ScalingAction::ScaleUp => {
                    let t = current.saturating_add(1).min(config.max_instances);
                    (t, t > current)
                }
                ScalingAction::ScaleDown => {
                    let t = current.saturating_sub(1).max(config.min_instances);
                    (t, t < current)
                }
                ScalingAction::NoOp => unreachable!("no-op rules never cross"),
            };
            if !moves {
                // At the bound: emit nothing, leave the cooldown unspent.
                debug!(
                    world_id = %world_id,
                    rule_id = %rule.id,
                    current,
                    "trigger clamped at instance bound"
                );
                continue;
            }

            rule.mark_triggered(now);
            debug!(
                world_id = %world_id,
                rule_id = %rule.id,
                metric = %rule.metric_name,
                observed,
                from = current,
                to = target,
                "scaling rule triggered"
            );
            decision = Some(ScalingDecision {
                world_id: world_id.clone(),
                rule_id: rule.id,
                action: rule.action,
                metric: rule.metric_name.clone(),
                observed,
                current_instances: current,
                target_instances: target,
            });
        }

        decision
    }

    /// Evaluate every world with auto-scaling enabled.
    ///
    /// Mutated rule state (cooldown timestamps) is persisted back before the
    /// decision is dispatched; a record that changed mid-evaluation drops
    /// its decision and is re-evaluated fresh on the next tick.
    pub async fn evaluate_all(&self) -> anyhow::Result<Vec<ScalingDecision>> {
        let worlds = self.store.list_worlds()?;
        let mut decisions = Vec::new();

        for mut world in worlds {
            let Some(decision) = self.evaluate(&mut world) else {
                continue;
            };

            match self.store.save_world(&mut world) {
                Ok(()) => {}
                Err(StateError::Conflict { .. }) => {
                    warn!(
                        world_id = %world.world_id(),
                        "world record changed mid-evaluation, decision dropped"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(ref scale_fn) = self.scale_fn
                && let Err(e) = scale_fn(&decision).await
            {
                warn!(
                    world_id = %decision.world_id,
                    target = decision.target_instances,
                    error = %e,
                    "scaling action failed"
                );
            }

            decisions.push(decision);
        }

        Ok(decisions)
    }

    /// Run the evaluation loop.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "auto-scaling evaluator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_all().await {
                        tracing::error!(error = %e, "auto-scaling evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("auto-scaling evaluator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use worldpool_core::{AutoScalingConfig, AutoScalingRule, ManualClock};
    use worldpool_state::RedbStore;

    /// Mutable in-memory metrics for tests.
    #[derive(Default)]
    struct TestMetrics {
        values: Mutex<HashMap<(String, String), f64>>,
        instances: Mutex<HashMap<String, u32>>,
    }

    impl TestMetrics {
        fn set_value(&self, world_id: &str, metric: &str, value: f64) {
            self.values
                .lock()
                .unwrap()
                .insert((world_id.to_string(), metric.to_string()), value);
        }

        fn set_instances(&self, world_id: &str, count: u32) {
            self.instances
                .lock()
                .unwrap()
                .insert(world_id.to_string(), count);
        }
    }

    impl MetricsSource for TestMetrics {
        fn value(&self, world_id: &str, metric: &str) -> Option<f64> {
            self.values
                .lock()
                .unwrap()
                .get(&(world_id.to_string(), metric.to_string()))
                .copied()
        }

        fn active_instances(&self, world_id: &str) -> Option<u32> {
            self.instances.lock().unwrap().get(world_id).copied()
        }
    }

    fn scaling_world(min: u32, max: u32) -> WorldResources {
        let mut world = WorldResources::new("world-1", "owner-1", "midgard");
        world
            .configure_auto_scaling(AutoScalingConfig {
                enabled: true,
                paused: false,
                min_instances: min,
                max_instances: max,
                max_cost_per_hour: None,
            })
            .unwrap();
        world
    }

    fn harness(
        current_instances: u32,
    ) -> (Evaluator<RedbStore>, Arc<TestMetrics>, Arc<ManualClock>) {
        let store = RedbStore::open_in_memory().unwrap();
        let metrics = Arc::new(TestMetrics::default());
        metrics.set_instances("world-1", current_instances);
        let clock = Arc::new(ManualClock::new(10_000));
        let evaluator = Evaluator::new(store, metrics.clone(), clock.clone());
        (evaluator, metrics, clock)
    }

    #[test]
    fn disabled_world_is_skipped() {
        let (evaluator, metrics, _) = harness(2);
        let mut world = WorldResources::new("world-1", "owner-1", "midgard");
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                0,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        assert_eq!(evaluator.evaluate(&mut world), None);
    }

    #[test]
    fn paused_world_emits_nothing() {
        let (evaluator, metrics, _) = harness(2);
        let mut world = scaling_world(1, 10);
        let mut config = world.auto_scaling().clone();
        config.paused = true;
        world.configure_auto_scaling(config).unwrap();
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                0,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        assert_eq!(evaluator.evaluate(&mut world), None);
        // Pausing does not consume the cooldown.
        assert_eq!(world.rules()[0].last_triggered_at, None);
    }

    #[test]
    fn scale_up_past_threshold() {
        let (evaluator, metrics, clock) = harness(2);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        let decision = evaluator.evaluate(&mut world).unwrap();
        assert_eq!(decision.action, ScalingAction::ScaleUp);
        assert_eq!(decision.current_instances, 2);
        assert_eq!(decision.target_instances, 3);
        assert_eq!(world.rules()[0].last_triggered_at, Some(clock.epoch_secs()));
    }

    #[test]
    fn scale_down_below_threshold() {
        let (evaluator, metrics, _) = harness(4);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                20.0,
                ScalingAction::ScaleDown,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 10.0);

        let decision = evaluator.evaluate(&mut world).unwrap();
        assert_eq!(decision.action, ScalingAction::ScaleDown);
        assert_eq!(decision.target_instances, 3);
    }

    #[test]
    fn cooldown_gates_retrigger() {
        let (evaluator, metrics, clock) = harness(2);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        assert!(evaluator.evaluate(&mut world).is_some());

        // One minute later the metric is still past the threshold.
        clock.advance(60);
        assert_eq!(evaluator.evaluate(&mut world), None);

        // Six minutes after the trigger the rule may fire again.
        clock.advance(300);
        assert!(evaluator.evaluate(&mut world).is_some());
    }

    #[test]
    fn scale_up_at_max_is_a_noop_and_keeps_cooldown() {
        let (evaluator, metrics, _) = harness(10);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        assert_eq!(evaluator.evaluate(&mut world), None);
        // Bound-clamped triggers do not consume the cooldown.
        assert_eq!(world.rules()[0].last_triggered_at, None);
    }

    #[test]
    fn scale_down_at_min_is_a_noop() {
        let (evaluator, metrics, _) = harness(1);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                20.0,
                ScalingAction::ScaleDown,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 5.0);

        assert_eq!(evaluator.evaluate(&mut world), None);
        assert_eq!(world.rules()[0].last_triggered_at, None);
    }

    #[test]
    fn last_winning_action_resolves_conflicts() {
        let (evaluator, metrics, _) = harness(5);
        let mut world = scaling_world(1, 10);
        // Both rules fire this tick; the later rule wins.
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "queue_depth",
                10.0,
                ScalingAction::ScaleDown,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);
        metrics.set_value("world-1", "queue_depth", 2.0);

        let decision = evaluator.evaluate(&mut world).unwrap();
        assert_eq!(decision.action, ScalingAction::ScaleDown);
        // Both rules consumed their cooldown.
        assert!(world.rules()[0].last_triggered_at.is_some());
        assert!(world.rules()[1].last_triggered_at.is_some());
    }

    #[test]
    fn noop_rules_never_emit() {
        let (evaluator, metrics, _) = harness(2);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::NoOp,
                300,
            ))
            .unwrap();
        metrics.set_value("world-1", "cpu_usage", 95.0);

        assert_eq!(evaluator.evaluate(&mut world), None);
    }

    #[test]
    fn missing_metric_is_not_a_trigger() {
        let (evaluator, _, _) = harness(2);
        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();

        assert_eq!(evaluator.evaluate(&mut world), None);
    }

    #[test]
    fn missing_instance_count_skips_the_world() {
        let store = RedbStore::open_in_memory().unwrap();
        let metrics = Arc::new(TestMetrics::default());
        metrics.set_value("world-1", "cpu_usage", 95.0);
        let clock = Arc::new(ManualClock::new(10_000));
        let evaluator = Evaluator::new(store, metrics, clock);

        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();

        assert_eq!(evaluator.evaluate(&mut world), None);
    }

    #[tokio::test]
    async fn evaluate_all_persists_rule_state_and_dispatches() {
        let store = RedbStore::open_in_memory().unwrap();
        let metrics = Arc::new(TestMetrics::default());
        metrics.set_instances("world-1", 2);
        metrics.set_value("world-1", "cpu_usage", 95.0);
        let clock = Arc::new(ManualClock::new(10_000));

        let mut world = scaling_world(1, 10);
        world
            .add_auto_scaling_rule(AutoScalingRule::new(
                "cpu_usage",
                80.0,
                ScalingAction::ScaleUp,
                300,
            ))
            .unwrap();
        store.save_world(&mut world).unwrap();

        let dispatched = Arc::new(AtomicU32::new(0));
        let counter = dispatched.clone();
        let evaluator = Evaluator::new(store.clone(), metrics, clock).with_scale_fn(Box::new(
            move |decision| {
                assert_eq!(decision.target_instances, 3);
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            },
        ));

        let decisions = evaluator.evaluate_all().await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);

        // Cooldown state survived the round trip.
        let reloaded = store.find_world("owner-1", "world-1").unwrap().unwrap();
        assert_eq!(reloaded.rules()[0].last_triggered_at, Some(10_000));

        // Next tick is inside the cooldown window; nothing fires.
        let decisions = evaluator.evaluate_all().await.unwrap();
        assert!(decisions.is_empty());
    }
}
