//! worldpool-autoscale — cooldown-gated scaling rule evaluation.
//!
//! Each world carries an ordered set of `AutoScalingRule`s. Per tick, the
//! evaluator walks them sequentially and emits at most one decision:
//!
//! ```text
//! for rule in rules (configured order):
//!     observed = metrics[world, rule.metric]        # missing → skip
//!     crossed  = observed >= threshold (scale-up)
//!              | observed <= threshold (scale-down)
//!     if crossed and not cooling_down:
//!         target = clamp(current ± 1, min..=max)
//!         if target != current:
//!             rule enters cooldown; decision = (action, target)
//! # the last winning action is the decision for the tick
//! ```
//!
//! A paused config suppresses evaluation entirely; a trigger clamped at an
//! instance bound emits nothing and does not consume its cooldown. Decisions
//! are handed to an executor callback — the evaluator never provisions
//! compute itself.

pub mod evaluator;

pub use evaluator::{Evaluator, MetricsSource, ScaleCallback, ScalingDecision};
