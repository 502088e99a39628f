//! Scaling commands and the pluggable strategies that produce them.
//!
//! Grounded in `arceon-performance::scalability_manager`'s policy/decision
//! shape, reworked into a single pure capability —
//! `Snapshot -> Command | none` — with tagged variants (`LoadBased`,
//! `QueueBased`, `Composite`) instead of a deep decision-record
//! inheritance hierarchy.

use std::sync::Arc;

use crate::snapshot::PoolSnapshot;

/// Deltas a [`ScalingStrategy`] wants applied to a pool. Never mutates
/// anything itself — see [`crate::scaler::Scaler`] for the applicator.
#[derive(Debug, Clone, Default)]
pub struct ScalingCommand {
    pub thread_delta: i64,
    pub core_size_delta: i64,
    pub max_size_delta: i64,
    pub queue_capacity_delta: i64,
    pub keep_alive_delta_ms: i64,
    pub reason: String,
}

impl ScalingCommand {
    pub fn has_adjustments(&self) -> bool {
        self.thread_delta != 0
            || self.core_size_delta != 0
            || self.max_size_delta != 0
            || self.queue_capacity_delta != 0
            || self.keep_alive_delta_ms != 0
    }
}

/// A pure function from sampled pool state to a desired adjustment.
/// Strategies never mutate the pool; they only describe intent.
pub trait ScalingStrategy: Send + Sync {
    fn calculate_scaling(&self, snapshot: &PoolSnapshot) -> Option<ScalingCommand>;
}

/// Scales on thread utilisation (`active / poolSize`).
#[derive(Debug, Clone)]
pub struct LoadBasedStrategy {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub scale_up: i64,
    pub scale_down: i64,
    pub keep_alive_adjustment_ms: i64,
}

impl ScalingStrategy for LoadBasedStrategy {
    fn calculate_scaling(&self, snapshot: &PoolSnapshot) -> Option<ScalingCommand> {
        if snapshot.pool_size == 0 {
            return None;
        }
        let load = snapshot.active_threads as f64 / snapshot.pool_size as f64;

        if load > self.high_threshold && snapshot.pool_size < snapshot.max_pool_size {
            Some(ScalingCommand {
                thread_delta: self.scale_up,
                core_size_delta: self.scale_up,
                max_size_delta: 2 * self.scale_up,
                queue_capacity_delta: 0,
                keep_alive_delta_ms: -self.keep_alive_adjustment_ms,
                reason: format!("High load detected ({:.0}% > {:.0}%)", load * 100.0, self.high_threshold * 100.0),
            })
        } else if load < self.low_threshold && snapshot.max_pool_size > snapshot.pool_size {
            Some(ScalingCommand {
                thread_delta: -self.scale_down,
                core_size_delta: -self.scale_down,
                max_size_delta: 0,
                queue_capacity_delta: 0,
                keep_alive_delta_ms: self.keep_alive_adjustment_ms,
                reason: format!("Low load detected ({:.0}% < {:.0}%)", load * 100.0, self.low_threshold * 100.0),
            })
        } else {
            None
        }
    }
}

/// Scales on queue backlog.
#[derive(Debug, Clone)]
pub struct QueueBasedStrategy {
    pub queue_threshold: usize,
    pub scale_up: i64,
    /// Fraction of `queueSize` added to queue capacity when scaling up.
    pub capacity_ratio: f64,
}

impl ScalingStrategy for QueueBasedStrategy {
    fn calculate_scaling(&self, snapshot: &PoolSnapshot) -> Option<ScalingCommand> {
        if snapshot.queue_size > self.queue_threshold && snapshot.pool_size < snapshot.max_pool_size {
            Some(ScalingCommand {
                thread_delta: self.scale_up,
                core_size_delta: self.scale_up,
                max_size_delta: 2 * self.scale_up,
                queue_capacity_delta: ((snapshot.queue_size as f64) * self.capacity_ratio).floor() as i64,
                keep_alive_delta_ms: 0,
                reason: format!("Queue size ({}) exceeded threshold ({})", snapshot.queue_size, self.queue_threshold),
            })
        } else {
            None
        }
    }
}

/// Runs children in order, sums the deltas of every non-`None` result, and
/// concatenates their reasons with `" + "`, prefixed `"Combined: "`. Returns
/// `None` only if every child returned `None`.
pub struct CompositeStrategy {
    pub children: Vec<Arc<dyn ScalingStrategy>>,
}

impl ScalingStrategy for CompositeStrategy {
    fn calculate_scaling(&self, snapshot: &PoolSnapshot) -> Option<ScalingCommand> {
        let commands: Vec<ScalingCommand> = self.children.iter().filter_map(|child| child.calculate_scaling(snapshot)).collect();

        if commands.is_empty() {
            return None;
        }

        let mut combined = ScalingCommand::default();
        let mut reasons = Vec::with_capacity(commands.len());
        for command in &commands {
            combined.thread_delta += command.thread_delta;
            combined.core_size_delta += command.core_size_delta;
            combined.max_size_delta += command.max_size_delta;
            combined.queue_capacity_delta += command.queue_capacity_delta;
            combined.keep_alive_delta_ms += command.keep_alive_delta_ms;
            reasons.push(command.reason.clone());
        }
        combined.reason = format!("Combined: {}", reasons.join(" + "));
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Stats, StatsConfig};

    fn snapshot(active: usize, pool_size: usize, max_pool_size: usize, queue_size: usize) -> PoolSnapshot {
        let stats = Stats::new(StatsConfig::default());
        PoolSnapshot::now(stats.snapshot(), active, pool_size, max_pool_size, queue_size, 1000, 0)
    }

    #[test]
    fn load_based_scales_up_on_high_load() {
        let strategy = LoadBasedStrategy {
            high_threshold: 0.8,
            low_threshold: 0.2,
            scale_up: 2,
            scale_down: 1,
            keep_alive_adjustment_ms: 1000,
        };
        let command = strategy.calculate_scaling(&snapshot(4, 4, 8, 0)).unwrap();
        assert_eq!(command.core_size_delta, 2);
        assert_eq!(command.max_size_delta, 4);
        assert!(command.reason.starts_with("High load detected"));
    }

    #[test]
    fn load_based_scales_down_on_low_load() {
        let strategy = LoadBasedStrategy {
            high_threshold: 0.8,
            low_threshold: 0.2,
            scale_up: 2,
            scale_down: 1,
            keep_alive_adjustment_ms: 1000,
        };
        let command = strategy.calculate_scaling(&snapshot(1, 8, 8, 0)).unwrap();
        assert_eq!(command.core_size_delta, -1);
        assert_eq!(command.keep_alive_delta_ms, 1000);
    }

    #[test]
    fn load_based_returns_none_in_steady_band() {
        let strategy = LoadBasedStrategy {
            high_threshold: 0.8,
            low_threshold: 0.2,
            scale_up: 2,
            scale_down: 1,
            keep_alive_adjustment_ms: 1000,
        };
        assert!(strategy.calculate_scaling(&snapshot(4, 8, 8, 0)).is_none());
    }

    #[test]
    fn queue_based_scales_up_on_backlog() {
        let strategy = QueueBasedStrategy {
            queue_threshold: 100,
            scale_up: 3,
            capacity_ratio: 0.5,
        };
        let command = strategy.calculate_scaling(&snapshot(0, 2, 8, 200)).unwrap();
        assert_eq!(command.core_size_delta, 3);
        assert_eq!(command.queue_capacity_delta, 100);
    }

    #[test]
    fn composite_sums_deltas_and_joins_reasons() {
        let load = Arc::new(LoadBasedStrategy {
            high_threshold: 0.5,
            low_threshold: 0.1,
            scale_up: 2,
            scale_down: 1,
            keep_alive_adjustment_ms: 0,
        });
        let queue = Arc::new(QueueBasedStrategy {
            queue_threshold: 10,
            scale_up: 1,
            capacity_ratio: 0.1,
        });
        let composite = CompositeStrategy {
            children: vec![load, queue],
        };

        let command = composite.calculate_scaling(&snapshot(4, 4, 8, 50)).unwrap();
        assert_eq!(command.core_size_delta, 3); // 2 + 1
        assert!(command.reason.starts_with("Combined: "));
        assert!(command.reason.contains(" + "));
    }

    #[test]
    fn composite_returns_none_if_all_children_abstain() {
        let load = Arc::new(LoadBasedStrategy {
            high_threshold: 0.9,
            low_threshold: 0.01,
            scale_up: 2,
            scale_down: 1,
            keep_alive_adjustment_ms: 0,
        });
        let composite = CompositeStrategy { children: vec![load] };
        assert!(composite.calculate_scaling(&snapshot(4, 8, 8, 0)).is_none());
    }
}
