//! Immutable point-in-time view of a pool's stats and live counters.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

/// Combines a [`StatsSnapshot`] with live pool counters. Derived ratios
/// (thread/queue utilisation, rejection rate, throughput) are pure functions
/// of the fields here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub task_stats: StatsSnapshot,
    pub active_threads: usize,
    pub pool_size: usize,
    pub max_pool_size: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub completed_tasks: u64,
    pub timestamp_ms: i64,
}

impl PoolSnapshot {
    pub fn now(
        task_stats: StatsSnapshot,
        active_threads: usize,
        pool_size: usize,
        max_pool_size: usize,
        queue_size: usize,
        queue_capacity: usize,
        completed_tasks: u64,
    ) -> Self {
        Self {
            task_stats,
            active_threads,
            pool_size,
            max_pool_size,
            queue_size,
            queue_capacity,
            completed_tasks,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn thread_utilization(&self) -> f64 {
        if self.pool_size == 0 {
            0.0
        } else {
            self.active_threads as f64 / self.pool_size as f64
        }
    }

    pub fn max_thread_utilization(&self) -> f64 {
        if self.max_pool_size == 0 {
            0.0
        } else {
            self.active_threads as f64 / self.max_pool_size as f64
        }
    }

    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            0.0
        } else {
            self.queue_size as f64 / self.queue_capacity as f64
        }
    }

    pub fn rejection_rate(&self) -> f64 {
        self.task_stats.task_rejection_rate()
    }

    pub fn throughput(&self) -> f64 {
        self.task_stats.task_throughput()
    }

    /// The fixed JSON shape §6 specifies for sinks that stringify snapshots.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&serde_json::json!({
            "timestamp": self.timestamp_ms,
            "activeThreads": self.active_threads,
            "poolSize": self.pool_size,
            "maxPoolSize": self.max_pool_size,
            "queueSize": self.queue_size,
            "queueCapacity": self.queue_capacity,
            "queueUtilization": self.queue_utilization(),
            "threadUtilization": self.thread_utilization(),
            "maxThreadUtilization": self.max_thread_utilization(),
            "completedTasks": self.completed_tasks,
            "taskSuccessRate": self.task_stats.task_success_rate(),
            "taskRejectionRate": self.task_stats.task_rejection_rate(),
            "taskThroughput": self.task_stats.task_throughput(),
            "averageWaitTime": self.task_stats.average_wait_ms(),
            "averageExecutionTime": self.task_stats.average_execution_ms(),
            "p50Latency": self.task_stats.percentile(50.0),
            "p95Latency": self.task_stats.percentile(95.0),
            "p99Latency": self.task_stats.percentile(99.0),
        }))
    }
}
