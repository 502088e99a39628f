//! Validated, builder-style configuration for a [`crate::pool::PoolEngine`].
//!
//! Mirrors `arceon-performance`'s builder-of-subsystem-configs shape, but
//! every setter here is fallible-at-build-time rather than panicking: an
//! invalid combination becomes a [`ForgepoolError::Configuration`] from
//! [`PoolEngineBuilder::build`], never a panic.

use std::sync::Arc;
use std::time::Duration;

use crate::alert::AlertLevel;
use crate::error::{ForgepoolError, Result};
use crate::persistence::PersistenceStrategy;
use crate::scaling::ScalingStrategy;

/// Per-family enable flags for the monitor's detailed sampling.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub monitoring_period_ms: u64,
    pub sampling_interval_ms: u64,
    pub enable_detailed_metrics: bool,
    pub enable_queue_metrics: bool,
    pub enable_task_metrics: bool,
    pub enable_thread_metrics: bool,
    pub enable_latency_metrics: bool,
    pub enable_rejection_metrics: bool,
    pub latency_percentiles: Vec<u32>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_period_ms: 5000,
            sampling_interval_ms: 1000,
            enable_detailed_metrics: true,
            enable_queue_metrics: true,
            enable_task_metrics: true,
            enable_thread_metrics: true,
            enable_latency_metrics: true,
            enable_rejection_metrics: true,
            latency_percentiles: vec![50, 75, 90, 95, 99],
        }
    }
}

/// Alert thresholds consumed by [`crate::monitor::Monitor`].
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub queue_size_warning_threshold: usize,
    pub task_timeout_ms: u64,
    pub thread_pool_usage_threshold: u32,
    pub minimum_alert_level: AlertLevel,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            queue_size_warning_threshold: 1000,
            task_timeout_ms: 60_000,
            thread_pool_usage_threshold: 80,
            minimum_alert_level: AlertLevel::Warning,
        }
    }
}

/// Scaling strategy and its cooldown/bounds, consumed by [`crate::scaler::Scaler`].
#[derive(Clone)]
pub struct ScalingConfig {
    pub strategy: Option<Arc<dyn ScalingStrategy>>,
    pub scaling_check_period_ms: i64,
    pub min_threads: usize,
    pub max_threads: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            scaling_check_period_ms: 30_000,
            min_threads: 1,
            max_threads: 2 * num_cpus::get(),
        }
    }
}

/// Whether queue snapshotting is active, and what backs it.
#[derive(Clone)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub strategy: Option<Arc<dyn PersistenceStrategy>>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: None,
        }
    }
}

/// Core executor sizing, consumed directly by [`crate::pool::PoolEngine`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_name: String,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub keep_alive: Duration,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "forgepool".to_string(),
            core_pool_size: num_cpus::get(),
            max_pool_size: 2 * num_cpus::get(),
            keep_alive: Duration::from_secs(60),
            queue_capacity: 1000,
        }
    }
}

/// The fully validated configuration [`crate::pool::PoolEngine::new`] consumes.
#[derive(Clone)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub monitoring: MonitoringConfig,
    pub alerts: AlertConfig,
    pub scaling: ScalingConfig,
    pub persistence: PersistenceSettings,
}

/// Fluent, validated builder for [`EngineConfig`]. Every setter just stores
/// its argument; all cross-field validation happens once, in [`Self::build`].
#[derive(Clone, Default)]
pub struct PoolEngineBuilder {
    pool: PoolConfig,
    monitoring: MonitoringConfig,
    alerts: AlertConfig,
    scaling: ScalingConfig,
    persistence: PersistenceSettings,
}

impl PoolEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool.pool_name = name.into();
        self
    }

    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.pool.core_pool_size = size;
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.pool.max_pool_size = size;
        self
    }

    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.pool.keep_alive = duration;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.pool.queue_capacity = capacity;
        self
    }

    pub fn monitoring_period_ms(mut self, period_ms: u64) -> Self {
        self.monitoring.monitoring_period_ms = period_ms;
        self
    }

    pub fn sampling_interval_ms(mut self, interval_ms: u64) -> Self {
        self.monitoring.sampling_interval_ms = interval_ms;
        self
    }

    pub fn enable_detailed_metrics(mut self, enabled: bool) -> Self {
        self.monitoring.enable_detailed_metrics = enabled;
        self
    }

    pub fn latency_percentiles(mut self, percentiles: Vec<u32>) -> Self {
        self.monitoring.latency_percentiles = percentiles;
        self
    }

    pub fn queue_size_warning_threshold(mut self, threshold: usize) -> Self {
        self.alerts.queue_size_warning_threshold = threshold;
        self
    }

    pub fn task_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.alerts.task_timeout_ms = timeout_ms;
        self
    }

    pub fn thread_pool_usage_threshold(mut self, threshold: u32) -> Self {
        self.alerts.thread_pool_usage_threshold = threshold;
        self
    }

    pub fn minimum_alert_level(mut self, level: AlertLevel) -> Self {
        self.alerts.minimum_alert_level = level;
        self
    }

    pub fn scaling_strategy(mut self, strategy: Arc<dyn ScalingStrategy>) -> Self {
        self.scaling.strategy = Some(strategy);
        self
    }

    pub fn scaling_check_period_ms(mut self, period_ms: i64) -> Self {
        self.scaling.scaling_check_period_ms = period_ms;
        self
    }

    pub fn min_threads(mut self, min: usize) -> Self {
        self.scaling.min_threads = min;
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.scaling.max_threads = max;
        self
    }

    pub fn persistence(mut self, strategy: Arc<dyn PersistenceStrategy>) -> Self {
        self.persistence.enabled = true;
        self.persistence.strategy = Some(strategy);
        self
    }

    /// Validates every cross-field constraint §6 names, returning
    /// [`ForgepoolError::Configuration`] on the first violation found.
    pub fn build(self) -> Result<EngineConfig> {
        if self.pool.pool_name.trim().is_empty() {
            return Err(ForgepoolError::Configuration("poolName must be non-empty".into()));
        }
        if self.pool.max_pool_size == 0 {
            return Err(ForgepoolError::Configuration("maxPoolSize must be > 0".into()));
        }
        if self.pool.core_pool_size > self.pool.max_pool_size {
            return Err(ForgepoolError::Configuration("corePoolSize must be <= maxPoolSize".into()));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ForgepoolError::Configuration("queueCapacity must be > 0".into()));
        }

        if self.monitoring.monitoring_period_ms == 0 {
            return Err(ForgepoolError::Configuration("monitoringPeriodMs must be > 0".into()));
        }
        if self.monitoring.sampling_interval_ms == 0 {
            return Err(ForgepoolError::Configuration("samplingIntervalMs must be > 0".into()));
        }
        if self.monitoring.sampling_interval_ms > self.monitoring.monitoring_period_ms {
            return Err(ForgepoolError::Configuration("samplingIntervalMs must be <= monitoringPeriodMs".into()));
        }
        for percentile in &self.monitoring.latency_percentiles {
            if *percentile > 100 {
                return Err(ForgepoolError::Configuration(format!("latency percentile {percentile} out of [0,100]")));
            }
        }

        if self.alerts.queue_size_warning_threshold == 0 {
            return Err(ForgepoolError::Configuration("queueSizeWarningThreshold must be > 0".into()));
        }
        if self.alerts.task_timeout_ms == 0 {
            return Err(ForgepoolError::Configuration("taskTimeoutMs must be > 0".into()));
        }
        if !(1..=100).contains(&self.alerts.thread_pool_usage_threshold) {
            return Err(ForgepoolError::Configuration("threadPoolUsageThreshold must be in [1,100]".into()));
        }

        if self.scaling.max_threads < self.scaling.min_threads {
            return Err(ForgepoolError::Configuration("maxThreads must be >= minThreads".into()));
        }

        if self.persistence.enabled && self.persistence.strategy.is_none() {
            return Err(ForgepoolError::Configuration("persistence enabled but no strategy provided".into()));
        }

        Ok(EngineConfig {
            pool: self.pool,
            monitoring: self.monitoring,
            alerts: self.alerts,
            scaling: self.scaling,
            persistence: self.persistence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_produces_valid_config() {
        let config = PoolEngineBuilder::new().build();
        assert!(config.is_ok());
    }

    #[test]
    fn empty_pool_name_is_rejected() {
        let result = PoolEngineBuilder::new().pool_name("").build();
        assert!(matches!(result, Err(ForgepoolError::Configuration(_))));
    }

    #[test]
    fn core_exceeding_max_is_rejected() {
        let result = PoolEngineBuilder::new().core_pool_size(10).max_pool_size(4).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let result = PoolEngineBuilder::new().queue_capacity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn sampling_interval_exceeding_period_is_rejected() {
        let result = PoolEngineBuilder::new().monitoring_period_ms(500).sampling_interval_ms(1000).build();
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_thread_usage_threshold_is_rejected() {
        let result = PoolEngineBuilder::new().thread_pool_usage_threshold(150).build();
        assert!(result.is_err());
    }

    #[test]
    fn persistence_enabled_without_strategy_is_rejected() {
        let mut builder = PoolEngineBuilder::new();
        builder.persistence.enabled = true;
        assert!(builder.build().is_err());
    }

    #[test]
    fn max_threads_below_min_threads_is_rejected() {
        let result = PoolEngineBuilder::new().min_threads(8).max_threads(2).build();
        assert!(result.is_err());
    }
}
