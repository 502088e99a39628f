//! Applies [`ScalingCommand`]s produced by a [`ScalingStrategy`] to a pool
//! through its [`PoolHandle`], guarded by a cooldown and a single-flight lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::alert::{AlertBus, AlertKind, AlertLevel, AlertMetadata, MetadataValue};
use crate::error::ForgepoolError;
use crate::handle::PoolHandle;
use crate::scaling::ScalingStrategy;
use crate::snapshot::PoolSnapshot;

/// Cooldown-guarded, single-flight applicator of a [`ScalingStrategy`]'s
/// recommendations to a pool. One `Scaler` is owned per pool by its
/// [`crate::monitor::Monitor`].
pub struct Scaler {
    pool_name: String,
    strategy: Arc<dyn ScalingStrategy>,
    alert_bus: Arc<AlertBus>,
    min_threads: usize,
    max_threads: usize,
    check_period_ms: i64,
    last_scaling_time_ms: AtomicI64,
    apply_lock: Mutex<()>,
}

impl Scaler {
    pub fn new(
        pool_name: impl Into<String>,
        strategy: Arc<dyn ScalingStrategy>,
        alert_bus: Arc<AlertBus>,
        min_threads: usize,
        max_threads: usize,
        check_period_ms: i64,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            strategy,
            alert_bus,
            min_threads,
            max_threads,
            check_period_ms,
            last_scaling_time_ms: AtomicI64::new(0),
            apply_lock: Mutex::new(()),
        }
    }

    /// Evaluates the strategy against `snapshot` and applies the result to
    /// `handle` if the cooldown has elapsed and no other application is in
    /// flight. Returns `true` if a scaling adjustment was applied.
    pub fn attempt_scaling(&self, handle: &dyn PoolHandle, snapshot: &PoolSnapshot) -> bool {
        let now = Utc::now().timestamp_millis();
        let last = self.last_scaling_time_ms.load(Ordering::Acquire);
        if now - last < self.check_period_ms {
            return false;
        }
        if handle.is_shutting_down() {
            return false;
        }
        if handle.core_size() == 0 {
            return false;
        }

        let Some(command) = self.strategy.calculate_scaling(snapshot) else {
            return false;
        };
        if !command.has_adjustments() {
            return false;
        }

        let Some(_guard) = self.apply_lock.try_lock() else {
            return false;
        };

        // Re-check the cooldown under the lock: another thread may have
        // scaled between our first load and acquiring the guard.
        let last = self.last_scaling_time_ms.load(Ordering::Acquire);
        if now - last < self.check_period_ms {
            return false;
        }

        match self.apply(handle, &command) {
            Ok(()) => {
                self.last_scaling_time_ms.store(now, Ordering::Release);
                info!(pool = %self.pool_name, reason = %command.reason, "pool scaled");
                true
            }
            Err(err) => {
                error!(pool = %self.pool_name, error = %err, "scaling application failed");
                self.publish_error(&err.to_string());
                false
            }
        }
    }

    fn apply(&self, handle: &dyn PoolHandle, command: &crate::scaling::ScalingCommand) -> crate::error::Result<()> {
        let before_core = handle.core_size();
        let before_max = handle.max_size();
        let before_keep_alive = handle.keep_alive_ms();

        let raw_core = before_core as i64 + command.core_size_delta;
        let raw_max = before_max as i64 + command.max_size_delta;

        let clamped_max = raw_max.clamp(raw_core.max(self.min_threads as i64), self.max_threads as i64);
        let clamped_core = raw_core.clamp(self.min_threads as i64, clamped_max);

        // §4.G step 5: expansion (maxDelta > 0) widens the ceiling before the
        // resident count so core never briefly exceeds max; contraction or a
        // pure core change does the reverse.
        if command.max_size_delta > 0 {
            handle.resize_max(clamped_max as usize).map_err(ForgepoolError::Scaling)?;
            handle.resize_core(clamped_core as usize).map_err(ForgepoolError::Scaling)?;
        } else {
            handle.resize_core(clamped_core as usize).map_err(ForgepoolError::Scaling)?;
            handle.resize_max(clamped_max as usize).map_err(ForgepoolError::Scaling)?;
        }

        if command.queue_capacity_delta != 0 {
            handle.adjust_queue_capacity(command.queue_capacity_delta);
        }
        let after_keep_alive = if command.keep_alive_delta_ms != 0 {
            let current = handle.keep_alive_ms() as i64;
            let updated = (current + command.keep_alive_delta_ms).max(0) as u64;
            handle.set_keep_alive_ms(updated);
            updated
        } else {
            before_keep_alive
        };

        self.publish_applied(
            before_core,
            clamped_core as usize,
            before_max,
            clamped_max as usize,
            before_keep_alive,
            after_keep_alive,
            &command.reason,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_applied(
        &self,
        before_core: usize,
        after_core: usize,
        before_max: usize,
        after_max: usize,
        before_keep_alive: u64,
        after_keep_alive: u64,
        reason: &str,
    ) {
        let mut metadata: AlertMetadata = AlertMetadata::new();
        metadata.insert("poolName".into(), MetadataValue::Text(self.pool_name.clone()));
        metadata.insert("oldCoreSize".into(), MetadataValue::Number(before_core as f64));
        metadata.insert("newCoreSize".into(), MetadataValue::Number(after_core as f64));
        metadata.insert("oldMaxSize".into(), MetadataValue::Number(before_max as f64));
        metadata.insert("newMaxSize".into(), MetadataValue::Number(after_max as f64));
        metadata.insert("oldKeepAlive".into(), MetadataValue::Number(before_keep_alive as f64));
        metadata.insert("newKeepAlive".into(), MetadataValue::Number(after_keep_alive as f64));
        metadata.insert("reason".into(), MetadataValue::Text(reason.to_string()));

        self.alert_bus.publish_alert(
            format!("Pool '{}' scaled: {}", self.pool_name, reason),
            AlertLevel::Info,
            AlertKind::Monitoring,
            metadata,
        );
    }

    fn publish_error(&self, message: &str) {
        let mut metadata: AlertMetadata = AlertMetadata::new();
        metadata.insert("poolName".into(), MetadataValue::Text(self.pool_name.clone()));
        metadata.insert("error".into(), MetadataValue::Text(message.to_string()));

        self.alert_bus.publish_alert(
            format!("Pool '{}' scaling failed: {}", self.pool_name, message),
            AlertLevel::Error,
            AlertKind::Monitoring,
            metadata,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Stats, StatsConfig};
    use std::sync::atomic::AtomicUsize;

    struct FakeHandle {
        core: AtomicI64,
        max: AtomicI64,
        keep_alive_ms: AtomicI64,
        queue_capacity: AtomicI64,
        resize_core_calls: AtomicUsize,
        fail_resize_core: bool,
    }

    impl FakeHandle {
        fn new(core: i64, max: i64) -> Self {
            Self {
                core: AtomicI64::new(core),
                max: AtomicI64::new(max),
                keep_alive_ms: AtomicI64::new(60_000),
                queue_capacity: AtomicI64::new(1000),
                resize_core_calls: AtomicUsize::new(0),
                fail_resize_core: false,
            }
        }
    }

    impl PoolHandle for FakeHandle {
        fn pool_name(&self) -> &str {
            "fake"
        }
        fn is_shutting_down(&self) -> bool {
            false
        }
        fn build_snapshot(&self) -> PoolSnapshot {
            let stats = Stats::new(StatsConfig::default());
            PoolSnapshot::now(stats.snapshot(), 0, self.core.load(Ordering::Acquire) as usize, self.max.load(Ordering::Acquire) as usize, 0, 1000, 0)
        }
        fn core_size(&self) -> usize {
            self.core.load(Ordering::Acquire) as usize
        }
        fn max_size(&self) -> usize {
            self.max.load(Ordering::Acquire) as usize
        }
        fn keep_alive_ms(&self) -> u64 {
            self.keep_alive_ms.load(Ordering::Acquire) as u64
        }
        fn min_threads(&self) -> usize {
            1
        }
        fn configured_max_threads(&self) -> usize {
            32
        }
        fn resize_core(&self, new_core: usize) -> Result<(), String> {
            self.resize_core_calls.fetch_add(1, Ordering::AcqRel);
            if self.fail_resize_core {
                return Err("refused".into());
            }
            self.core.store(new_core as i64, Ordering::Release);
            Ok(())
        }
        fn resize_max(&self, new_max: usize) -> Result<(), String> {
            self.max.store(new_max as i64, Ordering::Release);
            Ok(())
        }
        fn adjust_queue_capacity(&self, delta: i64) {
            self.queue_capacity.fetch_add(delta, Ordering::AcqRel);
        }
        fn set_keep_alive_ms(&self, new_keep_alive_ms: u64) {
            self.keep_alive_ms.store(new_keep_alive_ms as i64, Ordering::Release);
        }
    }

    struct AlwaysGrow;
    impl ScalingStrategy for AlwaysGrow {
        fn calculate_scaling(&self, _snapshot: &PoolSnapshot) -> Option<crate::scaling::ScalingCommand> {
            Some(crate::scaling::ScalingCommand {
                core_size_delta: 2,
                max_size_delta: 4,
                reason: "grow".into(),
                ..Default::default()
            })
        }
    }

    struct NeverScale;
    impl ScalingStrategy for NeverScale {
        fn calculate_scaling(&self, _snapshot: &PoolSnapshot) -> Option<crate::scaling::ScalingCommand> {
            None
        }
    }

    #[test]
    fn applies_scaling_and_clamps_to_configured_max() {
        let handle = FakeHandle::new(4, 6);
        let scaler = Scaler::new("fake", Arc::new(AlwaysGrow), Arc::new(AlertBus::new()), 1, 8, 0);
        let snapshot = handle.build_snapshot();
        assert!(scaler.attempt_scaling(&handle, &snapshot));
        assert_eq!(handle.core_size(), 6);
        assert_eq!(handle.max_size(), 8); // clamped from 10 to configured max_threads
    }

    #[test]
    fn respects_cooldown_between_applications() {
        let handle = FakeHandle::new(4, 6);
        let scaler = Scaler::new("fake", Arc::new(AlwaysGrow), Arc::new(AlertBus::new()), 1, 32, 60_000);
        let snapshot = handle.build_snapshot();
        assert!(scaler.attempt_scaling(&handle, &snapshot));
        let snapshot_after = handle.build_snapshot();
        assert!(!scaler.attempt_scaling(&handle, &snapshot_after));
    }

    #[test]
    fn no_adjustments_means_no_application() {
        let handle = FakeHandle::new(4, 6);
        let scaler = Scaler::new("fake", Arc::new(NeverScale), Arc::new(AlertBus::new()), 1, 32, 0);
        let snapshot = handle.build_snapshot();
        assert!(!scaler.attempt_scaling(&handle, &snapshot));
        assert_eq!(handle.resize_core_calls.load(Ordering::Acquire), 0);
    }

    #[test]
    fn single_flight_lock_blocks_concurrent_application() {
        let handle = FakeHandle::new(4, 6);
        let scaler = Arc::new(Scaler::new("fake", Arc::new(AlwaysGrow), Arc::new(AlertBus::new()), 1, 32, 0));
        let _held = scaler.apply_lock.lock();
        let snapshot = handle.build_snapshot();
        assert!(!scaler.attempt_scaling(&handle, &snapshot));
    }
}
