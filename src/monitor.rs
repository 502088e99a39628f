//! Background sampler that periodically snapshots a pool, publishes
//! threshold alerts, hands the snapshot to a [`Scaler`], and republishes the
//! snapshot itself as an informational alert.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use crate::alert::{AlertBus, AlertKind, AlertLevel, AlertMetadata, MetadataValue};
use crate::handle::PoolHandle;
use crate::scaler::Scaler;

/// Threshold-driven alert behaviour, independent of scaling.
///
/// `thread_threshold` is a fraction of pool capacity (`active/poolSize`);
/// `queue_threshold` is an absolute queue size, matching §6's
/// `threadPoolUsageThreshold` (a percentage) and `queueSizeWarningThreshold`
/// (an absolute count) respectively — the two are not symmetric in the
/// original design, and this preserves that asymmetry.
#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    pub thread_threshold: f64,
    pub queue_threshold: usize,
    pub enable_thread_alerts: bool,
    pub enable_queue_alerts: bool,
    pub minimum_alert_level: AlertLevel,
    /// Master switch for the whole tick (§4.I step 1: "If detailed metrics
    /// disabled, return"). `false` suppresses sampling, threshold alerts,
    /// scaling, and the snapshot alert alike.
    pub enable_detailed_metrics: bool,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            thread_threshold: 0.8,
            queue_threshold: 1000,
            enable_thread_alerts: true,
            enable_queue_alerts: true,
            minimum_alert_level: AlertLevel::Info,
            enable_detailed_metrics: true,
        }
    }
}

/// Owns the background thread that samples a pool on a fixed period.
pub struct Monitor {
    pool: Weak<dyn PoolHandle>,
    pool_name: String,
    alert_bus: Arc<AlertBus>,
    scaler: Option<Arc<Scaler>>,
    thresholds: MonitorThresholds,
    period_ms: u64,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn spawn(
        pool: Weak<dyn PoolHandle>,
        pool_name: impl Into<String>,
        alert_bus: Arc<AlertBus>,
        scaler: Option<Arc<Scaler>>,
        thresholds: MonitorThresholds,
        period_ms: u64,
    ) -> Self {
        let pool_name = pool_name.into();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = {
            let pool = pool.clone();
            let pool_name = pool_name.clone();
            let alert_bus = alert_bus.clone();
            let scaler = scaler.clone();
            let thresholds = thresholds.clone();
            let stop_flag = stop_flag.clone();

            thread::Builder::new()
                .name(format!("{pool_name}-monitor"))
                .spawn(move || {
                    while !stop_flag.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(period_ms));
                        if stop_flag.load(Ordering::Acquire) {
                            break;
                        }

                        let Some(handle) = pool.upgrade() else {
                            break;
                        };
                        if handle.is_shutting_down() {
                            break;
                        }

                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            tick(handle.as_ref(), &pool_name, &alert_bus, scaler.as_deref(), &thresholds)
                        }));

                        if let Err(payload) = outcome {
                            let message = panic_message(&payload);
                            error!(pool = %pool_name, error = %message, "monitor tick panicked");
                            publish_tick_panic(&alert_bus, &pool_name, &message);
                        }
                    }
                })
                .expect("failed to spawn monitor thread")
        };

        Self {
            pool,
            pool_name,
            alert_bus,
            scaler,
            thresholds,
            period_ms,
            stop_flag,
            worker: Some(worker),
        }
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(handle: &dyn PoolHandle, pool_name: &str, alert_bus: &AlertBus, scaler: Option<&Scaler>, thresholds: &MonitorThresholds) {
    if !thresholds.enable_detailed_metrics {
        return;
    }

    let snapshot = handle.build_snapshot();

    if thresholds.enable_thread_alerts
        && snapshot.thread_utilization() > thresholds.thread_threshold
        && AlertLevel::Warning >= thresholds.minimum_alert_level
    {
        let mut metadata: AlertMetadata = AlertMetadata::new();
        metadata.insert("poolName".into(), MetadataValue::Text(pool_name.to_string()));
        metadata.insert("utilization".into(), MetadataValue::Number(snapshot.thread_utilization()));
        alert_bus.publish_alert(
            format!(
                "Thread pool usage ({:.0}%) exceeded threshold ({:.0}%)",
                snapshot.thread_utilization() * 100.0,
                thresholds.thread_threshold * 100.0
            ),
            AlertLevel::Warning,
            AlertKind::Monitoring,
            metadata,
        );
        warn!(pool = %pool_name, utilization = snapshot.thread_utilization(), "thread utilisation threshold breached");
    }

    if thresholds.enable_queue_alerts && snapshot.queue_size > thresholds.queue_threshold && AlertLevel::Warning >= thresholds.minimum_alert_level {
        let mut metadata: AlertMetadata = AlertMetadata::new();
        metadata.insert("poolName".into(), MetadataValue::Text(pool_name.to_string()));
        metadata.insert("queueSize".into(), MetadataValue::Number(snapshot.queue_size as f64));
        alert_bus.publish_alert(
            format!("Queue size ({}) exceeded threshold ({})", snapshot.queue_size, thresholds.queue_threshold),
            AlertLevel::Warning,
            AlertKind::Monitoring,
            metadata,
        );
        warn!(pool = %pool_name, queue_size = snapshot.queue_size, threshold = thresholds.queue_threshold, "queue size threshold breached");
    }

    if let Some(scaler) = scaler {
        scaler.attempt_scaling(handle, &snapshot);
    }

    if AlertLevel::Info >= thresholds.minimum_alert_level {
        if let Ok(json) = snapshot.to_json() {
            let mut metadata: AlertMetadata = AlertMetadata::new();
            metadata.insert("poolName".into(), MetadataValue::Text(pool_name.to_string()));
            metadata.insert("snapshot".into(), MetadataValue::Text(json));
            alert_bus.publish_alert(
                format!("Pool '{pool_name}' stats snapshot"),
                AlertLevel::Info,
                AlertKind::Monitoring,
                metadata,
            );
        }
    }
}

fn publish_tick_panic(alert_bus: &AlertBus, pool_name: &str, message: &str) {
    let mut metadata: AlertMetadata = AlertMetadata::new();
    metadata.insert("poolName".into(), MetadataValue::Text(pool_name.to_string()));
    metadata.insert("error".into(), MetadataValue::Text(message.to_string()));
    alert_bus.publish_alert(
        format!("Pool '{pool_name}' monitor tick panicked"),
        AlertLevel::Error,
        AlertKind::Monitoring,
        metadata,
    );
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
