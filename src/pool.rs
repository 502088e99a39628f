//! The pool engine: owns worker threads, the queue, stats, the alert bus
//! hookup, the monitor, and the scaler.
//!
//! Grounded in `F1R3FLY-io-MeTTa-Compiler::backend::thread_pool::ThreadPool`
//! for the worker-loop/`Arc<AtomicBool> shutdown` shape, extended per §4.E
//! with priority queueing, dynamic resize, and tracked-task bookkeeping.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::alert::{global_alert_bus, AlertBus, AlertKind, AlertLevel, AlertMetadata, MetadataValue};
use crate::config::EngineConfig;
use crate::error::{ForgepoolError, Result};
use crate::handle::PoolHandle;
use crate::monitor::{Monitor, MonitorThresholds};
use crate::queue::{default_snapshotter_stop_timeout, PriorityPersistentQueue, SnapshotterHandle};
use crate::scaler::Scaler;
use crate::snapshot::PoolSnapshot;
use crate::stats::{Stats, StatsConfig};
use crate::task::{Job, PersistablePayload, TrackedTask};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_SUBMIT_PRIORITY: i64 = 5;
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a task submitted through [`PoolEngine::submit_with_handle`].
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub success: bool,
    pub error: Option<String>,
}

/// A receipt for a submitted task, letting the caller block for its result.
pub struct TaskHandle {
    task_id: String,
    receiver: crossbeam_channel::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn wait(self) -> Result<TaskResult> {
        self.receiver
            .recv()
            .map_err(|_| ForgepoolError::TaskFailure(format!("task {} was dropped before completion", self.task_id)))
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<TaskResult> {
        self.receiver
            .recv_timeout(timeout)
            .map_err(|_| ForgepoolError::TaskFailure(format!("task {} did not complete within {timeout:?}", self.task_id)))
    }
}

/// Owns the queue, worker threads, and the monitor/scaler pair for one
/// named pool. Generic over the payload type so persistence, when enabled,
/// can round-trip it.
pub struct PoolEngine<P: PersistablePayload + 'static> {
    pool_name: String,
    queue: Arc<PriorityPersistentQueue<P>>,
    stats: Arc<Stats>,
    alert_bus: Arc<AlertBus>,
    config: EngineConfig,

    core_size: AtomicUsize,
    max_size: AtomicUsize,
    keep_alive_ms: AtomicU64,
    active_threads: AtomicUsize,
    completed_tasks: AtomicU64,
    next_worker_id: AtomicUsize,
    retire_quota: AtomicI64,
    shutting_down: AtomicBool,

    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    snapshotter: parking_lot::Mutex<Option<SnapshotterHandle>>,
    pending: DashMap<String, crossbeam_channel::Sender<TaskResult>>,

    monitor: parking_lot::Mutex<Option<Monitor>>,
    scaler: OnceLock<Arc<Scaler>>,
    self_weak: OnceLock<Weak<Self>>,
    shutdown_hook: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<P: PersistablePayload + 'static> PoolEngine<P> {
    /// Builds and starts a pool: spawns the core worker threads, the queue
    /// snapshotter (if persistence is enabled), and the monitor.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_alert_bus(config, global_alert_bus())
    }

    pub fn with_alert_bus(config: EngineConfig, alert_bus: Arc<AlertBus>) -> Arc<Self> {
        let stats_config = StatsConfig {
            percentiles: config.monitoring.latency_percentiles.iter().map(|p| *p as u8).collect(),
            ..StatsConfig::default()
        };
        let stats = Arc::new(Stats::new(stats_config));

        let queue = match &config.persistence.strategy {
            Some(strategy) if config.persistence.enabled => PriorityPersistentQueue::new_with_persistence(config.pool.queue_capacity, strategy.clone()),
            _ => PriorityPersistentQueue::new(config.pool.queue_capacity),
        };

        if config.persistence.enabled {
            if let Err(e) = queue.load_and_enqueue() {
                error!(pool = %config.pool.pool_name, error = %e, "failed to replay persisted queue image; starting empty");
            }
        }

        let engine = Arc::new(Self {
            pool_name: config.pool.pool_name.clone(),
            queue,
            stats,
            alert_bus,
            core_size: AtomicUsize::new(config.pool.core_pool_size),
            max_size: AtomicUsize::new(config.pool.max_pool_size),
            keep_alive_ms: AtomicU64::new(config.pool.keep_alive.as_millis() as u64),
            active_threads: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            retire_quota: AtomicI64::new(0),
            shutting_down: AtomicBool::new(false),
            workers: parking_lot::Mutex::new(Vec::new()),
            snapshotter: parking_lot::Mutex::new(None),
            pending: DashMap::new(),
            monitor: parking_lot::Mutex::new(None),
            scaler: OnceLock::new(),
            self_weak: OnceLock::new(),
            shutdown_hook: parking_lot::Mutex::new(None),
            config,
        });

        let _ = engine.self_weak.set(Arc::downgrade(&engine));

        if engine.config.persistence.enabled {
            let handle = engine.queue.start_snapshotter();
            *engine.snapshotter.lock() = Some(handle);
        }

        let core = engine.core_size.load(Ordering::Acquire);
        for _ in 0..core {
            engine.spawn_worker();
        }

        if let Some(strategy) = engine.config.scaling.strategy.clone() {
            let scaler = Arc::new(Scaler::new(
                engine.pool_name.clone(),
                strategy,
                engine.alert_bus.clone(),
                engine.config.scaling.min_threads,
                engine.config.scaling.max_threads,
                engine.config.scaling.scaling_check_period_ms,
            ));
            let _ = engine.scaler.set(scaler);
        }

        let handle: Weak<dyn PoolHandle> = engine.self_weak.get().unwrap().clone() as Weak<dyn PoolHandle>;
        let thresholds = MonitorThresholds {
            thread_threshold: engine.config.alerts.thread_pool_usage_threshold as f64 / 100.0,
            queue_threshold: engine.config.alerts.queue_size_warning_threshold,
            enable_thread_alerts: engine.config.monitoring.enable_thread_metrics,
            enable_queue_alerts: engine.config.monitoring.enable_queue_metrics,
            minimum_alert_level: engine.config.alerts.minimum_alert_level,
            enable_detailed_metrics: engine.config.monitoring.enable_detailed_metrics,
        };
        let monitor = Monitor::spawn(
            handle,
            engine.pool_name.clone(),
            engine.alert_bus.clone(),
            engine.scaler.get().cloned(),
            thresholds,
            engine.config.monitoring.monitoring_period_ms,
        );
        *engine.monitor.lock() = Some(monitor);

        engine
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
        let name = format!("{}-thread-{id}", self.pool_name);
        let engine = Arc::clone(self);

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || engine.worker_loop())
            .unwrap_or_else(|e| panic!("failed to spawn worker thread {name}: {e}"));

        self.workers.lock().push(join);
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if self.try_claim_retirement() {
                return;
            }

            let task = match self.queue.take_timeout(IDLE_POLL_INTERVAL) {
                Some(task) => task,
                None => {
                    if self.shutting_down.load(Ordering::Acquire) && self.queue.size() == 0 {
                        return;
                    }
                    continue;
                }
            };

            self.active_threads.fetch_add(1, Ordering::AcqRel);
            self.run_task(task);
            self.active_threads.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Atomically claims one unit of pending shrinkage, if any. A worker
    /// that successfully claims retires immediately; this is correct
    /// regardless of which specific thread ids are currently live, unlike
    /// comparing a worker's id against the live core size.
    fn try_claim_retirement(&self) -> bool {
        loop {
            let quota = self.retire_quota.load(Ordering::Acquire);
            if quota <= 0 {
                return false;
            }
            if self
                .retire_quota
                .compare_exchange(quota, quota - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Runs one task, recording queue wait, execution timing, and outcome.
    ///
    /// A panicking payload is caught here rather than left to unwind the
    /// worker thread: that is this pool's "uncaught-exception handler"
    /// equivalent to §4.E's thread factory contract — it logs, records a
    /// failure, and lets the worker keep serving the queue instead of
    /// silently shrinking `poolSize` by one.
    fn run_task(&self, task: TrackedTask<P>) {
        let task_id = task.task_id.clone();
        let queue_wait_ms = (chrono::Utc::now().timestamp_millis() - task.submit_time_ms).max(0) as u64;
        self.stats.record_queue_time(queue_wait_ms);
        self.stats.record_queue_size(self.queue.size() as u64);

        let outcome = match catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(&payload);
                error!(pool = %self.pool_name, task_id = %task_id, error = %message, "task payload panicked");
                crate::task::ExecutionOutcome {
                    success: false,
                    error: Some(message),
                    wait_ms: (chrono::Utc::now().timestamp_millis() - task.submit_time_ms).max(0) as u64,
                    exec_ms: 0,
                }
            }
        };

        self.stats.record_wait_time(outcome.wait_ms);
        self.stats.record_execution_time(outcome.exec_ms);

        if outcome.success {
            self.stats.record_completion();
            self.completed_tasks.fetch_add(1, Ordering::AcqRel);
        } else {
            self.stats.record_failure();
            warn!(pool = %self.pool_name, task_id = %task_id, error = ?outcome.error, "task failed");
        }

        if let Some((_, sender)) = self.pending.remove(&task_id) {
            let _ = sender.send(TaskResult {
                success: outcome.success,
                error: outcome.error,
            });
        }
    }

    /// Submits `payload` at the default priority (5). Returns immediately;
    /// the caller has no way to observe the outcome — see
    /// [`Self::submit_with_handle`] for that.
    pub fn execute(self: &Arc<Self>, payload: P) -> Result<()> {
        self.submit(payload, DEFAULT_SUBMIT_PRIORITY)
    }

    /// Submits `payload` at `priority` (lower runs first). Fails with
    /// [`ForgepoolError::Rejected`] if the pool is shutting down or the
    /// queue is at capacity.
    pub fn submit(self: &Arc<Self>, payload: P, priority: i64) -> Result<()> {
        self.submit_with_handle(payload, priority).map(|_| ())
    }

    /// Like [`Self::submit`] but returns a [`TaskHandle`] the caller can
    /// block on for the task's outcome.
    pub fn submit_with_handle(self: &Arc<Self>, payload: P, priority: i64) -> Result<TaskHandle> {
        if self.shutting_down.load(Ordering::Acquire) {
            self.stats.record_rejection();
            return Err(self.reject("pool is shutting down"));
        }

        let task = TrackedTask::new(payload, priority);
        let task_id = task.task_id.clone();
        self.stats.record_submission();

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending.insert(task_id.clone(), tx);

        if !self.queue.offer(task) {
            self.pending.remove(&task_id);
            self.stats.record_rejection();
            return Err(self.reject(&format!("queue at capacity (task {task_id})")));
        }

        Ok(TaskHandle { task_id, receiver: rx })
    }

    fn reject(&self, reason: &str) -> ForgepoolError {
        warn!(pool = %self.pool_name, reason, "task rejected");
        ForgepoolError::Rejected(reason.to_string())
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolHandle::build_snapshot(self)
    }

    /// Refuses new submissions, lets queued work drain, then forces a stop
    /// after 30 s. Threads cannot be force-killed in Rust; abandoned workers
    /// are logged rather than forcibly terminated.
    pub fn graceful_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return; // already shutting down
        }

        info!(pool = %self.pool_name, "graceful shutdown initiated");

        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }

        self.queue.shutdown();

        if let Some(handle) = self.snapshotter.lock().take() {
            handle.stop(default_snapshotter_stop_timeout());
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut self.workers.lock());
        let deadline = std::time::Instant::now() + GRACEFUL_SHUTDOWN_TIMEOUT;
        for worker in workers {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                warn!(pool = %self.pool_name, "graceful shutdown timed out; abandoning remaining worker threads");
                break;
            }
            // std::thread::JoinHandle has no timed join; the queue's
            // shutdown + shutting_down flag above bounds how long workers
            // can still be running real work, so this join is expected to
            // return promptly.
            let _ = worker.join();
        }

        info!(pool = %self.pool_name, "graceful shutdown complete");
    }

    /// Registers a host-wired shutdown signal: when `signal` fires (or its
    /// sender is dropped), [`Self::graceful_shutdown`] runs on a dedicated
    /// thread. Mirrors a JVM shutdown hook without depending on any
    /// OS-signal-handling crate.
    pub fn install_shutdown_hook(self: &Arc<Self>, signal: crossbeam_channel::Receiver<()>) {
        let engine = Arc::clone(self);
        let join = thread::Builder::new()
            .name(format!("{}-shutdown-hook", self.pool_name))
            .spawn(move || {
                let _ = signal.recv();
                engine.graceful_shutdown();
            })
            .expect("failed to spawn shutdown hook thread");

        *self.shutdown_hook.lock() = Some(join);
    }
}

impl<P: PersistablePayload + 'static> PoolHandle for PoolEngine<P> {
    fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn build_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::now(
            self.stats.snapshot(),
            self.active_threads.load(Ordering::Acquire),
            self.core_size.load(Ordering::Acquire),
            self.max_size.load(Ordering::Acquire),
            self.queue.size(),
            self.queue.remaining_capacity() + self.queue.size(),
            self.completed_tasks.load(Ordering::Acquire),
        )
    }

    fn core_size(&self) -> usize {
        self.core_size.load(Ordering::Acquire)
    }

    fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Acquire)
    }

    fn keep_alive_ms(&self) -> u64 {
        self.keep_alive_ms.load(Ordering::Acquire)
    }

    fn min_threads(&self) -> usize {
        self.config.scaling.min_threads
    }

    fn configured_max_threads(&self) -> usize {
        self.config.scaling.max_threads
    }

    fn resize_core(&self, new_core: usize) -> Result<(), String> {
        let current = self.core_size.load(Ordering::Acquire);
        self.core_size.store(new_core, Ordering::Release);

        if new_core > current {
            let Some(engine) = self.self_weak.get().and_then(Weak::upgrade) else {
                return Err("pool engine already dropped".to_string());
            };
            for _ in 0..(new_core - current) {
                engine.spawn_worker();
            }
        } else if new_core < current {
            self.retire_quota.fetch_add((current - new_core) as i64, Ordering::AcqRel);
        }

        Ok(())
    }

    fn resize_max(&self, new_max: usize) -> Result<(), String> {
        self.max_size.store(new_max, Ordering::Release);
        Ok(())
    }

    fn adjust_queue_capacity(&self, delta: i64) {
        let current = self.queue.get_capacity() as i64;
        let updated = (current + delta).max(1) as usize;
        self.queue.set_capacity(updated);
    }

    fn set_keep_alive_ms(&self, new_keep_alive_ms: u64) {
        self.keep_alive_ms.store(new_keep_alive_ms, Ordering::Release);
    }
}

impl<P: PersistablePayload + 'static> Drop for PoolEngine<P> {
    fn drop(&mut self) {
        if !self.shutting_down.load(Ordering::Acquire) {
            self.graceful_shutdown();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// Publishes `snapshot` as an INFO/MONITORING alert through the pool's
/// alert bus, using the fixed JSON shape §6 specifies. Exposed standalone
/// so a custom monitoring loop can reuse the same sink shape the built-in
/// [`crate::monitor::Monitor`] uses.
pub fn publish_snapshot_alert(alert_bus: &AlertBus, pool_name: &str, snapshot: &PoolSnapshot) {
    if let Ok(json) = snapshot.to_json() {
        let mut metadata: AlertMetadata = AlertMetadata::new();
        metadata.insert("poolName".into(), MetadataValue::Text(pool_name.to_string()));
        metadata.insert("snapshot".into(), MetadataValue::Text(json));
        alert_bus.publish_alert(format!("Pool '{pool_name}' stats snapshot"), AlertLevel::Info, AlertKind::Monitoring, metadata);
    }
}
