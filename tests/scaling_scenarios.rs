//! End-to-end scaling scenarios driven through the full builder path:
//! a real `PoolEngine` with a real `Monitor` tick loop and `Scaler`, rather
//! than the unit-level fakes `scaler.rs`/`monitor.rs` use internally.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use forgepool::{
    AlertBus, AlertKind, AlertLevel, Job, LoadBasedStrategy, PersistablePayload, PersistenceError, PoolEngine, PoolEngineBuilder,
};

/// Mirrors the Arceon workspace's own integration-test harness: install a
/// `tracing-subscriber` once so scaling/rejection logs are visible with
/// `--nocapture`, without panicking when multiple tests in this binary
/// each try to install one.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}

#[derive(Clone)]
struct BlockingJob {
    active: Arc<AtomicUsize>,
    release: crossbeam_channel::Receiver<()>,
}

impl Job for BlockingJob {
    fn run(&self) -> Result<(), String> {
        self.active.fetch_add(1, Ordering::AcqRel);
        let _ = self.release.recv();
        self.active.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

impl PersistablePayload for BlockingJob {
    fn to_bytes(&self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(_bytes: &[u8]) -> Result<Self, PersistenceError> {
        Err(PersistenceError::Other("BlockingJob is not reconstructible".into()))
    }
}

fn saturate(engine: &Arc<PoolEngine<BlockingJob>>, active: &Arc<AtomicUsize>, workers: usize) -> crossbeam_channel::Sender<()> {
    let (tx, rx) = crossbeam_channel::unbounded::<()>();
    for _ in 0..workers {
        engine
            .submit(
                BlockingJob {
                    active: active.clone(),
                    release: rx.clone(),
                },
                5,
            )
            .unwrap();
    }
    // Wait for every submitted job to actually start running before sampling.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while active.load(Ordering::Acquire) < workers && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    tx
}

#[test]
fn scale_up_on_high_load_past_cooldown() {
    init_tracing();
    let strategy = Arc::new(LoadBasedStrategy {
        high_threshold: 0.8,
        low_threshold: 0.2,
        scale_up: 2,
        scale_down: 1,
        keep_alive_adjustment_ms: 1000,
    });

    let config = PoolEngineBuilder::new()
        .pool_name("scale-up-scenario")
        .core_pool_size(2)
        .max_pool_size(8)
        .queue_capacity(20)
        .min_threads(2)
        .max_threads(8)
        .scaling_strategy(strategy)
        .scaling_check_period_ms(100)
        .monitoring_period_ms(50)
        .build()
        .unwrap();

    let bus = Arc::new(AlertBus::new());
    let engine: Arc<PoolEngine<BlockingJob>> = PoolEngine::with_alert_bus(config, bus.clone());

    let scale_up_alerts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = scale_up_alerts.clone();
    bus.subscribe(
        AlertLevel::Info,
        AlertKind::Monitoring,
        Arc::new(move |event: &forgepool::AlertEvent| {
            recorder.lock().unwrap().push(event.message.clone());
        }),
    );

    let active = Arc::new(AtomicUsize::new(0));
    let release = saturate(&engine, &active, 2);

    // Cooldown is 100ms; give the monitor several ticks past it.
    thread::sleep(Duration::from_millis(400));

    assert!(
        engine.snapshot().pool_size > 2,
        "expected core size to have grown past the initial 2, got {}",
        engine.snapshot().pool_size
    );
    assert!(
        scale_up_alerts.lock().unwrap().iter().any(|m| m.contains("High load detected") || m.contains("scaled")),
        "expected a scaling alert to have been published, saw: {:?}",
        scale_up_alerts.lock().unwrap()
    );

    for _ in 0..2 {
        let _ = release.send(());
    }
    engine.graceful_shutdown();
}

#[test]
fn no_scaling_applied_twice_inside_cooldown() {
    init_tracing();
    let strategy = Arc::new(LoadBasedStrategy {
        high_threshold: 0.8,
        low_threshold: 0.2,
        scale_up: 2,
        scale_down: 1,
        keep_alive_adjustment_ms: 0,
    });

    let config = PoolEngineBuilder::new()
        .pool_name("cooldown-scenario")
        .core_pool_size(2)
        .max_pool_size(8)
        .queue_capacity(20)
        .min_threads(2)
        .max_threads(8)
        .scaling_strategy(strategy)
        .scaling_check_period_ms(5_000) // cooldown far longer than the test window
        .monitoring_period_ms(50)
        .build()
        .unwrap();

    let bus = Arc::new(AlertBus::new());
    let engine: Arc<PoolEngine<BlockingJob>> = PoolEngine::with_alert_bus(config, bus.clone());

    let active = Arc::new(AtomicUsize::new(0));
    let release = saturate(&engine, &active, 2);

    // Two monitor ticks land inside the 5s cooldown window; only the first
    // (if any) scaling should apply, and the pool should not keep growing
    // tick after tick.
    thread::sleep(Duration::from_millis(250));
    let size_after_first_window = engine.snapshot().pool_size;

    thread::sleep(Duration::from_millis(250));
    let size_after_second_window = engine.snapshot().pool_size;

    assert_eq!(
        size_after_first_window, size_after_second_window,
        "pool size should not change again within the same cooldown window"
    );

    for _ in 0..2 {
        let _ = release.send(());
    }
    engine.graceful_shutdown();
}
