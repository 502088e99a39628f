//! Process-wide structured alert bus, indexed by `(level, kind)`.
//!
//! Grounded in `F1R3FLY-io-MeTTa-Compiler::backend::thread_pool`'s
//! `LazyLock`-backed global-singleton pattern for [`global_alert_bus`], and
//! on `dashmap` (already declared for the Arceon workspace) for the
//! concurrent `level -> kind -> listeners` registry §4.H and §5 describe.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Severity of an [`AlertEvent`]. Ordered `Info < Warning < Error < Critical`
/// so `minimum_alert_level` comparisons can use `>=` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

/// Which subsystem produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    Scaling,
    Monitoring,
}

const ALL_LEVELS: [AlertLevel; 4] = [AlertLevel::Info, AlertLevel::Warning, AlertLevel::Error, AlertLevel::Critical];
const ALL_KINDS: [AlertKind; 2] = [AlertKind::Scaling, AlertKind::Monitoring];

/// A recognized value in an [`AlertEvent`]'s metadata map, enumerated per
/// §9's "dynamic alert metadata map" re-architecture guidance rather than
/// left as an open-world `any`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

/// `metadata` keys recognized by the bus: `poolName, activeThreads, poolSize,
/// queueSize, oldCoreSize, newCoreSize, oldMaxSize, newMaxSize, oldKeepAlive,
/// newKeepAlive, reason, error`.
pub type AlertMetadata = BTreeMap<String, MetadataValue>;

/// Immutable record of a published alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub message: String,
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub timestamp_ms: i64,
    pub metadata: AlertMetadata,
}

impl AlertEvent {
    /// The `{timestamp, level, kind, message, metadata}` JSON shape §6
    /// documents for external sinks that stringify alerts.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&serde_json::json!({
            "timestamp": self.timestamp_ms,
            "level": self.level,
            "kind": self.kind,
            "message": self.message,
            "metadata": self.metadata,
        }))
    }
}

/// A subscriber to the alert bus.
///
/// Implemented for any `Fn(&AlertEvent) + Send + Sync` closure, so most
/// callers subscribe with a closure rather than naming this trait.
pub trait AlertListener: Send + Sync {
    fn on_alert(&self, event: &AlertEvent);
}

impl<F> AlertListener for F
where
    F: Fn(&AlertEvent) + Send + Sync,
{
    fn on_alert(&self, event: &AlertEvent) {
        self(event)
    }
}

/// Wraps a delegate listener so it only fires for events whose
/// `metadata["poolName"]` matches `pool_name`.
struct PoolFilterListener {
    delegate: Arc<dyn AlertListener>,
    pool_name: String,
}

impl AlertListener for PoolFilterListener {
    fn on_alert(&self, event: &AlertEvent) {
        if matches!(event.metadata.get("poolName"), Some(MetadataValue::Text(p)) if *p == self.pool_name) {
            self.delegate.on_alert(event);
        }
    }
}

/// One registered subscription. `identity` is what `unsubscribe*` compares
/// against (pointer equality via [`Arc::ptr_eq`]); for a plain subscription
/// it is the listener itself, for a pool-filtered one it is the undecorated
/// delegate, so unsubscribing with the same `(listener, pool_name)` removes
/// exactly the entry that subscribing with those arguments created.
struct Entry {
    invoke: Arc<dyn AlertListener>,
    identity: Arc<dyn AlertListener>,
    pool_filter: Option<String>,
}

/// Process-wide pub/sub registry for [`AlertEvent`]s, keyed by `(level, kind)`.
///
/// Every `(level, kind)` bucket is pre-populated at construction so
/// subscribing never mutates the outer map, only the bucket's listener list
/// — matching §4.H's "pre-populated... so subscription requires no map
/// mutation on the publish path."
pub struct AlertBus {
    buckets: DashMap<(AlertLevel, AlertKind), RwLock<Vec<Entry>>>,
}

impl AlertBus {
    pub fn new() -> Self {
        let buckets = DashMap::new();
        for level in ALL_LEVELS {
            for kind in ALL_KINDS {
                buckets.insert((level, kind), RwLock::new(Vec::new()));
            }
        }
        Self { buckets }
    }

    pub fn subscribe(&self, level: AlertLevel, kind: AlertKind, listener: Arc<dyn AlertListener>) {
        self.push(
            level,
            kind,
            Entry {
                invoke: listener.clone(),
                identity: listener,
                pool_filter: None,
            },
        );
    }

    pub fn subscribe_for_pool(&self, level: AlertLevel, kind: AlertKind, listener: Arc<dyn AlertListener>, pool_name: impl Into<String>) {
        let pool_name = pool_name.into();
        let filtered: Arc<dyn AlertListener> = Arc::new(PoolFilterListener {
            delegate: listener.clone(),
            pool_name: pool_name.clone(),
        });
        self.push(
            level,
            kind,
            Entry {
                invoke: filtered,
                identity: listener,
                pool_filter: Some(pool_name),
            },
        );
    }

    pub fn subscribe_all_kinds(&self, level: AlertLevel, listener: Arc<dyn AlertListener>) {
        for kind in ALL_KINDS {
            self.subscribe(level, kind, listener.clone());
        }
    }

    pub fn subscribe_all(&self, listener: Arc<dyn AlertListener>) {
        for level in ALL_LEVELS {
            self.subscribe_all_kinds(level, listener.clone());
        }
    }

    pub fn unsubscribe(&self, level: AlertLevel, kind: AlertKind, listener: &Arc<dyn AlertListener>) {
        self.remove(level, kind, listener, None);
    }

    pub fn unsubscribe_for_pool(&self, level: AlertLevel, kind: AlertKind, listener: &Arc<dyn AlertListener>, pool_name: &str) {
        self.remove(level, kind, listener, Some(pool_name));
    }

    pub fn unsubscribe_all_kinds(&self, level: AlertLevel, listener: &Arc<dyn AlertListener>) {
        for kind in ALL_KINDS {
            self.unsubscribe(level, kind, listener);
        }
    }

    pub fn unsubscribe_all(&self, listener: &Arc<dyn AlertListener>) {
        for level in ALL_LEVELS {
            self.unsubscribe_all_kinds(level, listener);
        }
    }

    /// Builds an [`AlertEvent`] (copying `metadata`) and invokes every
    /// listener registered for exactly `(level, kind)`. A panicking listener
    /// is caught and logged; it never aborts dispatch to the rest.
    pub fn publish_alert(&self, message: impl Into<String>, level: AlertLevel, kind: AlertKind, metadata: AlertMetadata) {
        let event = AlertEvent {
            message: message.into(),
            level,
            kind,
            timestamp_ms: Utc::now().timestamp_millis(),
            metadata,
        };

        let Some(bucket) = self.buckets.get(&(level, kind)) else {
            return;
        };
        for entry in bucket.read().iter() {
            let listener = Arc::clone(&entry.invoke);
            let event_ref = &event;
            if catch_unwind(AssertUnwindSafe(|| listener.on_alert(event_ref))).is_err() {
                eprintln!("forgepool: alert listener panicked while handling {level:?}/{kind:?}");
            }
        }
    }

    fn push(&self, level: AlertLevel, kind: AlertKind, entry: Entry) {
        if let Some(bucket) = self.buckets.get(&(level, kind)) {
            bucket.write().push(entry);
        }
    }

    fn remove(&self, level: AlertLevel, kind: AlertKind, listener: &Arc<dyn AlertListener>, pool_name: Option<&str>) {
        if let Some(bucket) = self.buckets.get(&(level, kind)) {
            bucket
                .write()
                .retain(|entry| !(entry.pool_filter.as_deref() == pool_name && Arc::ptr_eq(&entry.identity, listener)));
        }
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_ALERT_BUS: LazyLock<Arc<AlertBus>> = LazyLock::new(|| Arc::new(AlertBus::new()));

/// The process-wide alert bus instance, per §9's "Global singleton bus"
/// design note. Tests that want isolation should construct their own
/// [`AlertBus::new`] instead.
pub fn global_alert_bus() -> Arc<AlertBus> {
    GLOBAL_ALERT_BUS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> Arc<dyn AlertListener> {
        Arc::new(move |_: &AlertEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn publish_delivers_only_to_matching_level_and_kind() {
        let bus = AlertBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(hits.clone());

        bus.subscribe(AlertLevel::Warning, AlertKind::Monitoring, listener.clone());

        bus.publish_alert("a", AlertLevel::Warning, AlertKind::Monitoring, AlertMetadata::new());
        bus.publish_alert("b", AlertLevel::Warning, AlertKind::Scaling, AlertMetadata::new());
        bus.publish_alert("c", AlertLevel::Error, AlertKind::Monitoring, AlertMetadata::new());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_then_unsubscribe_leaves_listener_list_unchanged() {
        let bus = AlertBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(hits.clone());

        bus.subscribe(AlertLevel::Info, AlertKind::Scaling, listener.clone());
        bus.unsubscribe(AlertLevel::Info, AlertKind::Scaling, &listener);
        bus.publish_alert("x", AlertLevel::Info, AlertKind::Scaling, AlertMetadata::new());

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pool_filtered_listener_only_receives_matching_pool() {
        let bus = AlertBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(hits.clone());

        bus.subscribe_for_pool(AlertLevel::Critical, AlertKind::Scaling, listener.clone(), "pool-a");

        let mut meta_a = AlertMetadata::new();
        meta_a.insert("poolName".into(), MetadataValue::Text("pool-a".into()));
        bus.publish_alert("hit", AlertLevel::Critical, AlertKind::Scaling, meta_a);

        let mut meta_b = AlertMetadata::new();
        meta_b.insert("poolName".into(), MetadataValue::Text("pool-b".into()));
        bus.publish_alert("miss", AlertLevel::Critical, AlertKind::Scaling, meta_b);

        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.unsubscribe_for_pool(AlertLevel::Critical, AlertKind::Scaling, &listener, "pool-a");
        let mut meta_a2 = AlertMetadata::new();
        meta_a2.insert("poolName".into(), MetadataValue::Text("pool-a".into()));
        bus.publish_alert("hit-after-unsub", AlertLevel::Critical, AlertKind::Scaling, meta_a2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_panic_does_not_abort_dispatch() {
        let bus = AlertBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let panicking: Arc<dyn AlertListener> = Arc::new(|_: &AlertEvent| panic!("boom"));
        let counting = counting_listener(hits.clone());

        bus.subscribe(AlertLevel::Error, AlertKind::Monitoring, panicking);
        bus.subscribe(AlertLevel::Error, AlertKind::Monitoring, counting);

        bus.publish_alert("x", AlertLevel::Error, AlertKind::Monitoring, AlertMetadata::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_all_fans_out_to_every_level_and_kind() {
        let bus = AlertBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(hits.clone());
        bus.subscribe_all(listener);

        for level in ALL_LEVELS {
            for kind in ALL_KINDS {
                bus.publish_alert("x", level, kind, AlertMetadata::new());
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn global_alert_bus_is_a_shared_singleton() {
        let a = global_alert_bus();
        let b = global_alert_bus();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
