//! An enhanced worker pool: priority-ordered bounded queueing, tracked task
//! lifecycles, thread-safe stats, durable queue persistence, pluggable
//! autoscaling, and a structured alert bus.
//!
//! The pieces compose roughly as:
//!
//! ```text
//! submit -> TrackedTask -> PriorityPersistentQueue -> worker -> Stats
//!                                                         |
//!                    Monitor samples PoolSnapshot, publishes AlertBus
//!                    events, and asks Scaler to apply a ScalingCommand.
//! ```
//!
//! [`PoolEngineBuilder`] is the entry point for configuring and starting a
//! pool; [`PoolEngine`] is the pool itself.

pub mod alert;
pub mod config;
pub mod error;
pub mod handle;
pub mod monitor;
pub mod persistence;
pub mod pool;
pub mod queue;
pub mod scaler;
pub mod scaling;
pub mod snapshot;
pub mod stats;
pub mod task;

pub use alert::{global_alert_bus, AlertBus, AlertEvent, AlertKind, AlertLevel, AlertListener, AlertMetadata, MetadataValue};
pub use config::{AlertConfig, EngineConfig, MonitoringConfig, PersistenceSettings, PoolConfig, PoolEngineBuilder, ScalingConfig};
pub use error::{ForgepoolError, PersistenceError, Result};
pub use handle::PoolHandle;
pub use monitor::{Monitor, MonitorThresholds};
pub use persistence::{DatabasePersistence, FilePersistence, NoOpPersistence, PersistenceStrategy};
pub use pool::{PoolEngine, TaskHandle, TaskResult};
pub use queue::PriorityPersistentQueue;
pub use scaler::Scaler;
pub use scaling::{CompositeStrategy, LoadBasedStrategy, QueueBasedStrategy, ScalingCommand, ScalingStrategy};
pub use snapshot::PoolSnapshot;
pub use stats::{Stats, StatsConfig, StatsSnapshot};
pub use task::{ExecutionOutcome, Job, PersistablePayload, SerializableTask, TrackedTask};
