//! Tracked and serializable work units.
//!
//! Grounded in `arceon-performance::concurrent_processor::Task` for the
//! field shape (id, priority, timestamps, metadata), reworked into the
//! immutable, ordered wrapper this pool's priority queue requires.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersistenceError;

/// A user work unit submitted to the pool.
///
/// Implemented for `Fn() -> Result<(), String> + Send + 'static` closures via
/// the blanket impl below, so most callers never name this trait directly.
pub trait Job: Send + 'static {
    fn run(&self) -> Result<(), String>;
}

impl<F> Job for F
where
    F: Fn() -> Result<(), String> + Send + 'static,
{
    fn run(&self) -> Result<(), String> {
        self()
    }
}

/// A [`Job`] that additionally supports durable persistence of its payload.
///
/// Only pools built with persistence enabled require their job type to
/// implement this; the opaque byte encoding is entirely up to the payload
/// (the file/database persistence strategies never look inside the blob).
pub trait PersistablePayload: Job {
    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError>
    where
        Self: Sized;
}

/// Outcome of running a [`TrackedTask`], timed at the submission boundary.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub wait_ms: u64,
    pub exec_ms: u64,
}

/// Immutable wrapper adding id, submit timestamp, priority, and metadata
/// around a user payload. Comparable by `(priority, submit_time_ms)`,
/// both ascending — lower priority value is more urgent, FIFO within a
/// priority class.
pub struct TrackedTask<P: Job> {
    pub task_id: String,
    pub submit_time_ms: i64,
    pub priority: i64,
    pub payload: P,
    pub metadata: HashMap<String, String>,
}

impl<P: Job> TrackedTask<P> {
    pub fn new(payload: P, priority: i64) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            submit_time_ms: Utc::now().timestamp_millis(),
            priority,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Run the payload, measuring wait time (since submission) and
    /// execution time around the call.
    ///
    /// This does *not* record anything into a [`crate::stats::Stats`]
    /// collector itself — see the Pool Engine's pre/post-execute hooks,
    /// which are the single recording site chosen to avoid the
    /// wait/exec double-counting the original design left ambiguous
    /// (documented in DESIGN.md).
    pub fn run(&self) -> ExecutionOutcome {
        let started_at = Utc::now().timestamp_millis();
        let wait_ms = (started_at - self.submit_time_ms).max(0) as u64;

        let exec_start = std::time::Instant::now();
        let result = self.payload.run();
        let exec_ms = exec_start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ExecutionOutcome {
                success: true,
                error: None,
                wait_ms,
                exec_ms,
            },
            Err(message) => ExecutionOutcome {
                success: false,
                error: Some(message),
                wait_ms,
                exec_ms,
            },
        }
    }
}

impl<P: Job> PartialEq for TrackedTask<P> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.submit_time_ms == other.submit_time_ms
    }
}

impl<P: Job> Eq for TrackedTask<P> {}

impl<P: Job> PartialOrd for TrackedTask<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Job> Ord for TrackedTask<P> {
    /// Reversed so a `BinaryHeap<TrackedTask<P>>` (a max-heap) behaves as
    /// the min-heap §3 specifies: lower `priority` pops first, ties broken
    /// by earlier `submit_time_ms`.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.submit_time_ms.cmp(&self.submit_time_ms))
    }
}

/// Projection of a [`TrackedTask`] produced only by the persistence path:
/// the payload is reduced to an opaque byte blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableTask {
    pub task_id: String,
    pub submit_time_ms: i64,
    pub priority: i64,
    pub blob: Vec<u8>,
}

impl SerializableTask {
    pub fn from_tracked<P: PersistablePayload>(task: &TrackedTask<P>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            submit_time_ms: task.submit_time_ms,
            priority: task.priority,
            blob: task.payload.to_bytes(),
        }
    }

    pub fn into_tracked<P: PersistablePayload>(self) -> Result<TrackedTask<P>, PersistenceError> {
        let payload = P::from_bytes(&self.blob)?;
        Ok(TrackedTask {
            task_id: self.task_id,
            submit_time_ms: self.submit_time_ms,
            priority: self.priority,
            payload,
            metadata: HashMap::new(),
        })
    }
}
