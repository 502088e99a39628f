//! The non-owning view of a pool that [`crate::monitor::Monitor`] and
//! [`crate::scaler::Scaler`] operate through.
//!
//! §9 calls out the pool/monitor/scaler cyclic ownership and prescribes
//! breaking it with "a non-owning handle (weak/back reference in design
//! terms)"; this trait is that handle's capability surface, object-safe so
//! the monitor and scaler can hold a `Weak<dyn PoolHandle>` without naming
//! the pool's payload type parameter.

use crate::snapshot::PoolSnapshot;

pub trait PoolHandle: Send + Sync {
    fn pool_name(&self) -> &str;
    fn is_shutting_down(&self) -> bool;
    fn build_snapshot(&self) -> PoolSnapshot;

    fn core_size(&self) -> usize;
    fn max_size(&self) -> usize;
    fn keep_alive_ms(&self) -> u64;
    fn min_threads(&self) -> usize;
    fn configured_max_threads(&self) -> usize;

    /// Resize the pool's core (resident) thread count. Returns `Err` only if
    /// the underlying executor refuses the new size (§7's "scaling clamp /
    /// validation error").
    fn resize_core(&self, new_core: usize) -> Result<(), String>;
    /// Raise or lower the ceiling core size may grow to.
    fn resize_max(&self, new_max: usize) -> Result<(), String>;
    /// Grow (`delta > 0`) or shrink (`delta < 0`) the queue's capacity.
    fn adjust_queue_capacity(&self, delta: i64);
    fn set_keep_alive_ms(&self, new_keep_alive_ms: u64);
}
