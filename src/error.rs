//! Typed errors for forgepool, grounded in `arceon-core::error::ArceonError`.

use thiserror::Error;

/// Top-level error type surfaced across forgepool's public API.
///
/// Internal subsystems (snapshotting, alert dispatch, scaling) recover
/// locally and never propagate an error to a caller; only configuration
/// and submission failures are user-visible, per the propagation policy.
#[derive(Error, Debug)]
pub enum ForgepoolError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("scaling error: {0}")]
    Scaling(String),

    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("task failed: {0}")]
    TaskFailure(String),
}

/// Errors raised by a [`crate::persistence::PersistenceStrategy`].
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ForgepoolError>;
