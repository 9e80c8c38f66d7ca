//! Error types for trafficd.

use thiserror::Error;

/// Main error type for trafficd.
///
/// Job-level failures are not errors: they travel as [`crate::job::Outcome::Failure`]
/// inside a batch. The variants here are pool-level or request-level failures.
#[derive(Error, Debug)]
pub enum TrafficError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker {worker} failed to acquire its browser session: {message}")]
    SessionAcquisition { worker: usize, message: String },

    #[error("Worker {worker} did not become ready within {secs}s")]
    StartupTimeout { worker: usize, secs: u64 },

    #[error("Worker pool is stopped")]
    PoolStopped,

    #[error("Max {max} locations per request (got {count})")]
    BatchTooLarge { count: usize, max: usize },

    #[error("No locations provided")]
    EmptyBatch,

    #[error("Job {index} failed: {message}")]
    JobFailed { index: usize, message: String },
}

/// Result type alias for trafficd operations.
pub type Result<T> = std::result::Result<T, TrafficError>;
