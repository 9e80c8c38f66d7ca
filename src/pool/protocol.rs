//! IPC protocol between the pool and its worker processes.
//!
//! Messages are JSON-serialized and newline-delimited. The parent writes
//! [`WorkRequest`]s to the worker's stdin and reads [`WorkResponse`]s from its
//! stdout.

use crate::job::{Job, JobResult};
use serde::{Deserialize, Serialize};

/// Request from parent to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkRequest {
    /// Execute one job against the worker's session.
    Job(Job),

    /// Stop sentinel: release the session and exit.
    Exit,
}

/// Response from worker to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkResponse {
    /// Session acquired; the worker is waiting for jobs.
    Ready,

    /// Session acquisition failed; the worker exits after sending this.
    StartupFailed { message: String },

    /// Outcome of the job most recently sent.
    Result(JobResult),
}

impl WorkResponse {
    pub fn startup_failed(message: impl Into<String>) -> Self {
        Self::StartupFailed {
            message: message.into(),
        }
    }
}
