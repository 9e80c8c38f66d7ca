//! Job data model shared by the parent process and its workers.
//!
//! A [`Job`] is one unit of dispatched work tagged with its submission index.
//! Executing it yields an [`Outcome`], and the worker reports the pair back as
//! a [`JobResult`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default map zoom level used for traffic captures.
pub const DEFAULT_ZOOM: u8 = 18;

/// Direction the storefront at the analysed location faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorefrontDirection {
    #[default]
    North,
    South,
    East,
    West,
}

impl std::fmt::Display for StorefrontDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::North => write!(f, "north"),
            Self::South => write!(f, "south"),
            Self::East => write!(f, "east"),
            Self::West => write!(f, "west"),
        }
    }
}

/// Everything the analysis function needs for one geographic point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub lat: f64,
    pub lng: f64,
    /// Day of week for typical-traffic mode (e.g. "Monday").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// Time of day for typical-traffic mode (e.g. "8:30 AM").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub storefront_direction: StorefrontDirection,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    /// Keep the captured image under the static directory.
    #[serde(default)]
    pub save_to_static: bool,
    /// Public base URL used to build links to saved captures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_zoom() -> u8 {
    DEFAULT_ZOOM
}

impl JobPayload {
    /// Payload for a point with all optional fields at their defaults.
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            day: None,
            time: None,
            storefront_direction: StorefrontDirection::default(),
            zoom: DEFAULT_ZOOM,
            save_to_static: false,
            base_url: None,
        }
    }
}

/// One unit of dispatched work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Submission the index belongs to. Results echo it back so that a
    /// correlator can tell its own results from leftovers of an earlier batch.
    #[serde(default)]
    pub batch: u64,
    /// Position of the job within its batch.
    pub index: usize,
    pub payload: JobPayload,
}

impl Job {
    pub fn new(batch: u64, index: usize, payload: JobPayload) -> Self {
        Self {
            batch,
            index,
            payload,
        }
    }
}

/// Result of executing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        value: serde_json::Value,
    },
    Failure {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
}

impl Outcome {
    pub fn success(value: serde_json::Value) -> Self {
        Self::Success { value }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            trace: None,
        }
    }

    pub fn failure_with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            trace: Some(trace.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A job's index paired with its outcome, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub batch: u64,
    pub index: usize,
    /// Worker that executed the job.
    #[serde(default)]
    pub worker_id: usize,
    pub outcome: Outcome,
}

impl JobResult {
    pub fn new(batch: u64, index: usize, worker_id: usize, outcome: Outcome) -> Self {
        Self {
            batch,
            index,
            worker_id,
            outcome,
        }
    }
}
