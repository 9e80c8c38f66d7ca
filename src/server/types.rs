//! API request and response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::job::{DEFAULT_ZOOM, JobPayload, StorefrontDirection};
use crate::pool::PoolHealth;

/// One location to analyse.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub storefront_direction: StorefrontDirection,
    /// Day of week for typical traffic (e.g. "Monday"). Live traffic if omitted.
    #[serde(default)]
    pub day: Option<String>,
    /// Time of day for typical traffic (e.g. "8:30 AM").
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
}

fn default_zoom() -> u8 {
    DEFAULT_ZOOM
}

impl LocationRequest {
    pub fn into_payload(self, save_to_static: bool, base_url: Option<String>) -> JobPayload {
        JobPayload {
            lat: self.lat,
            lng: self.lng,
            day: self.day,
            time: self.time,
            storefront_direction: self.storefront_direction,
            zoom: self.zoom,
            save_to_static,
            base_url,
        }
    }
}

/// Body of `POST /process-locations`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MultiLocationRequest {
    pub locations: Vec<LocationRequest>,
    #[serde(default)]
    pub save_to_static: bool,
    #[serde(default)]
    pub save_to_db: bool,
}

/// Body of `POST /process-location`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SingleLocationRequest {
    pub location: LocationRequest,
    #[serde(default)]
    pub save_to_static: bool,
    #[serde(default)]
    pub save_to_db: bool,
}

/// Result of a multi-location request.
#[derive(Debug, Serialize, ToSchema)]
pub struct MultiLocationResponse {
    pub request_id: String,
    pub locations_count: usize,
    /// Locations that were analysed successfully.
    pub completed: usize,
    /// Results of the successful locations, in request order.
    #[schema(value_type = Vec<Object>)]
    pub result: Vec<serde_json::Value>,
    pub saved_to_db: bool,
    pub saved_to_static: bool,
    /// Failure messages, one per line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a single-location request.
#[derive(Debug, Serialize, ToSchema)]
pub struct LocationResponse {
    pub request_id: String,
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
    pub saved_to_db: bool,
    pub saved_to_static: bool,
}

/// Health of one dependency.
#[derive(Debug, Serialize, ToSchema)]
pub struct DependencyHealth {
    /// "healthy" or "unhealthy".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(details: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            details: Some(details.into()),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            details: None,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Worker pool block of the health response.
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkerPoolInfo {
    pub workers_expected: usize,
    pub workers_alive: usize,
    /// "ok" when every worker is alive, "degraded" otherwise.
    pub worker_pool_status: String,
    pub job_queue_size: usize,
    pub result_queue_size: usize,
    pub jobs_completed: usize,
}

impl From<&PoolHealth> for WorkerPoolInfo {
    fn from(health: &PoolHealth) -> Self {
        Self {
            workers_expected: health.workers_expected,
            workers_alive: health.workers_alive,
            worker_pool_status: health.status.label().to_string(),
            job_queue_size: health.job_queue_size,
            result_queue_size: health.result_queue_size,
            jobs_completed: health.jobs_completed,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkerPoolDependency {
    #[serde(flatten)]
    pub health: DependencyHealth,
    pub info: WorkerPoolInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Dependencies {
    pub worker_pool: WorkerPoolDependency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_system: Option<DependencyHealth>,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" when every dependency is healthy, "unhealthy" otherwise.
    pub status: String,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    pub version: String,
    pub dependencies: Dependencies,
}

/// Readiness probe response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
}

/// Liveness probe response.
#[derive(Debug, Serialize, ToSchema)]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RootResponse {
    pub message: String,
}
