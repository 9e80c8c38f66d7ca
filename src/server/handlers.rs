//! API request handlers.
//!
//! Pool calls block until their batch completes, so they run under
//! `tokio::task::spawn_blocking()` and never stall the runtime's worker
//! threads.

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, instrument, warn};

use crate::job::JobPayload;
use crate::sink::BatchRecord;

use super::AppState;
use super::error::ApiError;
use super::middleware::RequestId;
use super::types::*;

/// Run a blocking pool operation off the async runtime.
async fn run_pool_operation<T, F>(context: &'static str, operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(error = %e, "{}", context);
            Err(ApiError::from_traffic(e, context))
        }
        Err(e) => {
            error!(error = %e, "Pool task panicked");
            Err(ApiError::internal(format!("Task join error: {}", e)))
        }
    }
}

/// Hand a record to the result sink. Failures are logged, never returned.
async fn persist(state: &Arc<AppState>, record: BatchRecord) {
    let sink = state.sink.clone();
    let request_id = record.request_id.clone();
    let saved = tokio::task::spawn_blocking(move || sink.save(&record)).await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            request_id = %request_id,
            error = format!("{:#}", e),
            "Failed to store results"
        ),
        Err(e) => warn!(request_id = %request_id, error = %e, "Result sink panicked"),
    }
}

/// Public base URL of this request, used to build links to saved captures.
fn base_url(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{}://{}", scheme, host.trim_end_matches('/')))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Analyse up to 20 locations in parallel.
///
/// Results come back in request order. Locations that fail are left out of
/// `result` and reported, one per line, in `error`.
#[utoipa::path(
    post,
    path = "/process-locations",
    request_body = MultiLocationRequest,
    responses(
        (status = 200, description = "Batch processed", body = MultiLocationResponse),
        (status = 400, description = "Empty or oversized batch"),
        (status = 500, description = "Batch could not be processed"),
    ),
    tag = "traffic"
)]
#[instrument(skip_all, fields(request_id = %request_id.0, locations = body.locations.len()))]
pub async fn process_locations(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<MultiLocationRequest>,
) -> Result<Json<MultiLocationResponse>, ApiError> {
    if body.locations.is_empty() {
        return Err(ApiError::from_traffic(
            crate::error::TrafficError::EmptyBatch,
            "Processing-many failed",
        ));
    }

    let base_url = base_url(&headers);
    let payloads: Vec<JobPayload> = body
        .locations
        .into_iter()
        .map(|location| location.into_payload(body.save_to_static, base_url.clone()))
        .collect();

    let batch_state = state.clone();
    let report = run_pool_operation("Processing-many failed", move || {
        batch_state.correlator.run_batch(payloads)
    })
    .await?;

    if body.save_to_db {
        persist(
            &state,
            BatchRecord::from_report(request_id.0.clone(), &report, body.save_to_static),
        )
        .await;
    }

    Ok(Json(MultiLocationResponse {
        request_id: request_id.0,
        locations_count: report.submitted,
        completed: report.completed,
        result: report.results,
        saved_to_db: body.save_to_db,
        saved_to_static: body.save_to_static,
        error: report.error,
    }))
}

/// Analyse a single location.
#[utoipa::path(
    post,
    path = "/process-location",
    request_body = SingleLocationRequest,
    responses(
        (status = 200, description = "Location processed", body = LocationResponse),
        (status = 500, description = "Analysis failed"),
    ),
    tag = "traffic"
)]
#[instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn process_location(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<SingleLocationRequest>,
) -> Result<Json<LocationResponse>, ApiError> {
    let payload = body
        .location
        .into_payload(body.save_to_static, base_url(&headers));

    let job_state = state.clone();
    let job_payload = payload.clone();
    let result = run_pool_operation("Processing-one failed", move || {
        job_state.correlator.run_one(job_payload)
    })
    .await?;

    if body.save_to_db {
        persist(
            &state,
            BatchRecord::single(request_id.0.clone(), &payload, result.clone(), body.save_to_static),
        )
        .await;
    }

    Ok(Json(LocationResponse {
        request_id: request_id.0,
        result,
        saved_to_db: body.save_to_db,
        saved_to_static: body.save_to_static,
    }))
}

/// Write and remove a probe file to prove the static directory is writable.
fn probe_static_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".health_test");
    std::fs::write(&probe, b"health_check")?;
    std::fs::remove_file(&probe)
}

async fn file_system_health(state: &AppState) -> Option<DependencyHealth> {
    let dir = state.static_dir.clone()?;
    let probed = tokio::task::spawn_blocking(move || probe_static_dir(&dir)).await;
    Some(match probed {
        Ok(Ok(())) => DependencyHealth::healthy("File system permissions are OK"),
        Ok(Err(e)) => DependencyHealth::unhealthy(e.to_string()),
        Err(e) => DependencyHealth::unhealthy(format!("Task join error: {}", e)),
    })
}

/// Service and dependency health.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health report", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.correlator.queue().health();
    let pool_health = if pool.workers_alive > 0 {
        DependencyHealth::healthy("Worker pool is alive")
    } else {
        DependencyHealth::unhealthy("No worker processes alive")
    };
    let file_system = file_system_health(&state).await;

    let all_healthy =
        pool_health.is_healthy() && file_system.as_ref().is_none_or(|fs| fs.is_healthy());

    Json(HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: Dependencies {
            worker_pool: WorkerPoolDependency {
                health: pool_health,
                info: WorkerPoolInfo::from(&pool),
            },
            file_system,
        },
    })
}

/// Readiness probe: every worker alive and the static directory writable.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadinessResponse),
        (status = 503, description = "Not ready", body = ReadinessResponse),
    ),
    tag = "health"
)]
pub async fn readiness_probe(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut failed_checks = Vec::new();

    if !state.correlator.queue().health().is_healthy() {
        failed_checks.push("worker_pool".to_string());
    }
    if let Some(fs) = file_system_health(&state).await
        && !fs.is_healthy()
    {
        failed_checks.push("file_system".to_string());
    }

    let (status, label) = if failed_checks.is_empty() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(ReadinessResponse {
            status: label.to_string(),
            timestamp: now(),
            failed_checks,
        }),
    )
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process is alive", body = LivenessResponse)),
    tag = "health"
)]
pub async fn liveness_probe() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        timestamp: now(),
    })
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner", body = RootResponse)),
    tag = "health"
)]
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Traffic analysis worker pool API".to_string(),
    })
}
