//! HTTP API server for trafficd.
//!
//! A thin layer over the worker pool: each request becomes one batch for the
//! correlator, and the health endpoints read the pool's health snapshot.
//!
//! # Example
//!
//! ```bash
//! # Start the server with 8 workers
//! trafficd serve --port 8000 --workers 8
//!
//! # Analyse two locations
//! curl -X POST http://localhost:8000/process-locations \
//!   -H 'content-type: application/json' \
//!   -d '{"locations": [{"lat": 40.71, "lng": -74.0}, {"lat": 51.5, "lng": -0.12}]}'
//!
//! # View API documentation
//! open "http://localhost:8000/docs"
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::correlator::{Correlator, WorkQueue};
use crate::error::Result;
use crate::pool::{PoolHealth, WorkerPool};
use crate::sink::ResultSink;

/// What the server needs from a pool: the correlator's two operations plus
/// a health snapshot.
pub trait PoolService: WorkQueue + Send + Sync {
    fn health(&self) -> PoolHealth;
}

impl PoolService for WorkerPool {
    fn health(&self) -> PoolHealth {
        WorkerPool::health(self)
    }
}

/// Shared application state.
pub struct AppState {
    pub correlator: Correlator<Arc<dyn PoolService>>,
    pub sink: Arc<dyn ResultSink>,
    /// Directory captures are saved to; checked by the health endpoints.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        pool: Arc<dyn PoolService>,
        sink: Arc<dyn ResultSink>,
        result_timeout: Option<Duration>,
    ) -> Self {
        Self {
            correlator: Correlator::new(pool).with_result_timeout(result_timeout),
            sink,
            static_dir: None,
        }
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }
}

/// Server configuration.
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins.
    pub cors: bool,
    /// Specific CORS origins (if cors is true but we want to restrict).
    pub cors_origins: Option<Vec<String>>,
}

/// Build the router: processing routes (with their aliases), health probes,
/// OpenAPI docs, saved captures under `/static`, request IDs and tracing.
pub fn build_router(state: Arc<AppState>, cors: Option<CorsLayer>) -> Router {
    let mut routes: Router<Arc<AppState>> = Router::new();
    if let Some(dir) = &state.static_dir {
        routes = routes.nest_service("/static", ServeDir::new(dir));
    }

    let mut app = routes
        .route("/", get(handlers::root))
        .route("/process-locations", post(handlers::process_locations))
        .route("/process-many", post(handlers::process_locations))
        .route("/process-location", post(handlers::process_location))
        .route("/process-one", post(handlers::process_location))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_probe))
        .route("/health/live", get(handlers::liveness_probe))
        .merge(Scalar::with_url("/docs", openapi::ApiDoc::openapi()))
        .route(
            "/openapi.json",
            get(|| async { axum::Json(openapi::ApiDoc::openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state);

    if let Some(cors_layer) = cors {
        app = app.layer(cors_layer);
    }

    app
}

fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    let base = || {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    };

    if config.cors {
        return Some(base().allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    (!origins.is_empty()).then(|| base().allow_origin(origins))
}

/// Serve the API until Ctrl+C, then stop the pool.
///
/// The pool is stopped after the listener has drained, so in-flight batches
/// finish before their workers receive stop sentinels.
pub async fn run_server(config: ServerConfig, pool: Arc<WorkerPool>, state: AppState) -> Result<()> {
    let app = build_router(Arc::new(state), cors_layer(&config));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            stop_pool(pool).await;
            return Err(e.into());
        }
    };
    let local: SocketAddr = listener.local_addr()?;

    info!(addr = %local, workers = pool.worker_count(), "Starting trafficd API server");
    eprintln!("Starting trafficd API server on http://{}", local);
    eprintln!("API documentation: http://{}/docs", local);
    eprintln!("OpenAPI spec: http://{}/openapi.json", local);
    eprintln!();
    eprintln!("Press Ctrl+C to stop");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    eprintln!("\nStopping worker pool...");
    stop_pool(pool).await;
    eprintln!("Server stopped");

    served?;
    Ok(())
}

async fn stop_pool(pool: Arc<WorkerPool>) {
    if let Err(e) = tokio::task::spawn_blocking(move || pool.stop()).await {
        warn!(error = %e, "Worker pool shutdown panicked");
    }
}

/// Await a CTRL+C (SIGINT) to trigger graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobResult, Outcome};
    use crate::pool::PoolStatus;
    use crate::sink::BatchRecord;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Completes every job immediately, in reverse dispatch order. Latitudes
    /// above 90 fail.
    #[derive(Default)]
    struct InstantPool {
        pending: Mutex<VecDeque<JobResult>>,
        alive: usize,
    }

    impl WorkQueue for InstantPool {
        fn dispatch(&self, job: Job) -> Result<()> {
            let outcome = if job.payload.lat > 90.0 {
                Outcome::failure(format!("latitude {} out of range", job.payload.lat))
            } else {
                Outcome::success(json!({
                    "lat": job.payload.lat,
                    "base_url": job.payload.base_url,
                }))
            };
            self.pending
                .lock()
                .unwrap()
                .push_front(JobResult::new(job.batch, job.index, 0, outcome));
            Ok(())
        }

        fn next_result(&self, _timeout: Option<Duration>) -> Result<Option<JobResult>> {
            Ok(self.pending.lock().unwrap().pop_front())
        }
    }

    impl PoolService for InstantPool {
        fn health(&self) -> PoolHealth {
            PoolHealth {
                workers_expected: 2,
                workers_alive: self.alive,
                job_queue_size: 0,
                result_queue_size: 0,
                jobs_completed: 0,
                status: PoolStatus::classify(self.alive, 2),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<BatchRecord>>,
    }

    impl ResultSink for RecordingSink {
        fn save(&self, record: &BatchRecord) -> anyhow::Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn app_with(alive: usize, sink: Arc<RecordingSink>) -> Router {
        let pool = Arc::new(InstantPool {
            alive,
            ..Default::default()
        });
        let state = AppState::new(pool, sink, None);
        build_router(Arc::new(state), None)
    }

    fn app() -> Router {
        app_with(2, Arc::default())
    }

    async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .header("host", "traffic.local:8000")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read(response).await
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read(response).await
    }

    async fn read(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn locations(lats: &[f64]) -> Value {
        json!({
            "locations": lats.iter().map(|lat| json!({"lat": lat, "lng": 0.0})).collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_process_locations_orders_results() {
        let (status, body) = post(app(), "/process-locations", locations(&[1.0, 2.0, 3.0])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["locations_count"], 3);
        assert_eq!(body["completed"], 3);
        let lats: Vec<_> = body["result"].as_array().unwrap().iter().map(|r| r["lat"].clone()).collect();
        assert_eq!(lats, vec![json!(1.0), json!(2.0), json!(3.0)]);
        assert_eq!(body["result"][0]["base_url"], "http://traffic.local:8000");
        assert!(body.get("error").is_none());
        assert_eq!(body["request_id"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_process_many_alias_with_partial_failure() {
        let (status, body) = post(app(), "/process-many", locations(&[1.0, 95.0, 3.0])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completed"], 2);
        assert_eq!(body["error"], "latitude 95 out of range");
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let (status, body) = post(app(), "/process-locations", json!({"locations": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No locations provided");
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let lats: Vec<f64> = (0..21).map(f64::from).collect();
        let (status, body) = post(app(), "/process-locations", locations(&lats)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Max 20 locations per request"));
    }

    #[tokio::test]
    async fn test_process_location() {
        let body = json!({"location": {"lat": 4.0, "lng": 5.0}});
        let (status, body) = post(app(), "/process-one", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["lat"], 4.0);
        assert_eq!(body["saved_to_db"], false);
    }

    #[tokio::test]
    async fn test_failed_single_location_is_500() {
        let body = json!({"location": {"lat": 100.0, "lng": 5.0}});
        let (status, body) = post(app(), "/process-location", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Processing-one failed: latitude 100 out of range");
    }

    #[tokio::test]
    async fn test_save_to_db_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let mut body = locations(&[1.0, 99.0]);
        body["save_to_db"] = json!(true);

        let (status, body) = post(app_with(2, sink.clone()), "/process-locations", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["saved_to_db"], true);

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, body["request_id"].as_str().unwrap());
        assert_eq!(records[0].locations_count, 2);
        assert_eq!(records[0].logs.len(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_pool() {
        let (status, body) = get(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        let info = &body["dependencies"]["worker_pool"]["info"];
        assert_eq!(info["workers_expected"], 2);
        assert_eq!(info["workers_alive"], 2);
        assert_eq!(info["worker_pool_status"], "ok");
    }

    #[tokio::test]
    async fn test_degraded_pool() {
        let (_, body) = get(app_with(1, Arc::default()), "/health").await;
        assert_eq!(body["dependencies"]["worker_pool"]["info"]["worker_pool_status"], "degraded");

        let (status, body) = get(app_with(1, Arc::default()), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["failed_checks"], json!(["worker_pool"]));
    }

    #[tokio::test]
    async fn test_ready_and_live() {
        let (status, body) = get(app(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        let (status, body) = get(app(), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn test_static_dir_is_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("capture.png"), b"png-bytes").unwrap();

        let pool = Arc::new(InstantPool {
            alive: 2,
            ..Default::default()
        });
        let state = AppState::new(pool, Arc::new(RecordingSink::default()), None)
            .with_static_dir(Some(dir.path().to_path_buf()));
        let app = build_router(Arc::new(state), None);

        let response = app
            .clone()
            .oneshot(Request::get("/static/capture.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"png-bytes");

        let response = app
            .oneshot(Request::get("/static/missing.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_static_route_without_dir() {
        let response = app()
            .oneshot(Request::get("/static/capture.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let (status, body) = get(app(), "/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"].get("/process-locations").is_some());
        assert!(body["paths"].get("/health/ready").is_some());
    }
}
