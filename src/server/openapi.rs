//! OpenAPI specification for the trafficd API.

use utoipa::OpenApi;

use super::handlers;
use super::types::*;
use crate::job::StorefrontDirection;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "trafficd API",
        description = "Parallel traffic scoring for geographic locations, backed by a pool of persistent browser-session workers.",
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        handlers::root,
        handlers::process_locations,
        handlers::process_location,
        handlers::health_check,
        handlers::readiness_probe,
        handlers::liveness_probe,
    ),
    components(schemas(
        StorefrontDirection,
        LocationRequest,
        MultiLocationRequest,
        SingleLocationRequest,
        MultiLocationResponse,
        LocationResponse,
        HealthResponse,
        Dependencies,
        DependencyHealth,
        WorkerPoolDependency,
        WorkerPoolInfo,
        ReadinessResponse,
        LivenessResponse,
        RootResponse,
    )),
    tags(
        (name = "traffic", description = "Traffic analysis"),
        (name = "health", description = "Health checks")
    )
)]
pub struct ApiDoc;
