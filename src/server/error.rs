//! API error handling.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::TrafficError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// 400 Bad Request.
    ///
    /// ```
    /// use trafficd::server::error::ApiError;
    /// let err = ApiError::bad_request("No locations provided");
    /// assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    /// assert_eq!(err.code, "BAD_REQUEST");
    /// ```
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }

    /// Map a pool or batch error, prefixing server-side failures with `context`.
    pub fn from_traffic(err: TrafficError, context: &str) -> Self {
        match err {
            TrafficError::EmptyBatch | TrafficError::BatchTooLarge { .. } => {
                ApiError::bad_request(err.to_string())
            }
            TrafficError::PoolStopped => ApiError::unavailable(err.to_string()),
            TrafficError::JobFailed { message, .. } => {
                ApiError::internal(format!("{}: {}", context, message))
            }
            _ => ApiError::internal(format!("{}: {}", context, err)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
