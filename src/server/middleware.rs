//! Request correlation IDs.
//!
//! Every request carries an ID: the caller's `X-Request-ID` when it is
//! usable, a fresh hex UUID otherwise. Handlers read it through
//! `Extension<RequestId>` and report it as the response's `request_id`.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request correlation IDs.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest caller-supplied ID that is accepted as is.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    fn from_header(value: &HeaderValue) -> Option<Self> {
        let id = value.to_str().ok()?.trim();
        let usable = !id.is_empty()
            && id.len() <= MAX_REQUEST_ID_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        usable.then(|| Self(id.to_string()))
    }
}

/// Attach a [`RequestId`] to the request, run the rest of the stack inside a
/// span carrying it and echo it back in the response headers.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);

    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.0,
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id.0) {
        response
            .headers_mut()
            .insert(X_REQUEST_ID.clone(), header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Extension, Router,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use tower::ServiceExt;

    async fn echo_handler(Extension(id): Extension<RequestId>) -> String {
        id.0
    }

    fn test_app() -> Router {
        Router::new()
            .route("/", get(echo_handler))
            .layer(middleware::from_fn(request_id_middleware))
    }

    async fn request(header: Option<&str>) -> (String, String) {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("x-request-id", value);
        }
        let response = test_app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let echoed = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (echoed, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_generates_hex_request_id() {
        let (header, seen_by_handler) = request(None).await;
        assert_eq!(header, seen_by_handler);
        assert_eq!(header.len(), 32);
        assert!(header.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_preserves_provided_request_id() {
        let (header, seen_by_handler) = request(Some("client-req.42")).await;
        assert_eq!(header, "client-req.42");
        assert_eq!(seen_by_handler, "client-req.42");
    }

    #[tokio::test]
    async fn test_replaces_unusable_request_id() {
        let (header, _) = request(Some("has spaces and {braces}")).await;
        assert_ne!(header, "has spaces and {braces}");
        assert_eq!(header.len(), 32);
    }
}
