//! Request ID middleware for request tracing and correlation.
//!
//! Every response carries an `x-request-id`. An id supplied by an upstream
//! proxy is reused when it looks sane; otherwise a UUID v4 is generated. The id
//! is recorded on the current span and tagged on the Sentry scope.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LENGTH: usize = 128;

/// Accept an upstream id only if it is short, printable ASCII without spaces.
fn upstream_id(value: &HeaderValue) -> Option<String> {
    let id = value.to_str().ok()?.trim();
    let acceptable = !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LENGTH
        && id.bytes().all(|b| b.is_ascii_graphic());
    acceptable.then(|| id.to_owned())
}

/// Middleware that ensures every request has a request ID.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(upstream_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", &request_id);

    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", &request_id);
    });

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[test]
    fn test_upstream_id_rules() {
        let ok = HeaderValue::from_static("cf-7d1e2a");
        assert_eq!(upstream_id(&ok).as_deref(), Some("cf-7d1e2a"));

        let spaced = HeaderValue::from_static("two words");
        assert_eq!(upstream_id(&spaced), None);

        let long = HeaderValue::from_str(&"a".repeat(MAX_REQUEST_ID_LENGTH + 1)).expect("header");
        assert_eq!(upstream_id(&long), None);
    }

    #[tokio::test]
    async fn test_echoes_upstream_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "edge-1234")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some("edge-1234")
        );
    }

    #[tokio::test]
    async fn test_generates_uuid_when_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .expect("request id header");
        assert!(Uuid::parse_str(id).is_ok());
    }
}
