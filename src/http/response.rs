//! Responses produced by the toolkit itself.
//!
//! # Responsibilities
//! - Client errors: 404, 405 with `Allow`, 403, 429 with `Retry-After`
//! - The fixed JSON body for unexpected faults
//! - Default rendering of gateway errors (502 / 504)

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::GatewayError;

/// 404 for paths no route or rule matched.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

/// 405 listing the methods registered for the matched path.
pub fn method_not_allowed(allowed: &[Method]) -> Response {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    let mut response = (StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed").into_response();
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

/// 429 with a `Retry-After` rounded up to whole seconds.
pub fn too_many_requests(retry_after: Duration) -> Response {
    let mut secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs = secs.saturating_add(1);
    }
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, secs.to_string())],
        "Too Many Requests",
    )
        .into_response()
}

/// 403 for requests rejected by the heuristic filter.
pub fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

/// JSON 500 body shared by caught panics and handler faults.
pub fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "code": 500, "message": "Internal Server Error" })),
    )
        .into_response()
}

/// Default gateway error handler.
pub fn gateway_error(err: &GatewayError) -> Response {
    let status = err.status();
    let reason = status.canonical_reason().unwrap_or("Gateway Error");
    (status, reason).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_not_allowed_header() {
        let response = method_not_allowed(&[Method::GET, Method::POST]);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = too_many_requests(Duration::from_millis(1500));
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");

        let response = too_many_requests(Duration::ZERO);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = too_many_requests(Duration::from_secs(3600));
        assert_eq!(response.headers()[header::RETRY_AFTER], "3600");

        let response = too_many_requests(Duration::MAX);
        assert_eq!(response.headers()[header::RETRY_AFTER], u64::MAX.to_string());
    }

    #[tokio::test]
    async fn test_internal_error_body() {
        let response = internal_error();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "code": 500, "message": "Internal Server Error" }));
    }

    #[test]
    fn test_gateway_error_status() {
        let response = gateway_error(&GatewayError::Upstream("refused".into()));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = gateway_error(&GatewayError::Timeout(Duration::from_secs(1)));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
