//! Per-request fault boundary.
//!
//! A panic raised while a handler runs is caught here, logged, and turned
//! into the JSON 500 body. The panic never reaches the connection task, so
//! the server keeps serving other requests.

use std::any::Any;

use axum::{body::Body, response::Response};
use tower::{Layer, ServiceExt};
use tower_http::catch_panic::CatchPanicLayer;

use crate::http::middleware::{Handler, Middleware};
use crate::http::response::internal_error;

/// Middleware containing panics raised by the wrapped handler.
pub fn recovery() -> Middleware {
    Middleware::new(|inner: Handler| {
        Handler::new(
            CatchPanicLayer::custom(panic_response)
                .layer(inner)
                .map_response(|response| response.map(Body::new)),
        )
    })
}

/// Runs inside the request's trace span, which carries method and URI.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(
        panic = %panic_message(panic.as_ref()),
        "Recovered from handler panic"
    );
    internal_error()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{Request, StatusCode},
        response::IntoResponse,
    };

    use crate::http::middleware::handler_fn;

    #[tokio::test]
    async fn test_panic_becomes_json_500() {
        let handler = recovery().apply(handler_fn(|request: Request<Body>| async move {
            if request.uri().path() == "/boom" {
                panic!("handler exploded");
            }
            StatusCode::OK.into_response()
        }));

        let boom = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let response = handler.clone().oneshot(boom).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], 500);
        assert_eq!(body["message"], "Internal Server Error");

        // the same handler keeps serving
        let ok = Request::builder().uri("/fine").body(Body::empty()).unwrap();
        let response = handler.oneshot(ok).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
