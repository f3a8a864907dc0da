//! Handler-transforming middleware.
//!
//! # Data Flow
//! ```text
//! Chain [m1, m2, m3] wrapping base handler h:
//!     m3( m2( m1(h) ) )
//!     request  → m3 → m2 → m1 → h
//!     response ← m3 ← m2 ← m1 ← h
//! ```
//!
//! # Design Decisions
//! - A handler is a boxed, cloneable tower service over axum types
//! - The last registered middleware is the outermost layer
//! - Any `tower::Layer` over `Handler` (including `axum::middleware::from_fn`)
//!   can be registered as a middleware

pub mod logging;
pub mod recovery;

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{body::Body, http::Request, response::Response};
use tower::{service_fn, util::BoxCloneSyncService, Layer, Service};

pub use logging::request_logger;
pub use recovery::recovery;

/// A request handler: any service from request to response that cannot fail.
pub type Handler = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// Box an async function as a `Handler`.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Handler::new(service_fn(move |request| {
        let response = f(request);
        async move { Ok::<_, Infallible>(response.await) }
    }))
}

/// A function turning a handler into a new handler.
#[derive(Clone)]
pub struct Middleware {
    wrap: Arc<dyn Fn(Handler) -> Handler + Send + Sync>,
}

impl Middleware {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(wrap),
        }
    }

    /// Use a tower layer as a middleware.
    pub fn from_layer<L>(layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Request<Body>, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        Self::new(move |inner| Handler::new(layer.layer(inner)))
    }

    /// Wrap a handler.
    pub fn apply(&self, handler: Handler) -> Handler {
        (self.wrap)(handler)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

/// Ordered middleware list, composed once at start-up.
#[derive(Clone, Debug, Default)]
pub struct Chain {
    middlewares: Vec<Middleware>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Wrap `base` in registration order, so the last middleware is outermost.
    pub fn wrap(&self, base: Handler) -> Handler {
        self.middlewares
            .iter()
            .fold(base, |handler, middleware| middleware.apply(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Mutex;
    use tower::ServiceExt;

    type Trail = Arc<Mutex<Vec<String>>>;

    fn tag(name: &'static str, trail: Trail) -> Middleware {
        Middleware::new(move |inner: Handler| {
            let trail = trail.clone();
            handler_fn(move |request| {
                let trail = trail.clone();
                let inner = inner.clone();
                async move {
                    trail.lock().unwrap().push(format!("{name}:in"));
                    let response = inner.oneshot(request).await.unwrap();
                    trail.lock().unwrap().push(format!("{name}:out"));
                    response
                }
            })
        })
    }

    #[tokio::test]
    async fn test_last_registered_is_outermost() {
        let trail: Trail = Arc::default();
        let base_trail = trail.clone();
        let base = handler_fn(move |_request| {
            let trail = base_trail.clone();
            async move {
                trail.lock().unwrap().push("handler".to_string());
                StatusCode::OK.into_response()
            }
        });

        let mut chain = Chain::new();
        chain.push(tag("auth", trail.clone()));
        chain.push(tag("logger", trail.clone()));

        let response = chain
            .wrap(base)
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let trail = trail.lock().unwrap().clone();
        assert_eq!(
            trail,
            vec!["logger:in", "auth:in", "handler", "auth:out", "logger:out"]
        );
    }

    #[tokio::test]
    async fn test_axum_from_fn_as_middleware() {
        async fn deny(
            request: Request<Body>,
            next: axum::middleware::Next,
        ) -> Response {
            if request.headers().contains_key("x-deny") {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            next.run(request).await
        }

        let base = handler_fn(|_request| async { StatusCode::OK.into_response() });
        let handler = Middleware::from_layer(axum::middleware::from_fn(deny)).apply(base);

        let denied = Request::builder()
            .header("x-deny", "1")
            .body(Body::empty())
            .unwrap();
        let response = handler.clone().oneshot(denied).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = handler.oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
