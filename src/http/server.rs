//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap a `Handler` in the per-request layers (request id, trace span,
//!   optional timeout, panic recovery)
//! - Serve it on a listener with peer addresses recorded
//! - Stop accepting and drain on the shutdown broadcast

use std::net::SocketAddr;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::TimeoutConfig;
use crate::http::middleware::{recovery, Handler};
use crate::http::request::X_REQUEST_ID;

/// HTTP server for a single handler.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Serve `handler` for every path and method.
    pub fn new(handler: Handler, timeouts: &TimeoutConfig) -> Self {
        Self {
            router: Self::build_router(handler, timeouts),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(handler: Handler, timeouts: &TimeoutConfig) -> Router {
        let mut router = Router::new().fallback_service(recovery().apply(handler));

        if timeouts.request_secs > 0 {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(timeouts.request_secs)));
        }

        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for embedding or in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
