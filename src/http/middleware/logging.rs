//! Request logging middleware.

use std::sync::Arc;
use std::time::Instant;

use tower::ServiceExt;

use crate::http::middleware::{handler_fn, Handler, Middleware};
use crate::http::request::{client_ip, peer_addr, X_REQUEST_ID};
use crate::observability::{metrics, EventRecorder, RequestEvent};

/// Emit one `RequestEvent` per request once the response is ready.
///
/// Register it last to measure the time spent in every other middleware.
pub fn request_logger(recorder: Arc<dyn EventRecorder>) -> Middleware {
    Middleware::new(move |inner: Handler| {
        let recorder = recorder.clone();
        handler_fn(move |request| {
            let inner = inner.clone();
            let recorder = recorder.clone();
            async move {
                let start = Instant::now();
                let method = request.method().to_string();
                let path = request.uri().path().to_string();
                let client_ip = client_ip(request.headers(), peer_addr(request.extensions()));
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let response = match inner.oneshot(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };

                let status = response.status().as_u16();
                metrics::record_request(&method, status, start);
                recorder.record(&RequestEvent {
                    method,
                    path,
                    status,
                    latency: start.elapsed(),
                    client_ip,
                    request_id,
                });
                response
            }
        })
    })
}
