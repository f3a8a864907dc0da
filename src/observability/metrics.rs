//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests by method, status
//! - `switchyard_request_duration_seconds` (histogram): latency distribution
//! - `switchyard_rate_limited_total` (counter): rejections by reason
//! - `switchyard_upstream_errors_total` (counter): gateway failures by kind
//! - `switchyard_tunnels_active` (gauge): open websocket tunnels

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint. Must run inside the tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("switchyard_requests_total", &labels).increment(1);
    metrics::histogram!("switchyard_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

/// `reason` is `limited` or `banned`.
pub fn record_rate_limited(reason: &'static str) {
    metrics::counter!("switchyard_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("switchyard_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn tunnel_opened() {
    metrics::gauge!("switchyard_tunnels_active").increment(1.0);
}

pub fn tunnel_closed() {
    metrics::gauge!("switchyard_tunnels_active").decrement(1.0);
}
