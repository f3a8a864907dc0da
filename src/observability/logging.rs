//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber (plain or JSON)
//! - Define the per-request event handed to recorders
//! - Provide the default recorder, which writes events through `tracing`
//!
//! # Design Decisions
//! - Log level comes from `RUST_LOG`, falling back to a crate-level default
//! - Recorders are a narrow trait so tests and embedders can capture events

use std::time::Duration;

use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

const DEFAULT_FILTER: &str = "switchyard=debug,tower_http=debug";

/// Install the global subscriber. Call once, from `main`.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let json = config.log_json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// One completed request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub method: String,
    pub path: String,
    pub status: u16,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
}

fn as_millis<S: serde::Serializer>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(latency.as_secs_f64() * 1000.0)
}

/// Sink for request events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: &RequestEvent);
}

/// Writes each event as an `info` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: &RequestEvent) {
        tracing::info!(
            method = %event.method,
            path = %event.path,
            status = event.status,
            latency_ms = event.latency.as_secs_f64() * 1000.0,
            client_ip = event.client_ip.as_deref().unwrap_or("-"),
            request_id = event.request_id.as_deref().unwrap_or("-"),
            "Request completed"
        );
    }
}
