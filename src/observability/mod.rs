//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → tower_http TraceLayer (span with request id)
//!     → request_logger middleware → EventRecorder (one RequestEvent)
//!     → metrics.rs (counters, histograms, gauges)
//!
//! Consumers:
//!     → stdout (plain or JSON, filtered by RUST_LOG)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - No global logger object: the recorder is injected where it is used
//! - Metric updates are fire-and-forget; without an installed exporter they are no-ops

pub mod logging;
pub mod metrics;

pub use logging::{EventRecorder, RequestEvent, TracingRecorder};
