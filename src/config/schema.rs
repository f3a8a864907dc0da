//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration that serves an empty proxy table on `0.0.0.0:8080`.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Reverse-proxy rules.
    pub proxy: ProxyConfig,

    /// Per-IP rate limiting and banning.
    pub rate_limit: RateLimitConfig,

    /// Heuristic request filter.
    pub filter: FilterConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Reverse-proxy section.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Rules in registration order. `PROXY_RULE_*` variables are appended.
    pub rules: Vec<ProxyRuleConfig>,
}

/// One `[[proxy.rules]]` entry, before normalization.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProxyRuleConfig {
    /// Path prefix (e.g., "/s1/").
    pub prefix: String,

    /// Backend target (e.g., "http://localhost:8081").
    pub target: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Token refill rate per IP.
    pub requests_per_second: f64,

    /// Bucket capacity.
    pub burst_size: u32,

    /// How long a ban lasts, in seconds.
    pub ban_secs: u64,

    /// Consecutive rejections tolerated before a ban.
    pub violation_threshold: u32,

    /// Interval of the expired-ban sweep, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 6.0,
            burst_size: 10,
            ban_secs: 3600,
            violation_threshold: 5,
            cleanup_interval_secs: 300,
        }
    }
}

/// Heuristic request filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Enable the filter.
    pub enabled: bool,

    /// Largest accepted `Content-Length`.
    pub max_body_bytes: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Timeout configuration. A value of 0 disables the timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole request timeout at the server, in seconds.
    pub request_secs: u64,

    /// Backend connection establishment timeout, in seconds.
    pub connect_secs: u64,

    /// Backend response timeout (until headers arrive), in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_secs: 5,
            upstream_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit JSON log lines instead of plain text.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
