//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, rates and intervals
//! - Validate proxy rules before the registry normalizes them
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// Slowest accepted refill rate: one token every ~17 minutes.
const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Longest accepted ban: ten years.
const MAX_BAN_SECS: u64 = 10 * 365 * 24 * 60 * 60;
use crate::routing::prefix::{check_target, normalize_target};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    for (i, rule) in config.proxy.rules.iter().enumerate() {
        if let Err(reason) = check_target(&normalize_target(&rule.target)) {
            errors.push(ValidationError::new(
                format!("proxy.rules[{i}].target"),
                format!("rule for '{}': {reason}", rule.prefix.trim()),
            ));
        }
    }

    let limit = &config.rate_limit;
    if limit.enabled {
        if !(limit.requests_per_second.is_finite()
            && limit.requests_per_second >= MIN_REQUESTS_PER_SECOND)
        {
            errors.push(ValidationError::new(
                "rate_limit.requests_per_second",
                format!("must be a finite number of at least {MIN_REQUESTS_PER_SECOND}"),
            ));
        }
        if limit.burst_size == 0 {
            errors.push(ValidationError::new("rate_limit.burst_size", "must be at least 1"));
        }
        if limit.ban_secs > MAX_BAN_SECS {
            errors.push(ValidationError::new(
                "rate_limit.ban_secs",
                format!("must be at most {MAX_BAN_SECS}"),
            ));
        }
        if limit.cleanup_interval_secs == 0 {
            errors.push(ValidationError::new(
                "rate_limit.cleanup_interval_secs",
                "must be at least 1",
            ));
        }
    }

    if config.filter.enabled && config.filter.max_body_bytes == 0 {
        errors.push(ValidationError::new("filter.max_body_bytes", "must be at least 1"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
