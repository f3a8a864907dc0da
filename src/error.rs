//! Error types shared across the toolkit.
//!
//! # Taxonomy
//! - [`GatewayError`]: backend unreachable, bad target, dial failure. Turned
//!   into a 5xx response at the forwarding boundary, never propagated.
//! - [`AuthError`]: missing or malformed `Authorization` credentials (401).
//! - [`Fault`]: an unexpected failure inside a handler. Rendered as the
//!   fixed JSON 500 body by the recovery boundary.
//!
//! Configuration errors live in [`crate::config::ConfigError`] and pattern
//! errors in [`crate::routing::PatternError`]; both abort start-up.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::http::response::internal_error;

/// Failure while forwarding a request or opening a tunnel.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configured target could not be turned into a backend URL.
    #[error("invalid target URL {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// The backend could not be reached or returned a broken response.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The backend did not answer within the configured deadline.
    #[error("upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The websocket handshake with the backend failed.
    #[error("websocket dial to {target} failed: {reason}")]
    Dial { target: String, reason: String },
}

impl GatewayError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidTarget { .. } => "invalid_target",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Dial { .. } => "dial",
        }
    }
}

/// Failure extracting credentials from the `Authorization` header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0} Authorization token is missing")]
    Missing(&'static str),

    #[error("{0} Authorization token is malformed")]
    Malformed(&'static str),

    #[error("{0} Authorization token is not valid base64")]
    InvalidEncoding(&'static str),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let scheme = match &self {
            AuthError::Missing(s) | AuthError::Malformed(s) | AuthError::InvalidEncoding(s) => *s,
        };
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, scheme)],
            self.to_string(),
        )
            .into_response()
    }
}

/// An unexpected failure raised by a handler.
///
/// Handlers return `Result<T, Fault>`; the fault is logged and the client
/// receives the same JSON 500 body a caught panic would produce.
///
/// `Fault` does not implement `std::error::Error`; the blanket `From` impl
/// below depends on that.
#[derive(Debug)]
pub struct Fault(String);

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl<E> From<E> for Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self(err.to_string())
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        tracing::error!(fault = %self.0, "Handler fault");
        internal_error()
    }
}
