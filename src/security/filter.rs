//! Heuristic request filter.
//!
//! Rejects requests that look like scanner traffic or carry injection-like
//! strings in the path or query. This is noise reduction only: a URL-encoded
//! payload walks straight past it.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::config::FilterConfig;
use crate::http::middleware::Middleware;
use crate::http::response::forbidden;

const SCANNER_AGENTS: [&str; 6] = ["nikto", "sqlmap", "nmap", "dirbuster", "nessus", "hydra"];

const SQL_PATTERNS: [&str; 8] = [
    "union select",
    "order by",
    "group by",
    "1=1",
    "or 1=1",
    "--",
    ";--",
    "/*",
];

const XSS_PATTERNS: [&str; 5] = ["<script>", "javascript:", "onerror=", "onload=", "eval("];

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suspicion {
    BodyTooLarge(u64),
    ScannerAgent(&'static str),
    SqlPattern(&'static str),
    XssPattern(&'static str),
}

impl std::fmt::Display for Suspicion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suspicion::BodyTooLarge(len) => write!(f, "declared body of {len} bytes"),
            Suspicion::ScannerAgent(agent) => write!(f, "scanner user agent '{agent}'"),
            Suspicion::SqlPattern(p) => write!(f, "sql-like pattern '{p}'"),
            Suspicion::XssPattern(p) => write!(f, "xss-like pattern '{p}'"),
        }
    }
}

/// Substring checks over request metadata. The body itself is never read.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    max_body_bytes: u64,
}

impl RequestFilter {
    pub fn new(max_body_bytes: u64) -> Self {
        Self { max_body_bytes }
    }

    /// First reason to reject the request, if any.
    pub fn inspect<B>(&self, request: &Request<B>) -> Option<Suspicion> {
        let declared = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(len) = declared.filter(|&len| len > self.max_body_bytes) {
            return Some(Suspicion::BodyTooLarge(len));
        }

        if let Some(agent) = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
        {
            let agent = agent.to_ascii_lowercase();
            if let Some(name) = SCANNER_AGENTS.iter().find(|name| agent.contains(*name)) {
                return Some(Suspicion::ScannerAgent(name));
            }
        }

        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_lowercase();
        if let Some(p) = SQL_PATTERNS.iter().find(|p| target.contains(*p)) {
            return Some(Suspicion::SqlPattern(p));
        }
        if let Some(p) = XSS_PATTERNS.iter().find(|p| target.contains(*p)) {
            return Some(Suspicion::XssPattern(p));
        }

        None
    }
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default().max_body_bytes)
    }
}

impl From<&FilterConfig> for RequestFilter {
    fn from(config: &FilterConfig) -> Self {
        Self::new(config.max_body_bytes)
    }
}

/// Middleware rejecting suspicious requests with 403.
pub fn request_filter(filter: Arc<RequestFilter>) -> Middleware {
    Middleware::from_layer(axum::middleware::from_fn_with_state(
        filter,
        request_filter_middleware,
    ))
}

pub async fn request_filter_middleware(
    State(filter): State<Arc<RequestFilter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match filter.inspect(&request) {
        Some(reason) => {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                reason = %reason,
                "Suspicious request rejected"
            );
            forbidden()
        }
        None => next.run(request).await,
    }
}
