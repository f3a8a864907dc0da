//! Per-IP token-bucket rate limiting with temporary bans.
//!
//! # State Machine
//! ```text
//! unseen ──first request──▶ active ──violations > threshold──▶ banned
//!                             ▲                                  │
//!                             └──────────ban expires─────────────┘
//! ```
//!
//! # Design Decisions
//! - Buckets and bans share one `RwLock`; ban lookups take the read lock,
//!   everything that mutates takes the write lock. The lock is never held
//!   across an `.await`.
//! - The consecutive-violation counter lives in the bucket and survives
//!   between requests; any admitted request resets it.
//! - Expired bans are removed lazily on lookup and by a periodic sweep.
//! - Idle buckets are never evicted, so memory grows with distinct clients.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::RateLimitConfig;
use crate::http::middleware::Middleware;
use crate::http::request::{client_ip, peer_addr};
use crate::http::response::too_many_requests;
use crate::observability::metrics;

/// Limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    /// Tokens added per second.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// How long a ban lasts.
    pub ban_duration: Duration,
    /// Consecutive rejections tolerated before a ban.
    pub violation_threshold: u32,
}

impl RateLimitSettings {
    pub fn new(requests_per_second: f64, burst: u32, ban_duration: Duration) -> Self {
        Self {
            requests_per_second,
            burst,
            ban_duration,
            violation_threshold: 5,
        }
    }

    pub fn with_violation_threshold(mut self, threshold: u32) -> Self {
        self.violation_threshold = threshold;
        self
    }
}

impl From<&RateLimitConfig> for RateLimitSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_second,
            config.burst_size,
            Duration::from_secs(config.ban_secs),
        )
        .with_violation_threshold(config.violation_threshold)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// No token available; one refills after `retry_after`.
    Limited { retry_after: Duration },
    /// Every request is rejected until `until`.
    Banned { until: Instant },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    violations: u32,
}

impl Bucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            violations: 0,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn retry_after(&self, refill_rate: f64) -> Duration {
        Duration::try_from_secs_f64(((1.0 - self.tokens) / refill_rate).max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// Fallback ban length when `now + duration` overflows `Instant`.
const MAX_BAN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn ban_expiry(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(MAX_BAN))
        .unwrap_or(now)
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<String, Bucket>,
    bans: HashMap<String, Instant>,
}

/// Concurrent per-IP limiter and ban store.
pub struct IpRateLimiter {
    settings: RateLimitSettings,
    state: RwLock<LimiterState>,
}

impl IpRateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            state: RwLock::new(LimiterState::default()),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, LimiterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LimiterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject one request from `ip`.
    pub fn check(&self, ip: &str) -> Admission {
        self.check_at(ip, Instant::now())
    }

    /// Admit or reject one request from `ip` at `now`.
    pub fn check_at(&self, ip: &str, now: Instant) -> Admission {
        if let Some(&until) = self.read().bans.get(ip) {
            if now < until {
                return Admission::Banned { until };
            }
        }

        let mut guard = self.write();
        let state = &mut *guard;

        // re-check: the ban table may have changed between the two locks
        match state.bans.get(ip).copied() {
            Some(until) if now < until => return Admission::Banned { until },
            Some(_) => {
                state.bans.remove(ip);
                tracing::info!(ip = %ip, "Ban expired");
            }
            None => {}
        }

        let capacity = f64::from(self.settings.burst);
        let rate = self.settings.requests_per_second;
        let bucket = state
            .buckets
            .entry(ip.to_string())
            .or_insert_with(|| Bucket::new(capacity, now));

        if bucket.try_acquire(now, capacity, rate) {
            bucket.violations = 0;
            return Admission::Allowed;
        }

        bucket.violations += 1;
        if bucket.violations > self.settings.violation_threshold {
            bucket.violations = 0;
            let until = ban_expiry(now, self.settings.ban_duration);
            state.bans.insert(ip.to_string(), until);
            tracing::warn!(
                ip = %ip,
                ban_secs = self.settings.ban_duration.as_secs(),
                "Client banned after repeated rate limit violations"
            );
            return Admission::Banned { until };
        }

        tracing::debug!(ip = %ip, violations = bucket.violations, "Rate limit exceeded");
        Admission::Limited {
            retry_after: bucket.retry_after(rate),
        }
    }

    /// Ban `ip` for `duration` starting now.
    pub fn ban(&self, ip: &str, duration: Duration) {
        let until = ban_expiry(Instant::now(), duration);
        self.write().bans.insert(ip.to_string(), until);
        tracing::warn!(ip = %ip, ban_secs = duration.as_secs(), "Client banned");
    }

    pub fn is_banned(&self, ip: &str) -> bool {
        let now = Instant::now();
        self.read().bans.get(ip).is_some_and(|&until| now < until)
    }

    /// Remove bans that have expired; returns how many were removed.
    pub fn purge_expired_bans(&self) -> usize {
        self.purge_expired_bans_at(Instant::now())
    }

    pub fn purge_expired_bans_at(&self, now: Instant) -> usize {
        let mut state = self.write();
        let before = state.bans.len();
        state.bans.retain(|_, until| now < *until);
        before - state.bans.len()
    }

    /// Number of IPs with a token bucket.
    pub fn tracked_clients(&self) -> usize {
        self.read().buckets.len()
    }

    /// Number of ban records, expired or not, still in the table.
    pub fn ban_records(&self) -> usize {
        self.read().bans.len()
    }

    /// Run the expired-ban sweep every `interval` until shutdown.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Ban sweep starting");
            let mut ticker = time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.purge_expired_bans();
                        if removed > 0 {
                            tracing::debug!(removed, "Expired bans removed");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Ban sweep received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

/// Middleware rejecting limited and banned clients with 429.
pub fn rate_limit(limiter: Arc<IpRateLimiter>) -> Middleware {
    Middleware::from_layer(axum::middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ))
}

/// Middleware function for per-IP rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<IpRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(request.headers(), peer_addr(request.extensions())) else {
        tracing::debug!("No client address, skipping rate limit");
        return next.run(request).await;
    };

    match limiter.check(&ip) {
        Admission::Allowed => next.run(request).await,
        Admission::Limited { retry_after } => {
            metrics::record_rate_limited("limited");
            too_many_requests(retry_after)
        }
        Admission::Banned { until } => {
            metrics::record_rate_limited("banned");
            too_many_requests(until.saturating_duration_since(Instant::now()))
        }
    }
}
