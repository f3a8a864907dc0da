//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → filter.rs (heuristic rejection, 403)
//!     → rate_limit.rs (per-IP token bucket and bans, 429)
//!     → dispatcher or proxy
//! ```
//!
//! # Design Decisions
//! - Both checks are ordinary middlewares; the caller picks the order
//! - Client identity is the forwarded address, which only a trusted
//!   front proxy makes reliable

pub mod filter;
pub mod rate_limit;

pub use filter::{request_filter, RequestFilter, Suspicion};
pub use rate_limit::{rate_limit, Admission, IpRateLimiter, RateLimitSettings};
