//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, trace span, timeout, panic recovery)
//!     → middleware/ (caller-registered chain, last registered outermost)
//!     → routing::Dispatcher (local handlers)
//!       or forward.rs (reverse proxy) → websocket.rs (upgrades)
//!     → response.rs (toolkit-generated responses)
//! ```

pub mod forward;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::Gateway;
pub use middleware::{handler_fn, Chain, Handler, Middleware};
pub use request::{BasicCredentials, BearerToken, PathParams};
pub use server::HttpServer;
