//! switchyard: pattern routing, path-prefix reverse proxying with websocket
//! tunnels, and per-IP rate limiting for axum services.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use error::{AuthError, Fault, GatewayError};
pub use http::{Gateway, Handler, HttpServer, Middleware};
pub use lifecycle::Shutdown;
pub use routing::{Dispatcher, ProxyRegistry, Router};
