//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Local dispatch:
//!     pattern strings
//!     → matcher.rs (compile to anchored regex + parameter table)
//!     → router.rs (ordered route table, frozen into a Dispatcher)
//!     → first route matching path and method, else 405 / 404
//!
//! Reverse proxy:
//!     PROXY_RULE_* / [[proxy.rules]]
//!     → prefix.rs (normalize, sort by prefix length)
//!     → longest matching prefix, else 404
//! ```
//!
//! # Design Decisions
//! - Both tables are built at startup and immutable at runtime
//! - Deterministic: same input always selects the same route or rule
//! - First registered route wins; longest prefix wins

pub mod matcher;
pub mod prefix;
pub mod router;

pub use matcher::{PathPattern, PatternError};
pub use prefix::{PrefixRule, ProxyRegistry};
pub use router::{Dispatcher, Route, Router};
