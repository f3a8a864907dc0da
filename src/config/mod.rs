//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     + PROXY_RULE_* environment variables (sorted by name, appended)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → passed by reference to the subsystems at start-up
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, load_config, rules_from_env, rules_from_vars, ConfigError};
pub use schema::{
    FilterConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    ProxyRuleConfig, RateLimitConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
