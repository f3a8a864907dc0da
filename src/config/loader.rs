//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, ProxyRuleConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::prefix::parse_rule;

/// Environment variables with this prefix declare proxy rules.
pub const PROXY_RULE_PREFIX: &str = "PROXY_RULE_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid proxy rule {name}: {reason}")]
    InvalidRule { name: String, reason: String },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load the optional file, append `PROXY_RULE_*` rules, then validate.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => GatewayConfig::default(),
    };
    config.proxy.rules.extend(rules_from_env()?);

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Proxy rules declared in the process environment.
pub fn rules_from_env() -> Result<Vec<ProxyRuleConfig>, ConfigError> {
    rules_from_vars(std::env::vars())
}

/// Proxy rules from `PROXY_RULE_<NAME>=<prefix>><target>` pairs, ordered by
/// variable name.
pub fn rules_from_vars<I>(vars: I) -> Result<Vec<ProxyRuleConfig>, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars: Vec<_> = vars
        .into_iter()
        .filter(|(name, _)| name.starts_with(PROXY_RULE_PREFIX))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));

    vars.into_iter()
        .map(|(name, value)| match parse_rule(&value) {
            Some((prefix, target)) => Ok(ProxyRuleConfig {
                prefix: prefix.trim().to_string(),
                target: target.trim().to_string(),
            }),
            None => Err(ConfigError::InvalidRule {
                name,
                reason: format!("expected '<prefix>><target>', got '{value}'"),
            }),
        })
        .collect()
}
