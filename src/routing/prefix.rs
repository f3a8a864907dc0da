//! Path-prefix registry for the reverse proxy.
//!
//! # Responsibilities
//! - Normalize (prefix, target) pairs from configuration
//! - Select the rule for a request path (longest prefix wins)
//! - Strip the matched prefix from the forwarded path
//!
//! # Design Decisions
//! - Rules are kept in a `Vec` sorted by descending prefix length; the sort
//!   is stable so equal prefixes keep registration order
//! - Normalization is idempotent
//! - Built once at start-up, immutable afterwards

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ConfigError, ProxyRuleConfig};

/// Schemes accepted on a target without rewriting.
const KNOWN_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// A normalized mapping from a path prefix to a backend target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    prefix: String,
    target: String,
}

impl PrefixRule {
    /// Normalize and validate a raw (prefix, target) pair.
    pub fn new(prefix: &str, target: &str) -> Result<Self, ConfigError> {
        let target = normalize_target(target);
        if let Err(reason) = check_target(&target) {
            return Err(ConfigError::InvalidRule {
                name: prefix.trim().to_string(),
                reason,
            });
        }

        Ok(Self {
            prefix: normalize_prefix(prefix),
            target,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns true if the rule applies to the path.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Remove the prefix from a request path, keeping a leading `/`.
    pub fn strip(&self, path: &str) -> String {
        let rest = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }
}

/// Trim whitespace and make sure the prefix starts and ends with `/`.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut prefix = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with('/') {
        prefix.push('/');
    }
    prefix.push_str(trimmed);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

/// Trim whitespace, default the scheme to `http://` and drop trailing slashes.
pub fn normalize_target(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let has_scheme = trimmed
        .split_once("://")
        .is_some_and(|(scheme, _)| KNOWN_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)));

    let target = if has_scheme {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    match target.trim_end_matches('/') {
        // keep "http://" intact so validation can report it
        stripped if stripped.ends_with(':') => target,
        stripped => stripped.to_string(),
    }
}

/// Check that a normalized target parses as a URL with a host.
pub fn check_target(target: &str) -> Result<(), String> {
    if target.is_empty() || target.ends_with("://") {
        return Err("target host is missing".to_string());
    }
    let url = Url::parse(target).map_err(|e| format!("invalid target URL '{target}': {e}"))?;
    if !url.has_host() {
        return Err(format!("target URL '{target}' has no host"));
    }
    Ok(())
}

/// Split a `<prefix>><target>` rule value.
pub fn parse_rule(value: &str) -> Option<(&str, &str)> {
    let (prefix, target) = value.split_once('>')?;
    if target.trim().is_empty() {
        return None;
    }
    Some((prefix, target))
}

/// Ordered, immutable set of prefix rules.
#[derive(Debug, Clone, Default)]
pub struct ProxyRegistry {
    rules: Vec<PrefixRule>,
}

impl ProxyRegistry {
    /// Build a registry from an explicit (prefix, target) mapping.
    ///
    /// Iteration order of `rules` is the registration order used for ties.
    pub fn from_rules<I, P, T>(rules: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (P, T)>,
        P: AsRef<str>,
        T: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for (prefix, target) in rules {
            let rule = PrefixRule::new(prefix.as_ref(), target.as_ref())?;
            if normalized.iter().any(|r: &PrefixRule| r.prefix == rule.prefix) {
                tracing::warn!(
                    prefix = %rule.prefix,
                    target = %rule.target,
                    "Duplicate proxy prefix, earlier rule takes precedence"
                );
            }
            normalized.push(rule);
        }

        // stable: equal lengths keep registration order
        normalized.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        for rule in &normalized {
            tracing::info!(prefix = %rule.prefix, target = %rule.target, "Proxy rule registered");
        }

        Ok(Self { rules: normalized })
    }

    /// Build a registry from configuration entries.
    pub fn from_config(rules: &[ProxyRuleConfig]) -> Result<Self, ConfigError> {
        Self::from_rules(rules.iter().map(|r| (r.prefix.as_str(), r.target.as_str())))
    }

    /// Select the longest registered prefix of `path`.
    pub fn lookup(&self, path: &str) -> Option<&PrefixRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Rules in lookup order (longest prefix first).
    pub fn rules(&self) -> &[PrefixRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
