//! Route pattern compilation.
//!
//! # Syntax
//! - Literal text is matched as-is (regex metacharacters are escaped)
//! - `{name}` matches one path segment (`[^/]+`)
//! - `{name(regex)}` matches the given regex instead
//!
//! # Design Decisions
//! - The compiled matcher is anchored at both ends
//! - Each placeholder becomes the named group `p<index>`, so a user regex may
//!   carry its own groups without shifting parameter positions
//! - Parameter names map to their position in capture order

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

/// Regex used by `{name}` placeholders without an explicit pattern.
const DEFAULT_SEGMENT: &str = "[^/]+";

/// Error raised while compiling a route pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("malformed placeholder at byte {position} in {pattern:?}")]
    Malformed { pattern: String, position: usize },

    #[error("empty parameter name in {0:?}")]
    EmptyName(String),

    #[error("duplicate parameter {name:?} in {pattern:?}")]
    DuplicateName { pattern: String, name: String },

    #[error("invalid regex in {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    /// Capture group index for each parameter, in pattern order.
    slots: Vec<usize>,
    names: Arc<HashMap<String, usize>>,
}

impl PathPattern {
    /// Compile a pattern such as `/users/{id}/{action(start|stop)}`.
    ///
    /// A pattern that does not start with `/` gets one prepended.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let source = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{pattern}")
        };

        let mut expr = String::with_capacity(source.len() + 16);
        expr.push('^');
        let mut ordered: Vec<String> = Vec::new();
        let mut cursor = 0;

        while let Some(found) = source[cursor..].find('{') {
            let open = cursor + found;
            expr.push_str(&regex::escape(&source[cursor..open]));

            let placeholder = parse_placeholder(&source[open + 1..]).ok_or_else(|| {
                PatternError::Malformed {
                    pattern: source.clone(),
                    position: open,
                }
            })?;

            if placeholder.name.is_empty() {
                return Err(PatternError::EmptyName(source.clone()));
            }
            if ordered.iter().any(|n| n == placeholder.name) {
                return Err(PatternError::DuplicateName {
                    pattern: source.clone(),
                    name: placeholder.name.to_string(),
                });
            }

            let inner = placeholder.regex.unwrap_or(DEFAULT_SEGMENT);
            expr.push_str(&format!("(?P<p{}>{})", ordered.len(), inner));
            ordered.push(placeholder.name.to_string());
            cursor = open + 1 + placeholder.consumed;
        }
        expr.push_str(&regex::escape(&source[cursor..]));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| PatternError::InvalidRegex {
            pattern: source.clone(),
            reason: e.to_string(),
        })?;

        let slots = (0..ordered.len())
            .map(|i| {
                let group = format!("p{i}");
                regex
                    .capture_names()
                    .position(|name| name == Some(group.as_str()))
                    .unwrap_or_default()
            })
            .collect();

        let names = ordered
            .into_iter()
            .enumerate()
            .map(|(index, name)| (name, index))
            .collect();

        Ok(Self {
            source,
            regex,
            slots,
            names: Arc::new(names),
        })
    }

    /// The pattern as registered (with the leading `/` restored).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Name to positional index table.
    pub fn names(&self) -> &Arc<HashMap<String, usize>> {
        &self.names
    }

    /// Number of parameters in the pattern.
    pub fn param_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the whole path matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match the path and return the captured values in pattern order.
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.slots
                .iter()
                .map(|&slot| {
                    caps.get(slot)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                })
                .collect(),
        )
    }
}

struct Placeholder<'a> {
    name: &'a str,
    regex: Option<&'a str>,
    /// Bytes consumed after the opening `{`, including the closing `}`.
    consumed: usize,
}

/// Parse the body of a placeholder, starting right after `{`.
fn parse_placeholder(input: &str) -> Option<Placeholder<'_>> {
    let stop = input.find(['(', '}', '{', '/'])?;
    let name = &input[..stop];

    match input.as_bytes()[stop] {
        b'}' => Some(Placeholder {
            name,
            regex: None,
            consumed: stop + 1,
        }),
        b'(' => {
            let body = &input[stop + 1..];
            let mut depth = 1usize;
            let mut escaped = false;
            for (i, c) in body.char_indices() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match c {
                    '\\' => escaped = true,
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            // the group must be followed directly by the closing brace
                            if body[i + 1..].starts_with('}') {
                                return Some(Placeholder {
                                    name,
                                    regex: Some(&body[..i]),
                                    consumed: stop + 1 + i + 2,
                                });
                            }
                            return None;
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}
