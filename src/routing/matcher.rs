//! Route pattern matching.
//!
//! # Responsibilities
//! - Compile a route pattern into an anchored, case-insensitive regex
//! - Match a request path against the full pattern (never a partial match)
//! - Surface capture groups in group order
//!
//! # Design Decisions
//! - The empty path never matches
//! - Capture 0 is the whole matched path; groups that did not participate
//!   surface as empty strings so indices stay stable

use regex::{Regex, RegexBuilder};

use crate::error::RouteError;

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// Compile a pattern. Anchors are added, so `/a` only matches `/a`.
    pub fn new(pattern: &str) -> Result<Self, RouteError> {
        let regex = RegexBuilder::new(&format!("^(?:{})$", pattern))
            .case_insensitive(true)
            .build()
            .map_err(|source| RouteError {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the captures when the whole path matches.
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        if path.is_empty() {
            return None;
        }

        let caps = self.regex.captures(path)?;
        Some(
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }

    /// Returns true if the whole path matches.
    pub fn is_match(&self, path: &str) -> bool {
        !path.is_empty() && self.regex.is_match(path)
    }
}
