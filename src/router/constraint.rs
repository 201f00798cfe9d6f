use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Include/exclude pattern sets for one matching axis.
///
/// ```yaml
/// reason:
///   include: ["^NodeNotReady"]
///   exclude: ["^Normal.*"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RegexConstraint {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Error)]
#[error("invalid pattern `{pattern}`: {error}")]
pub struct InvalidPattern {
    pub pattern: String,
    #[source]
    pub error: regex::Error,
}

impl RegexConstraint {
    pub fn including<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { include: patterns.into_iter().map(Into::into).collect(), exclude: vec![] }
    }

    pub fn excluding<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_defined(&self) -> bool {
        !self.include.is_empty() || !self.exclude.is_empty()
    }

    /// Undefined constraints pass everything. Otherwise the value must hit no
    /// exclude pattern and, when include patterns exist, at least one of them.
    pub fn allows(&self, value: &str, cache: &RegexCache) -> Result<bool, InvalidPattern> {
        if !self.is_defined() {
            return Ok(true);
        }

        for pattern in self.exclude.iter().filter(|p| !p.is_empty()) {
            if cache.compile(pattern)?.is_match(value) {
                return Ok(false);
            }
        }

        if self.include.is_empty() {
            return Ok(true);
        }
        for pattern in self.include.iter().filter(|p| !p.is_empty()) {
            if cache.compile(pattern)?.is_match(value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Any-of over message lines. No lines at all counts as one empty line.
    pub fn allows_any(&self, lines: &[String], cache: &RegexCache) -> Result<bool, InvalidPattern> {
        if !self.is_defined() {
            return Ok(true);
        }
        if lines.is_empty() {
            return self.allows("", cache);
        }
        for line in lines {
            if self.allows(line, cache)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Compiled patterns shared by every route of a table.
///
/// Only successful compilations are kept, so a broken pattern keeps failing
/// each time it is evaluated.
#[derive(Debug, Clone, Default)]
pub struct RegexCache {
    compiled: Arc<DashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, pattern: &str) -> Result<Regex, InvalidPattern> {
        if let Some(re) = self.compiled.get(pattern) {
            return Ok(re.value().clone());
        }
        let re = Regex::new(pattern).map_err(|error| InvalidPattern {
            pattern: pattern.to_string(),
            error,
        })?;
        self.compiled.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
