//! Workspace path normalization, permission policy, and glob matching.

use glob::{MatchOptions, Pattern, PatternError};
use thiserror::Error;

/// Why a path was rejected by the permission policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("path '{path}' is protected (prefix '{prefix}')")]
    Protected { path: String, prefix: String },
    #[error("path '{path}' is not in allowed paths [{}]", .allowed.join(", "))]
    NotAllowed { path: String, allowed: Vec<String> },
}

/// Syntactically invalid workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path '{path}': {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: &'static str,
}

/// Normalize a workspace-relative path.
///
/// Leading `./`, repeated separators, and `.` components are dropped. Backslashes
/// are treated as separators. Absolute paths and `..` components are rejected so
/// a normalized path can never escape the workspace root.
pub fn normalize(path: &str) -> Result<String, InvalidPath> {
    let invalid = |reason| InvalidPath {
        path: path.to_string(),
        reason,
    };
    let unified = path.trim().replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(invalid("parent traversal is not allowed")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(parts.join("/"))
}

/// Prefix-based write policy.
///
/// `protected` prefixes always deny. An empty `allowed` list means every
/// non-protected path may be written; otherwise the path must start with one
/// of the allowed prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPolicy {
    pub allowed: Vec<String>,
    pub protected: Vec<String>,
}

impl PathPolicy {
    pub fn new(allowed: Vec<String>, protected: Vec<String>) -> Self {
        Self { allowed, protected }
    }

    /// Unrestricted policy.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn check(&self, path: &str) -> Result<(), Denial> {
        if let Some(prefix) = self.protected.iter().find(|p| path.starts_with(p.as_str())) {
            return Err(Denial::Protected {
                path: path.to_string(),
                prefix: prefix.clone(),
            });
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Denial::NotAllowed {
                path: path.to_string(),
                allowed: self.allowed.clone(),
            });
        }
        Ok(())
    }
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile a glob for matching workspace paths.
///
/// `*` and `?` never cross a `/`; `**` as a whole component matches any
/// number of directories, including none.
pub fn glob_pattern(pattern: &str) -> Result<Pattern, PatternError> {
    Pattern::new(pattern)
}

/// Match one normalized path against a compiled glob.
pub fn glob_matches(pattern: &Pattern, path: &str) -> bool {
    pattern.matches_with(path, GLOB_OPTIONS)
}

/// Match a single path against a glob. Patterns that fail to compile match nothing.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    glob_pattern(pattern).is_ok_and(|p| glob_matches(&p, path))
}
