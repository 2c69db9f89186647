//! Access Control Matcher
//!
//! An ordered, immutable table of `(method, path pattern) -> requirement`
//! rules. The first matching rule decides; requests no rule matches need an
//! authenticated identity.
//!
//! Path patterns are `/`-separated segments where `{name}` matches exactly one
//! non-empty segment and a trailing `**` matches any remainder.

use crate::auth::models::{Authority, Identity};
use axum::http::Method;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Public,
    Authenticated,
    /// Identity must hold at least one of these authorities.
    AnyOf(Vec<Authority>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthorized,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid method {0:?}")]
    Method(String),
    #[error("invalid path pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: &'static str },
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse rule file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    fn from_segments(segments: Vec<Segment>) -> Self {
        let mut raw = String::new();
        for segment in &segments {
            raw.push('/');
            raw.push_str(match segment {
                Segment::Literal(lit) => lit.as_str(),
                Segment::Param => "{param}",
                Segment::Rest => "**",
            });
        }
        if raw.is_empty() {
            raw.push('/');
        }
        Self { raw, segments }
    }

    pub fn parse(pattern: &str) -> Result<Self, RuleError> {
        let invalid = |reason| RuleError::Pattern {
            pattern: pattern.to_string(),
            reason,
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let parts: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "**" {
                if i + 1 != parts.len() {
                    return Err(invalid("'**' is only allowed as the last segment"));
                }
                Segment::Rest
            } else if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                Segment::Param
            } else if part.contains(&['{', '}', '*'][..]) {
                return Err(invalid("segment mixes literal text and wildcards"));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    /// `None` matches every method.
    method: Option<Method>,
    pattern: PathPattern,
    requirement: Requirement,
}

impl AccessRule {
    /// Build a rule; `method` is an HTTP verb or `*`.
    pub fn new(method: &str, pattern: &str, requirement: Requirement) -> Result<Self, RuleError> {
        let method = match method.trim() {
            "*" => None,
            verb => Some(
                Method::from_bytes(verb.to_ascii_uppercase().as_bytes())
                    .map_err(|_| RuleError::Method(verb.to_string()))?,
            ),
        };

        Ok(Self {
            method,
            pattern: PathPattern::parse(pattern)?,
            requirement,
        })
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        let method_matches = match &self.method {
            None => true,
            // axum answers HEAD with the GET handler
            Some(m) => m == method || (*m == Method::GET && *method == Method::HEAD),
        };
        method_matches && self.pattern.matches(path)
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    method: String,
    path: String,
    requirement: Requirement,
}

/// Rule table shared read-only by every request.
#[derive(Debug, Clone)]
pub struct AccessRules {
    rules: Vec<AccessRule>,
}

impl AccessRules {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Rules for the `/users` resource. Assembled from typed parts, so every
    /// entry is present without a parse step.
    pub fn default_rules() -> Self {
        use Requirement::*;
        use Segment::{Literal, Param};

        let lit = |s: &str| Literal(s.to_string());
        let admin_only = || AnyOf(vec![Authority::Admin]);

        let table = [
            (None, vec![lit("health")], Public),
            (Some(Method::GET), vec![lit("users")], Public),
            (Some(Method::GET), vec![lit("users"), lit("page"), Param], Public),
            (
                Some(Method::GET),
                vec![lit("users"), Param],
                AnyOf(vec![Authority::User, Authority::Admin]),
            ),
            (Some(Method::POST), vec![lit("users")], admin_only()),
            (Some(Method::PUT), vec![lit("users"), Param], admin_only()),
            (Some(Method::DELETE), vec![lit("users"), Param], admin_only()),
        ];

        let rules = table
            .into_iter()
            .map(|(method, segments, requirement)| AccessRule {
                method,
                pattern: PathPattern::from_segments(segments),
                requirement,
            })
            .collect();

        Self { rules }
    }

    /// Parse a TOML table of `[[rule]]` entries.
    pub fn from_toml(source: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(source)?;
        let rules = file
            .rules
            .into_iter()
            .map(|entry| AccessRule::new(&entry.method, &entry.path, entry.requirement))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Requirement of the first matching rule, or `Authenticated`.
    pub fn requirement_for(&self, method: &Method, path: &str) -> &Requirement {
        const DEFAULT: &Requirement = &Requirement::Authenticated;

        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(AccessRule::requirement)
            .unwrap_or(DEFAULT)
    }

    pub fn authorize(&self, method: &Method, path: &str, identity: Option<&Identity>) -> Decision {
        match (self.requirement_for(method, path), identity) {
            (Requirement::Public, _) => Decision::Allow,
            (_, None) => Decision::Deny(Denial::Unauthorized),
            (Requirement::Authenticated, Some(_)) => Decision::Allow,
            (Requirement::AnyOf(accepted), Some(identity)) => {
                if identity.has_any(accepted) {
                    Decision::Allow
                } else {
                    Decision::Deny(Denial::Forbidden)
                }
            }
        }
    }
}

impl Default for AccessRules {
    fn default() -> Self {
        Self::default_rules()
    }
}
