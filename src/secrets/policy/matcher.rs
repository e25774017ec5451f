//! Match predicates for policy rules.
//!
//! Each predicate is an exact string, a glob, or a `/regex/`. Exact
//! strings are globs without metacharacters, so globs cover both. Compiled
//! matchers are cached per policy instance.

use globset::{Glob, GlobMatcher};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::secrets::types::Secret;

/// Tri-state result of applying a rule's predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchStatus {
    /// The rule does not apply.
    Miss,
    /// Every specified predicate matched.
    Yes,
    /// A specified predicate failed to match.
    No,
}

enum Compiled {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Compiled {
    fn matches(&self, against: &str) -> bool {
        match self {
            Compiled::Glob(g) => g.is_match(against),
            Compiled::Regex(r) => r.is_match(against),
        }
    }
}

/// Compile a pattern: `/…/` is a regular expression, anything else a glob.
fn compile(pattern: &str) -> Result<Compiled, String> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let re = Regex::new(&pattern[1..pattern.len() - 1]).map_err(|e| e.to_string())?;
        return Ok(Compiled::Regex(re));
    }
    let glob = Glob::new(pattern).map_err(|e| e.to_string())?;
    Ok(Compiled::Glob(glob.compile_matcher()))
}

/// Check that a pattern compiles, without caching it.
pub fn check_pattern(pattern: &str) -> Result<(), String> {
    compile(pattern).map(|_| ())
}

/// A per-policy cache of compiled matchers.
#[derive(Default)]
pub(crate) struct MatcherCache {
    cache: Mutex<HashMap<String, Arc<Compiled>>>,
}

impl MatcherCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply a pattern, compiling and caching it on first use. A pattern
    /// that fails to compile matches nothing; validation reports compile
    /// errors before a policy is built from configuration.
    fn matches(&self, pattern: &str, against: &str) -> MatchStatus {
        let mut cache = self.cache.lock();
        let compiled = match cache.get(pattern) {
            Some(found) => found.clone(),
            None => match compile(pattern) {
                Ok(fresh) => {
                    let fresh = Arc::new(fresh);
                    cache.insert(pattern.to_string(), fresh.clone());
                    fresh
                }
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "unusable match pattern");
                    return MatchStatus::No;
                }
            },
        };
        drop(cache);

        if compiled.matches(against) {
            MatchStatus::Yes
        } else {
            MatchStatus::No
        }
    }
}

/// The match half of a policy rule.
///
/// An attribute with no pattern is "don't care". A rule with no patterns
/// at all never matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Match {
    /// Pattern applied to the secret's location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Pattern applied to the secret's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Pattern applied to the secret's username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Pattern applied to the secret's type string.
    #[serde(default, rename = "secret_type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Pattern applied to the secret's URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Match {
    /// Whether no predicate is specified.
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.name.is_none()
            && self.username.is_none()
            && self.kind.is_none()
            && self.url.is_none()
    }

    /// Every pattern specified by this match.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        [
            self.location.as_deref(),
            self.name.as_deref(),
            self.username.as_deref(),
            self.kind.as_deref(),
            self.url.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    /// Apply only the location predicate.
    pub(crate) fn match_location(&self, cache: &MatcherCache, location: &str) -> MatchStatus {
        match &self.location {
            Some(pattern) => cache.matches(pattern, location),
            None => MatchStatus::Miss,
        }
    }

    /// Apply every specified predicate against a secret. All specified
    /// predicates must match; no specified predicates is a miss.
    pub(crate) fn match_secret(&self, cache: &MatcherCache, secret: &Secret) -> MatchStatus {
        let checks = [
            (&self.name, secret.name().to_string()),
            (&self.location, secret.location().to_string()),
            (&self.username, secret.username().to_string()),
            (&self.kind, secret.kind().to_string()),
            (&self.url, secret.url_string()),
        ];

        let mut hits = 0;
        for (pattern, against) in &checks {
            if let Some(pattern) = pattern {
                match cache.matches(pattern, against) {
                    MatchStatus::Yes => hits += 1,
                    MatchStatus::No => return MatchStatus::No,
                    MatchStatus::Miss => {}
                }
            }
        }

        if hits > 0 {
            MatchStatus::Yes
        } else {
            MatchStatus::Miss
        }
    }
}
