//! Acceptance and lifetime rules.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a policy accepts, rejects, or defers on a matched secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Acceptance {
    /// The secret is visible and writable.
    Allow,
    /// The secret is hidden and immutable through this policy.
    Deny,
    /// Defer to later rules or the default.
    #[default]
    Inherit,
}

impl Acceptance {
    /// Whether this is a concrete decision rather than a deferral.
    pub fn is_concrete(self) -> bool {
        self != Acceptance::Inherit
    }
}

/// The action half of a policy rule: an acceptance and a lifetime.
///
/// A zero lifetime means no limit. Rules carry exactly one decision:
/// either a concrete acceptance, or a positive lifetime with acceptance
/// left to inherit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub(crate) acceptance: Acceptance,
    pub(crate) lifetime: Duration,
}

impl Rule {
    /// A rule deciding acceptance.
    pub fn acceptance(acceptance: Acceptance) -> Self {
        Self {
            acceptance,
            lifetime: Duration::ZERO,
        }
    }

    /// A rule deciding lifetime.
    pub fn lifetime(lifetime: Duration) -> Self {
        Self {
            acceptance: Acceptance::Inherit,
            lifetime,
        }
    }
}
