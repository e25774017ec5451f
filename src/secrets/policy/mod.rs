//! Acceptance and lifetime policy over a child keeper.
//!
//! A policy wraps one keeper with an ordered list of match rules and a
//! default rule. Reads filter out denied secrets, denied writes fail as
//! read-only, and a denied delete is a silent no-op so a hidden secret
//! stays hidden. Lifetime rules make secrets eligible for deletion by the
//! global enforcement sweep once they outlive their limit.

mod matcher;
mod rule;

pub use matcher::{check_pattern, Match};
pub use rule::{Acceptance, Rule};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::{collect_all, Keeper};
use super::types::Secret;

use matcher::{MatchStatus, MatcherCache};

/// The configuration type string for the policy keeper.
pub const TYPE: &str = "policy";

/// Concurrent deletions allowed during a global enforcement sweep.
const SWEEP_PERMITS: usize = 8;

/// A match predicate paired with its action.
struct MatchRule {
    matcher: Match,
    rule: Rule,
}

/// A keeper enforcing acceptance and lifetime rules over a child.
pub struct PolicyKeeper {
    child: Arc<dyn Keeper>,
    default_rule: Rule,
    rules: Vec<MatchRule>,
    matchers: MatcherCache,
}

impl PolicyKeeper {
    /// Wrap a child keeper with an allow-everything, no-lifetime policy.
    pub fn new(child: Arc<dyn Keeper>) -> Self {
        Self {
            child,
            default_rule: Rule {
                acceptance: Acceptance::Allow,
                lifetime: Duration::ZERO,
            },
            rules: Vec::new(),
            matchers: MatcherCache::new(),
        }
    }

    /// Set the default acceptance.
    ///
    /// # Panics
    ///
    /// Panics when given `Inherit`; the default is what inheritance
    /// resolves to, so it must be concrete.
    pub fn set_default_acceptance(&mut self, acceptance: Acceptance) {
        assert!(
            acceptance.is_concrete(),
            "default acceptance may not be set to inherit"
        );
        self.default_rule.acceptance = acceptance;
    }

    /// Set the default lifetime. Zero means no limit.
    pub fn set_default_lifetime(&mut self, lifetime: Duration) {
        self.default_rule.lifetime = lifetime;
    }

    /// Append a rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, matcher: Match, rule: Rule) {
        self.rules.push(MatchRule { matcher, rule });
    }

    /// Evaluate acceptance for a secret: the first rule producing a
    /// concrete decision wins; inherit and non-matching rules continue;
    /// the default decides otherwise.
    fn accessible(&self, secret: &Secret) -> bool {
        for mr in &self.rules {
            if mr.matcher.match_secret(&self.matchers, secret) == MatchStatus::Yes
                && mr.rule.acceptance.is_concrete()
            {
                return mr.rule.acceptance == Acceptance::Allow;
            }
        }
        self.default_rule.acceptance == Acceptance::Allow
    }

    /// Evaluate lifetime for a secret: the first matching rule with a
    /// positive lifetime wins, otherwise the default. Zero means no limit.
    fn lifetime_for(&self, secret: &Secret) -> Duration {
        for mr in &self.rules {
            if mr.rule.lifetime > Duration::ZERO
                && mr.matcher.match_secret(&self.matchers, secret) == MatchStatus::Yes
            {
                return mr.rule.lifetime;
            }
        }
        self.default_rule.lifetime
    }

    /// Whether the secret has outlived its lifetime.
    fn expired(&self, secret: &Secret) -> bool {
        let lifetime = self.lifetime_for(secret);
        if lifetime.is_zero() {
            return false;
        }
        let age = chrono::Utc::now() - secret.last_modified();
        age.to_std().map(|age| age > lifetime).unwrap_or(false)
    }

    /// Sweep every secret reachable from the child and delete the ones
    /// whose lifetime has run out. Deletions run concurrently under a
    /// small bound; individual failures are logged and do not abort the
    /// sweep. Returns how many secrets were deleted.
    pub async fn enforce_globally(&self) -> SecretResult<usize> {
        let secrets = collect_all(self.child.as_ref()).await?;

        let permits = Arc::new(Semaphore::new(SWEEP_PERMITS));
        let mut sweep: JoinSet<bool> = JoinSet::new();
        for secret in secrets {
            if !self.expired(&secret) {
                continue;
            }

            let child = self.child.clone();
            let permits = permits.clone();
            sweep.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let id = secret.id().to_string();
                match child.delete_secret(&id).await {
                    Ok(()) => {
                        tracing::debug!(id = %id, name = %secret.name(), "expired secret deleted");
                        true
                    }
                    Err(err) => {
                        tracing::warn!(id = %id, error = %err, "failed to delete expired secret");
                        false
                    }
                }
            });
        }

        let mut deleted = 0;
        while let Some(result) = sweep.join_next().await {
            if matches!(result, Ok(true)) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for PolicyKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyKeeper")
            .field("rules", &self.rules.len())
            .field("default_acceptance", &self.default_rule.acceptance)
            .field("default_lifetime", &self.default_rule.lifetime)
            .finish()
    }
}

#[async_trait]
impl Keeper for PolicyKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let locations = self.child.list_locations().await?;

        let mut kept = Vec::with_capacity(locations.len());
        'location: for location in locations {
            for mr in &self.rules {
                if mr.matcher.match_location(&self.matchers, &location) != MatchStatus::Yes {
                    continue;
                }
                match mr.rule.acceptance {
                    Acceptance::Allow => {
                        kept.push(location);
                        continue 'location;
                    }
                    Acceptance::Deny => continue 'location,
                    Acceptance::Inherit => {}
                }
            }
            if self.default_rule.acceptance == Acceptance::Allow {
                kept.push(location);
            }
        }
        Ok(kept)
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        let ids = self.child.list_secrets(location).await?;
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            match self.child.get_secret(&id).await {
                Ok(sec) if self.accessible(&sec) => kept.push(id),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(kept)
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let secret = self.child.get_secret(id).await?;
        if self.accessible(&secret) {
            Ok(secret)
        } else {
            Err(SecretError::not_found(id))
        }
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let secrets = self.child.get_secrets_by_name(name).await?;
        Ok(secrets
            .into_iter()
            .filter(|sec| self.accessible(sec))
            .collect())
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        if !self.accessible(&secret) {
            return Err(SecretError::read_only("secret is not writable under policy"));
        }
        self.child.set_secret(secret).await
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let secret = self.child.get_secret(id).await?;
        if !self.accessible(&secret) {
            return Err(SecretError::not_found(id));
        }

        let candidate = secret.with_location(location);
        if !self.accessible(&candidate) {
            return Err(SecretError::read_only("secret is not writable under policy"));
        }
        self.child.copy_secret(id, location).await
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let secret = self.child.get_secret(id).await?;
        if !self.accessible(&secret) {
            return Err(SecretError::not_found(id));
        }

        let candidate = secret.with_location(location);
        if !self.accessible(&candidate) {
            return Err(SecretError::read_only("secret is not writable under policy"));
        }
        self.child.move_secret(id, location).await
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        let secret = self.child.get_secret(id).await?;
        if !self.accessible(&secret) {
            // The caller cannot see this secret, so the delete "succeeds"
            // without revealing it exists.
            return Ok(());
        }
        self.child.delete_secret(id).await
    }
}

/// Configuration for the policy keeper. The default rule is inline; match
/// rules follow in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Name of the wrapped keeper.
    pub keeper: String,

    /// Default acceptance; must be `allow` or `deny`.
    pub acceptance: Option<Acceptance>,

    /// Default lifetime; zero or absent means no limit.
    #[serde(default, with = "humantime_serde")]
    pub lifetime: Duration,

    /// Match rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<MatchRuleConfig>,
}

/// One configured rule: match predicates plus exactly one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRuleConfig {
    /// Match predicates; attributes without a pattern are "don't care".
    #[serde(flatten)]
    pub matcher: Match,

    /// Concrete acceptance, or absent/`inherit` for a lifetime rule.
    #[serde(default)]
    pub acceptance: Option<Acceptance>,

    /// Positive lifetime for a lifetime rule.
    #[serde(default, with = "humantime_serde")]
    pub lifetime: Duration,
}

impl MatchRuleConfig {
    fn acceptance(&self) -> Acceptance {
        self.acceptance.unwrap_or(Acceptance::Inherit)
    }
}

fn check_rules(cfg: &PolicyConfig) -> ValidationError {
    let mut errs = ValidationError::new();

    match cfg.acceptance {
        Some(a) if a.is_concrete() => {}
        _ => errs.append(BuildError::Invalid(
            "policy default acceptance must be allow or deny".to_string(),
        )),
    }

    for rule in &cfg.rules {
        let concrete = rule.acceptance().is_concrete();
        let timed = rule.lifetime > Duration::ZERO;
        if concrete && timed {
            errs.append(BuildError::Invalid(
                "policy rule with both lifetime and acceptance settings is not permitted"
                    .to_string(),
            ));
        }
        if !concrete && !timed {
            errs.append(BuildError::Invalid(
                "policy rule with neither lifetime nor acceptance settings is not permitted"
                    .to_string(),
            ));
        }

        for pattern in rule.matcher.patterns() {
            if let Err(err) = check_pattern(pattern) {
                errs.append(BuildError::Invalid(format!(
                    "policy rule pattern {:?} does not compile: {}",
                    pattern, err
                )));
            }
        }
    }

    errs
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: PolicyConfig = env.decode(value)?;
        check_rules(&cfg).into_result()?;

        let child = env.build(&cfg.keeper).await?;
        let mut policy = PolicyKeeper::new(child);
        policy.set_default_acceptance(cfg.acceptance.unwrap_or(Acceptance::Allow));
        policy.set_default_lifetime(cfg.lifetime);

        for rule in cfg.rules {
            let action = if rule.lifetime > Duration::ZERO {
                Rule::lifetime(rule.lifetime)
            } else {
                Rule::acceptance(rule.acceptance())
            };
            policy.add_rule(rule.matcher, action);
        }

        let policy = Arc::new(policy);
        env.note_policy(policy.clone());
        Ok(policy as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: PolicyConfig = env.decode(value)?;
        let mut errs = check_rules(&cfg);

        if !env.exists(&cfg.keeper) {
            errs.append(BuildError::UnknownKeeper(cfg.keeper.clone()));
        } else if let Err(err) = env.validate(&cfg.keeper).await {
            errs.append(err);
        }

        errs.into_result()
    })
}

/// Register the policy keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Enforce acceptance and lifetime rules over another keeper",
            builder: build,
            validator: Some(validate),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory::MemoryKeeper;
    use chrono::Utc;

    fn deny_url_policy(child: Arc<dyn Keeper>) -> PolicyKeeper {
        let mut policy = PolicyKeeper::new(child);
        policy.add_rule(
            Match {
                url: Some(r"/evil\.com/".to_string()),
                ..Default::default()
            },
            Rule::acceptance(Acceptance::Deny),
        );
        policy
    }

    fn evil_secret() -> Secret {
        Secret::new("bad", "u", "p")
            .with_url(url::Url::parse("http://evil.com/x").unwrap())
    }

    #[tokio::test]
    async fn test_denied_write_is_read_only() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let policy = deny_url_policy(mem);

        let err = policy.set_secret(evil_secret()).await.unwrap_err();
        assert!(err.is_read_only());
    }

    #[tokio::test]
    async fn test_denied_secret_is_invisible() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let policy = deny_url_policy(mem.clone());

        // Written directly to the child, bypassing the policy.
        let stored = mem.set_secret(evil_secret()).await.unwrap();

        let err = policy.get_secret(stored.id()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(policy.get_secrets_by_name("bad").await.unwrap().is_empty());

        // The child still holds it.
        assert!(mem.get_secret(stored.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_delete_is_noop() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let policy = deny_url_policy(mem.clone());

        let stored = mem.set_secret(evil_secret()).await.unwrap();
        policy.delete_secret(stored.id()).await.unwrap();
        assert!(mem.get_secret(stored.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_allowed_operations_pass_through() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let policy = deny_url_policy(mem.clone());

        let stored = policy
            .set_secret(Secret::new("good", "u", "p"))
            .await
            .unwrap();
        assert!(policy.get_secret(stored.id()).await.is_ok());
        policy.delete_secret(stored.id()).await.unwrap();
        assert!(mem.get_secret(stored.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_move_into_denied_location_is_read_only() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mut policy = PolicyKeeper::new(mem);
        policy.add_rule(
            Match {
                location: Some("vaulted".to_string()),
                ..Default::default()
            },
            Rule::acceptance(Acceptance::Deny),
        );

        let stored = policy
            .set_secret(Secret::new("mobile", "u", "p"))
            .await
            .unwrap();
        let err = policy.move_secret(stored.id(), "vaulted").await.unwrap_err();
        assert!(err.is_read_only());
    }

    #[tokio::test]
    async fn test_lifetime_sweep_deletes_expired() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mut policy = PolicyKeeper::new(mem.clone());
        policy.set_default_lifetime(Duration::from_secs(24 * 3600));

        let stale = mem
            .set_secret(
                Secret::new("stale", "u", "p")
                    .with_last_modified(Utc::now() - chrono::Duration::hours(25)),
            )
            .await
            .unwrap();
        let fresh = mem
            .set_secret(
                Secret::new("fresh", "u", "p")
                    .with_last_modified(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let deleted = policy.enforce_globally().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(mem.get_secret(stale.id()).await.unwrap_err().is_not_found());
        assert!(mem.get_secret(fresh.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_lifetime_rule_overrides_default() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mut policy = PolicyKeeper::new(mem.clone());
        policy.add_rule(
            Match {
                name: Some("short-*".to_string()),
                ..Default::default()
            },
            Rule::lifetime(Duration::from_secs(3600)),
        );

        let short = mem
            .set_secret(
                Secret::new("short-lived", "u", "p")
                    .with_last_modified(Utc::now() - chrono::Duration::hours(2)),
            )
            .await
            .unwrap();
        let unlimited = mem
            .set_secret(
                Secret::new("durable", "u", "p")
                    .with_last_modified(Utc::now() - chrono::Duration::days(365)),
            )
            .await
            .unwrap();

        let deleted = policy.enforce_globally().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(mem.get_secret(short.id()).await.unwrap_err().is_not_found());
        assert!(mem.get_secret(unlimited.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_inherit_rule_defers_to_default_deny() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mut policy = PolicyKeeper::new(mem.clone());
        policy.set_default_acceptance(Acceptance::Deny);
        policy.add_rule(
            Match {
                name: Some("visible".to_string()),
                ..Default::default()
            },
            Rule::acceptance(Acceptance::Allow),
        );

        let visible = mem.set_secret(Secret::new("visible", "u", "p")).await.unwrap();
        let hidden = mem.set_secret(Secret::new("hidden", "u", "p")).await.unwrap();

        assert!(policy.get_secret(visible.id()).await.is_ok());
        assert!(policy
            .get_secret(hidden.id())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rule_validation() {
        let cfg: PolicyConfig = serde_yaml::from_str(
            r#"
keeper: child
acceptance: allow
rules:
  - name: both
    acceptance: deny
    lifetime: 1h
"#,
        )
        .unwrap();
        assert!(!check_rules(&cfg).is_empty());

        let cfg: PolicyConfig = serde_yaml::from_str(
            r#"
keeper: child
acceptance: allow
rules:
  - name: neither
"#,
        )
        .unwrap();
        assert!(!check_rules(&cfg).is_empty());

        let cfg: PolicyConfig = serde_yaml::from_str(
            r#"
keeper: child
acceptance: allow
rules:
  - name: timed
    lifetime: 1h
  - name: gated
    acceptance: deny
"#,
        )
        .unwrap();
        assert!(check_rules(&cfg).is_empty());
    }

    #[test]
    #[should_panic(expected = "inherit")]
    fn test_default_acceptance_must_be_concrete() {
        let mem: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mut policy = PolicyKeeper::new(mem);
        policy.set_default_acceptance(Acceptance::Inherit);
    }
}
