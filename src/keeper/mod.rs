//! Building live keepers from configuration.
//!
//! [`BuildEnv`] walks a named keeper entry, resolves embedded secret
//! references, and hands the resolved mapping to the plugin registered for
//! the entry's `type`. Middleware builders call back into the same
//! environment to construct their children, so the walk carries an
//! explicit build stack for cycle detection instead of ambient state.
//!
//! The validation path mirrors the build path but substitutes a
//! placeholder for secret references and never performs backend I/O.

mod check;
pub mod service;
pub mod sync;

pub use check::check_config;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{entry_type, Config, SecretRef, SECRET_REF_KEY};
use crate::plugin::{self, BuildError, RegisteredPlugin};
use crate::secrets::policy::PolicyKeeper;
use crate::secrets::Keeper;

/// Placeholder substituted for secret references during validation.
pub const SECRET_PLACEHOLDER: &str = "<secret-placeholder>";

/// The environment threaded through keeper construction.
///
/// One environment spans one request: keepers built under it are memoized
/// by name, so two routes naming the same child share an instance, and the
/// build stack spans the whole graph for cycle detection.
pub struct BuildEnv {
    config: Arc<Config>,
    stack: Vec<String>,
    built: HashMap<String, Arc<dyn Keeper>>,
    policies: HashMap<String, Arc<PolicyKeeper>>,
    validated: HashSet<String>,
}

impl BuildEnv {
    /// Create a build environment over a loaded configuration.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            stack: Vec::new(),
            built: HashMap::new(),
            policies: HashMap::new(),
            validated: HashSet::new(),
        }
    }

    /// The configuration this environment builds from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a keeper entry with the given name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.config.keepers.contains_key(name)
    }

    /// The `type` string of the named entry, if the entry exists and has
    /// one.
    pub fn keeper_type(&self, name: &str) -> Option<String> {
        self.config
            .keepers
            .get(name)
            .and_then(|e| entry_type(e))
            .map(str::to_string)
    }

    /// The name of the entry currently being built or validated.
    pub fn current_name(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Build the named keeper, constructing children recursively.
    pub async fn build(&mut self, name: &str) -> Result<Arc<dyn Keeper>, BuildError> {
        if let Some(found) = self.built.get(name) {
            return Ok(found.clone());
        }
        self.check_cycle(name)?;

        let (value, registered) = self.entry_plugin(name)?;
        self.stack.push(name.to_string());
        let result = self.build_entry(registered, value).await;
        self.stack.pop();

        match result {
            Ok(keeper) => {
                self.built.insert(name.to_string(), keeper.clone());
                Ok(keeper)
            }
            Err(err) => Err(BuildError::context(name, err)),
        }
    }

    /// Validate the named keeper without performing backend I/O. Children
    /// are validated recursively with the same stack, so reference cycles
    /// surface here as well as on the build path.
    pub async fn validate(&mut self, name: &str) -> Result<(), BuildError> {
        if self.validated.contains(name) {
            return Ok(());
        }
        self.check_cycle(name)?;

        let (value, registered) = self.entry_plugin(name)?;
        self.stack.push(name.to_string());
        let result = self.validate_entry(registered, value).await;
        self.stack.pop();

        result.map_err(|err| match err {
            BuildError::Validation(mut errs) => {
                errs.prefix(name);
                BuildError::Validation(errs)
            }
            other => BuildError::context(name, other),
        })?;
        self.validated.insert(name.to_string());
        Ok(())
    }

    /// Decode a resolved configuration value into a plugin's config type,
    /// reporting mismatches against the entry currently being built.
    pub fn decode<T: serde::de::DeserializeOwned>(
        &self,
        value: serde_yaml::Value,
    ) -> Result<T, BuildError> {
        serde_yaml::from_value(value).map_err(|err| BuildError::ConfigShape {
            name: self.current_name().unwrap_or_default().to_string(),
            message: err.to_string(),
        })
    }

    /// Record the policy keeper built for the current entry so policy
    /// enforcement can reach it after the graph is assembled.
    pub(crate) fn note_policy(&mut self, policy: Arc<PolicyKeeper>) {
        if let Some(name) = self.current_name() {
            self.policies.insert(name.to_string(), policy);
        }
    }

    /// The policy keeper built under the given entry name, if any.
    pub fn policy(&self, name: &str) -> Option<Arc<PolicyKeeper>> {
        self.policies.get(name).cloned()
    }

    fn check_cycle(&self, name: &str) -> Result<(), BuildError> {
        if self.stack.iter().any(|n| n == name) {
            let mut chain = self.stack.clone();
            chain.push(name.to_string());
            return Err(BuildError::CycleDetected(chain));
        }
        Ok(())
    }

    fn entry_plugin(
        &self,
        name: &str,
    ) -> Result<(serde_yaml::Value, RegisteredPlugin), BuildError> {
        let entry = self
            .config
            .keepers
            .get(name)
            .ok_or_else(|| BuildError::UnknownKeeper(name.to_string()))?;
        let type_name = entry_type(entry).ok_or_else(|| BuildError::ConfigShape {
            name: name.to_string(),
            message: "keeper entry has no type".to_string(),
        })?;
        let registered = plugin::get(type_name).ok_or_else(|| BuildError::UnknownType {
            name: name.to_string(),
            type_name: type_name.to_string(),
        })?;
        Ok((serde_yaml::Value::Mapping(entry.clone()), registered))
    }

    async fn build_entry(
        &mut self,
        registered: RegisteredPlugin,
        mut value: serde_yaml::Value,
    ) -> Result<Arc<dyn Keeper>, BuildError> {
        self.resolve_refs_in(&mut value, true).await?;
        if let Some(validator) = registered.validator {
            (validator)(self, value.clone()).await?;
        }
        (registered.builder)(self, value).await
    }

    async fn validate_entry(
        &mut self,
        registered: RegisteredPlugin,
        mut value: serde_yaml::Value,
    ) -> Result<(), BuildError> {
        self.resolve_refs_in(&mut value, false).await?;
        if let Some(validator) = registered.validator {
            (validator)(self, value).await?;
        }
        Ok(())
    }

    /// Walk a configuration value and replace every secret reference.
    ///
    /// With `lookup` set, the referenced keeper is built and the secret
    /// fetched; without it the reference is checked for shape only and a
    /// placeholder is substituted.
    fn resolve_refs_in<'a>(
        &'a mut self,
        value: &'a mut serde_yaml::Value,
        lookup: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BuildError>> + Send + 'a>> {
        Box::pin(async move {
            let ref_node = match &*value {
                serde_yaml::Value::Mapping(map) => map
                    .iter()
                    .find(|(k, _)| k.as_str() == Some(SECRET_REF_KEY))
                    .map(|(_, v)| v.clone()),
                _ => None,
            };

            if let Some(raw) = ref_node {
                let sref: SecretRef = serde_yaml::from_value(raw)
                    .map_err(|err| BuildError::SecretRef(err.to_string()))?;
                self.check_ref(&sref)?;
                let replacement = if lookup {
                    self.lookup_ref(&sref).await?
                } else {
                    SECRET_PLACEHOLDER.to_string()
                };
                *value = serde_yaml::Value::String(replacement);
                return Ok(());
            }

            match value {
                serde_yaml::Value::Mapping(map) => {
                    for (_, v) in map.iter_mut() {
                        self.resolve_refs_in(v, lookup).await?;
                    }
                }
                serde_yaml::Value::Sequence(seq) => {
                    for v in seq.iter_mut() {
                        self.resolve_refs_in(v, lookup).await?;
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }

    fn check_ref(&self, sref: &SecretRef) -> Result<(), BuildError> {
        if sref.keeper.is_empty() {
            return Err(BuildError::SecretRef("keeper is empty".to_string()));
        }
        if !self.exists(&sref.keeper) {
            return Err(BuildError::SecretRef(format!(
                "keeper {:?} does not exist",
                sref.keeper
            )));
        }
        if sref.secret.is_empty() {
            return Err(BuildError::SecretRef("secret is empty".to_string()));
        }
        if sref.field.is_empty() {
            return Err(BuildError::SecretRef("field is empty".to_string()));
        }
        Ok(())
    }

    async fn lookup_ref(&mut self, sref: &SecretRef) -> Result<String, BuildError> {
        let keeper = self.build(&sref.keeper).await?;

        let secret = match keeper.get_secret(&sref.secret).await {
            Ok(sec) => sec,
            Err(err) if err.is_not_found() => {
                let mut matches = keeper.get_secrets_by_name(&sref.secret).await?;
                if matches.is_empty() {
                    return Err(BuildError::SecretRef(format!(
                        "secret {:?} not found in keeper {:?}",
                        sref.secret, sref.keeper
                    )));
                }
                matches.remove(0)
            }
            Err(err) => return Err(err.into()),
        };

        secret.attribute(&sref.field).ok_or_else(|| {
            BuildError::SecretRef(format!(
                "secret {:?} in keeper {:?} has no field {:?}",
                sref.secret, sref.keeper, sref.field
            ))
        })
    }
}

impl std::fmt::Debug for BuildEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEnv")
            .field("stack", &self.stack)
            .field("built", &self.built.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeeperEntry;
    use crate::secrets::Secret;

    fn config_from_yaml(yaml: &str) -> Arc<Config> {
        crate::plugin::install_builtin();
        Arc::new(serde_yaml::from_str(yaml).unwrap())
    }

    fn entry(yaml: &str) -> KeeperEntry {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_build_unknown_keeper() {
        let config = config_from_yaml("keepers: {}");
        let mut env = BuildEnv::new(config);
        let err = env.build("missing").await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownKeeper(_)));
    }

    #[tokio::test]
    async fn test_build_unknown_type() {
        let config = config_from_yaml(
            r#"
keepers:
  odd:
    type: no-such-plugin
"#,
        );
        let mut env = BuildEnv::new(config);
        let err = env.build("odd").await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownType { .. }));
    }

    #[tokio::test]
    async fn test_build_memoizes_instances() {
        let config = config_from_yaml(
            r#"
keepers:
  main:
    type: memory
"#,
        );
        let mut env = BuildEnv::new(config);
        let first = env.build("main").await.unwrap();
        let second = env.build("main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_seq_cycle_detected() {
        let config = config_from_yaml(
            r#"
keepers:
  a:
    type: seq
    keepers: [b]
  b:
    type: seq
    keepers: [a]
"#,
        );
        let mut env = BuildEnv::new(config.clone());
        let err = env.build("a").await.unwrap_err();
        assert!(err.is_cycle(), "expected cycle, got: {}", err);

        let mut env = BuildEnv::new(config);
        let err = env.validate("a").await.unwrap_err();
        assert!(err.is_cycle(), "expected cycle, got: {}", err);
    }

    #[tokio::test]
    async fn test_secret_ref_placeholder_in_validation() {
        let mut config = Config::new();
        config.keepers.insert(
            "store".to_string(),
            entry("type: memory"),
        );
        config.keepers.insert(
            "files".to_string(),
            entry(
                r#"
type: low
path:
  __SECRET__:
    keeper: store
    secret: path-secret
    field: password
"#,
            ),
        );
        crate::plugin::install_builtin();

        let mut env = BuildEnv::new(Arc::new(config));
        env.validate("files").await.unwrap();
    }

    #[tokio::test]
    async fn test_secret_ref_rejects_missing_keeper() {
        let mut config = Config::new();
        config.keepers.insert(
            "files".to_string(),
            entry(
                r#"
type: low
path:
  __SECRET__:
    keeper: nowhere
    secret: path-secret
    field: password
"#,
            ),
        );
        crate::plugin::install_builtin();

        let mut env = BuildEnv::new(Arc::new(config));
        let err = env.validate("files").await.unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_secret_ref_resolves_through_keeper() {
        // Seed a memory keeper indirectly: build it once through the env,
        // store a secret, then resolve a reference against the same env so
        // the memoized instance is reused.
        let config = config_from_yaml(
            r#"
keepers:
  store:
    type: memory
"#,
        );
        let mut env = BuildEnv::new(config);
        let store = env.build("store").await.unwrap();
        let stored = store
            .set_secret(Secret::new("db-password", "svc", "sw0rdf1sh"))
            .await
            .unwrap();

        let mut value: serde_yaml::Value = serde_yaml::from_str(&format!(
            r#"
password:
  __SECRET__:
    keeper: store
    secret: {}
    field: password
"#,
            stored.id()
        ))
        .unwrap();

        env.resolve_refs_in(&mut value, true).await.unwrap();
        let resolved = value
            .get("password")
            .and_then(serde_yaml::Value::as_str)
            .unwrap();
        assert_eq!(resolved, "sw0rdf1sh");
    }
}
