//! Keeper plugin registry.
//!
//! Every keeper type is registered here as a triple of config schema,
//! builder, and optional validator, keyed by the `type` string used in
//! configuration entries. The registry is process-wide and write-once:
//! built-ins are installed during startup and the map is never mutated
//! afterwards, so lookups are safe from any task.
//!
//! Builders and validators receive the [`BuildEnv`] so middleware can
//! recursively construct or validate its children; see
//! [`crate::keeper`] for the build walk itself.

mod error;

pub use error::{BuildError, ValidationError};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Once;

use crate::keeper::BuildEnv;
use crate::secrets::Keeper;

/// Future returned by a plugin builder.
pub type BuildFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<dyn Keeper>, BuildError>> + Send + 'a>>;

/// Future returned by a plugin validator.
pub type ValidateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BuildError>> + Send + 'a>>;

/// Builds a live keeper from a resolved configuration value.
pub type BuilderFn = for<'a> fn(&'a mut BuildEnv, serde_yaml::Value) -> BuildFuture<'a>;

/// Checks a configuration value without performing backend I/O.
pub type ValidatorFn = for<'a> fn(&'a mut BuildEnv, serde_yaml::Value) -> ValidateFuture<'a>;

/// A registered keeper type.
#[derive(Clone)]
pub struct RegisteredPlugin {
    /// One-line description shown by `ghost list plugins`.
    pub description: &'static str,

    /// Constructs the keeper from its decoded configuration.
    pub builder: BuilderFn,

    /// Optional fail-fast validation, run before the builder on the build
    /// path and by `check_config` on every entry.
    pub validator: Option<ValidatorFn>,
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("description", &self.description)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

static PLUGINS: Lazy<RwLock<HashMap<String, RegisteredPlugin>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a keeper type.
///
/// # Panics
///
/// Panics if the type is already registered. Registration happens once
/// during process initialization; a duplicate means two plugins claim the
/// same configuration type and neither can be trusted.
pub fn register(type_name: &str, plugin: RegisteredPlugin) {
    let mut plugins = PLUGINS.write();
    if plugins.contains_key(type_name) {
        panic!("keeper type {:?} already registered", type_name);
    }
    plugins.insert(type_name.to_string(), plugin);
}

/// Look up a registered keeper type.
pub fn get(type_name: &str) -> Option<RegisteredPlugin> {
    PLUGINS.read().get(type_name).cloned()
}

/// Whether the type is registered.
pub fn exists(type_name: &str) -> bool {
    PLUGINS.read().contains_key(type_name)
}

/// Enumerate registered type names in lexicographic order.
pub fn list() -> Vec<String> {
    let mut names: Vec<String> = PLUGINS.read().keys().cloned().collect();
    names.sort();
    names
}

/// The one-line description of a registered type.
pub fn describe(type_name: &str) -> Option<&'static str> {
    PLUGINS.read().get(type_name).map(|p| p.description)
}

static INSTALL: Once = Once::new();

/// Install every built-in keeper type. Safe to call more than once; only
/// the first call registers anything.
pub fn install_builtin() {
    INSTALL.call_once(|| {
        crate::secrets::memory::register_plugin();
        crate::secrets::low::register_plugin();
        crate::secrets::keyring::register_plugin();
        crate::secrets::human::register_plugin();
        crate::secrets::router::register_plugin();
        crate::secrets::seq::register_plugin();
        crate::secrets::policy::register_plugin();
        crate::secrets::cache::register_plugin();
        crate::rpc::client::register_plugin();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_enumerate_sorted() {
        install_builtin();
        let names = list();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.iter().any(|n| n == "memory"));
        assert!(names.iter().any(|n| n == "router"));
        assert!(names.iter().any(|n| n == "seq"));
        assert!(names.iter().any(|n| n == "policy"));
        assert!(names.iter().any(|n| n == "cache"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration_panics() {
        install_builtin();
        let plugin = get("memory").unwrap();
        register("memory", plugin);
    }

    #[test]
    fn test_lookup_and_describe() {
        install_builtin();
        assert!(exists("memory"));
        assert!(!exists("no-such-type"));
        assert!(describe("memory").is_some());
    }
}
