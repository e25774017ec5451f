//! Low-security plaintext file backend.
//!
//! Secrets are kept in a YAML file with no encryption at all; the only
//! protection is the 0600 file mode enforced on every save. Useful for
//! secrets that are not actually sensitive, and for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::sortable_id;
use super::types::Secret;

/// The configuration type string for the low-security keeper.
pub const TYPE: &str = "low";

struct LowState {
    secrets: BTreeMap<String, Secret>,
    counter: u64,
}

/// A keeper storing plaintext secrets in a YAML file.
pub struct LowSecurityKeeper {
    path: PathBuf,
    state: Mutex<LowState>,
}

impl LowSecurityKeeper {
    /// Open the store at the given path. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> SecretResult<Self> {
        let path = path.into();
        let secrets: BTreeMap<String, Secret> = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&data)
                .map_err(|err| SecretError::Serialization(err.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            state: Mutex::new(LowState {
                secrets,
                counter: 0,
            }),
        })
    }

    /// Rewrite the file atomically with mode 0600.
    fn save(&self, secrets: &BTreeMap<String, Secret>) -> SecretResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let data = serde_yaml::to_string(secrets)
            .map_err(|err| SecretError::Serialization(err.to_string()))?;
        tmp.write_all(data.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path)
            .map_err(|err| SecretError::Io(err.error))?;
        Ok(())
    }
}

impl std::fmt::Debug for LowSecurityKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowSecurityKeeper")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl Keeper for LowSecurityKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let state = self.state.lock();
        let locations: BTreeSet<String> = state
            .secrets
            .values()
            .map(|sec| sec.location().to_string())
            .collect();
        Ok(locations.into_iter().collect())
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .secrets
            .iter()
            .filter(|(_, sec)| sec.location() == location)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let state = self.state.lock();
        state
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| SecretError::not_found(id))
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let state = self.state.lock();
        Ok(state
            .secrets
            .values()
            .filter(|sec| sec.name() == name)
            .cloned()
            .collect())
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let id = if secret.id().is_empty() || !state.secrets.contains_key(secret.id()) {
            state.counter += 1;
            sortable_id(state.counter)
        } else {
            secret.id().to_string()
        };

        let stored = secret.with_id(id);
        state.secrets.insert(stored.id().to_string(), stored.clone());
        self.save(&state.secrets)?;
        Ok(stored)
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let original = state
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| SecretError::not_found(id))?;

        state.counter += 1;
        let copy = original
            .with_id(sortable_id(state.counter))
            .with_location(location);
        state.secrets.insert(copy.id().to_string(), copy.clone());
        self.save(&state.secrets)?;
        Ok(copy)
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let original = state
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| SecretError::not_found(id))?;

        let moved = original.with_location(location);
        state.secrets.insert(moved.id().to_string(), moved.clone());
        self.save(&state.secrets)?;
        Ok(moved)
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        let mut state = self.state.lock();
        if state.secrets.remove(id).is_some() {
            self.save(&state.secrets)?;
        }
        Ok(())
    }
}

/// Configuration for the low-security keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowConfig {
    /// Path of the YAML secrets file.
    pub path: String,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: LowConfig = env.decode(value)?;
        let keeper = LowSecurityKeeper::open(cfg.path)?;
        Ok(Arc::new(keeper) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: LowConfig = env.decode(value)?;
        let mut errs = ValidationError::new();
        if cfg.path.is_empty() {
            errs.append(BuildError::Invalid(
                "low-security keeper has no path".to_string(),
            ));
        }
        errs.into_result()
    })
}

/// Register the low-security keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Plaintext YAML secrets file, protected by file mode only",
            builder: build,
            validator: Some(validate),
        },
    );
}
