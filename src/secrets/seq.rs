//! First-match fallback across an ordered list of keepers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::types::Secret;

/// The configuration type string for the seq keeper.
pub const TYPE: &str = "seq";

/// A keeper that fans reads across children in order.
///
/// Point reads return the first child's non-not-found answer; collection
/// reads merge every child's answer, deduplicated by id. All writes go to
/// the first child only.
#[derive(Debug)]
pub struct SeqKeeper {
    keepers: Vec<Arc<dyn Keeper>>,
}

impl SeqKeeper {
    /// Create a seq over the given children. At least one child is
    /// required, since writes delegate to the first.
    pub fn new(keepers: Vec<Arc<dyn Keeper>>) -> SecretResult<Self> {
        if keepers.is_empty() {
            return Err(SecretError::backend("seq keeper requires at least one child", None));
        }
        Ok(Self { keepers })
    }

    fn first(&self) -> &Arc<dyn Keeper> {
        &self.keepers[0]
    }
}

#[async_trait]
impl Keeper for SeqKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let mut locations = BTreeSet::new();
        for child in &self.keepers {
            locations.extend(child.list_locations().await?);
        }
        Ok(locations.into_iter().collect())
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut seen = BTreeSet::new();
        for child in &self.keepers {
            for id in child.list_secrets(location).await? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        for child in &self.keepers {
            match child.get_secret(id).await {
                Ok(sec) => return Ok(sec),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(SecretError::not_found(id))
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let mut secrets: Vec<Secret> = Vec::new();
        let mut seen = BTreeSet::new();
        for child in &self.keepers {
            for sec in child.get_secrets_by_name(name).await? {
                if seen.insert(sec.id().to_string()) {
                    secrets.push(sec);
                }
            }
        }
        Ok(secrets)
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        self.first().set_secret(secret).await
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        self.first().copy_secret(id, location).await
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        self.first().move_secret(id, location).await
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        self.first().delete_secret(id).await
    }
}

/// Configuration for the seq keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqConfig {
    /// Names of the child keepers, in read order.
    pub keepers: Vec<String>,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: SeqConfig = env.decode(value)?;
        let mut keepers = Vec::with_capacity(cfg.keepers.len());
        for name in &cfg.keepers {
            keepers.push(env.build(name).await?);
        }
        let seq = SeqKeeper::new(keepers)?;
        Ok(Arc::new(seq) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: SeqConfig = env.decode(value)?;
        let mut errs = ValidationError::new();

        if cfg.keepers.is_empty() {
            errs.append(BuildError::Invalid("seq keeper has no children".to_string()));
        }

        for name in &cfg.keepers {
            if !env.exists(name) {
                errs.append(BuildError::UnknownKeeper(name.clone()));
                continue;
            }

            // A seq inside a seq re-runs fallback logic to no effect and
            // makes write targeting ambiguous.
            if env.keeper_type(name).as_deref() == Some(TYPE) {
                errs.append(BuildError::Invalid(format!(
                    "seq keeper {:?} is also a seq, seq keepers inside of seq keepers are not permitted",
                    name
                )));
            }

            if let Err(err) = env.validate(name).await {
                errs.append(err);
            }
        }

        errs.into_result()
    })
}

/// Register the seq keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Fan reads across keepers in order, writing to the first",
            builder: build,
            validator: Some(validate),
        },
    );
}
