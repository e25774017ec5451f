//! OS keyring backend.
//!
//! The platform keyring stores one value per `(service, user)` pair and
//! cannot enumerate entries, so this backend supports a reduced contract:
//! id, name, and username are all the same string, everything lives in the
//! single root location, and listing, copying, and moving secrets are
//! unsupported. The non-password attributes travel inside the stored value
//! as a JSON map.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::types::Secret;

/// The configuration type string for the keyring keeper.
pub const TYPE: &str = "keyring";

const FLD_PASSWORD: &str = "password";
const FLD_TYPE: &str = "type";
const FLD_URL: &str = "url";
const FLD_MTIME: &str = "mtime";
const FLD_PREFIX: &str = "field:";

/// A keeper backed by the operating system keyring.
pub struct KeyringKeeper {
    service: String,
}

impl KeyringKeeper {
    /// Create a keeper storing entries under the given service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> SecretResult<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|err| SecretError::backend(err.to_string(), None))
    }

    fn encode(secret: &Secret) -> SecretResult<String> {
        if !secret.location().is_empty() {
            return Err(SecretError::Unsupported(
                "keyring secrets may only live in the root location".to_string(),
            ));
        }

        let mut raw = BTreeMap::new();
        raw.insert(FLD_PASSWORD.to_string(), secret.password().to_string());
        raw.insert(FLD_TYPE.to_string(), secret.kind().to_string());
        raw.insert(FLD_URL.to_string(), secret.url_string());
        raw.insert(
            FLD_MTIME.to_string(),
            secret.last_modified().timestamp().to_string(),
        );
        for (k, v) in secret.fields() {
            raw.insert(format!("{}{}", FLD_PREFIX, k), v.clone());
        }

        serde_json::to_string(&raw).map_err(|err| SecretError::Serialization(err.to_string()))
    }

    fn decode(name: &str, value: &str) -> SecretResult<Secret> {
        let raw: BTreeMap<String, String> = serde_json::from_str(value)
            .map_err(|err| SecretError::Serialization(err.to_string()))?;

        let mtime: DateTime<Utc> = raw
            .get(FLD_MTIME)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        let mut secret = Secret::new(name, name, raw.get(FLD_PASSWORD).cloned().unwrap_or_default())
            .with_id(name)
            .with_kind(raw.get(FLD_TYPE).cloned().unwrap_or_default())
            .with_last_modified(mtime);

        if let Some(url) = raw.get(FLD_URL).and_then(|u| url::Url::parse(u).ok()) {
            secret = secret.with_url(url);
        }
        for (k, v) in &raw {
            if let Some(field) = k.strip_prefix(FLD_PREFIX) {
                secret = secret.with_field(field, v.clone());
            }
        }
        Ok(secret)
    }

    fn map_err(name: &str, err: keyring::Error) -> SecretError {
        match err {
            keyring::Error::NoEntry => SecretError::not_found(name),
            other => SecretError::backend(other.to_string(), None),
        }
    }
}

impl std::fmt::Debug for KeyringKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringKeeper")
            .field("service", &self.service)
            .finish()
    }
}

#[async_trait]
impl Keeper for KeyringKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        Ok(vec![String::new()])
    }

    async fn list_secrets(&self, _location: &str) -> SecretResult<Vec<String>> {
        Err(SecretError::Unsupported(
            "secrets in the keyring cannot be listed".to_string(),
        ))
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let value = self
            .entry(id)?
            .get_password()
            .map_err(|err| Self::map_err(id, err))?;
        Self::decode(id, &value)
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        match self.get_secret(name).await {
            Ok(sec) => Ok(vec![sec]),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        if secret.name().is_empty() {
            return Err(SecretError::Unsupported(
                "keyring secrets require a name".to_string(),
            ));
        }

        // The keyring can only key by one string, so name, id, and
        // username collapse to the same value.
        let stored = secret
            .clone()
            .with_id(secret.name())
            .with_username(secret.name());
        let value = Self::encode(&stored)?;
        self.entry(stored.name())?
            .set_password(&value)
            .map_err(|err| Self::map_err(stored.name(), err))?;
        Ok(stored)
    }

    async fn copy_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(SecretError::Unsupported(
            "secrets in the keyring cannot be copied".to_string(),
        ))
    }

    async fn move_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(SecretError::Unsupported(
            "secrets in the keyring cannot be moved".to_string(),
        ))
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        match self.entry(id)?.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(Self::map_err(id, err)),
        }
    }
}

/// Configuration for the keyring keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Service name the entries are stored under.
    pub service_name: String,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: KeyringConfig = env.decode(value)?;
        Ok(Arc::new(KeyringKeeper::new(cfg.service_name)) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: KeyringConfig = env.decode(value)?;
        let mut errs = ValidationError::new();
        if cfg.service_name.is_empty() {
            errs.append(BuildError::Invalid(
                "keyring keeper has no service name".to_string(),
            ));
        }
        errs.into_result()
    })
}

/// Register the keyring keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Secrets in the operating system keyring",
            builder: build,
            validator: Some(validate),
        },
    );
}
