//! In-process secret store, sealed at rest.
//!
//! The memory keeper is the authoritative in-process store used as the
//! cache substrate, the sync gatherer, and the test oracle. Every record
//! is serialized to a compact binary encoding and sealed with AES-256-GCM
//! under a key and nonce generated at construction; only the sealed bytes
//! stay resident, and reads decrypt on demand.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use zeroize::Zeroize;

use crate::keeper::BuildEnv;
use crate::plugin;

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::sortable_id;
use super::types::Secret;

/// The configuration type string for the memory keeper.
pub const TYPE: &str = "memory";

/// The memory keeper takes no configuration beyond its `type` field.
#[derive(Debug, Default, Deserialize)]
pub struct MemoryConfig {}

/// A keeper that stores sealed secrets in memory.
pub struct MemoryKeeper {
    cipher: Aes256Gcm,
    nonce: [u8; 12],
    state: Mutex<State>,
}

struct State {
    sealed: BTreeMap<String, Vec<u8>>,
    counter: u64,
}

impl MemoryKeeper {
    /// Construct an empty store with a fresh random key and nonce.
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
        key.zeroize();

        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        Self {
            cipher,
            nonce,
            state: Mutex::new(State {
                sealed: BTreeMap::new(),
                counter: 0,
            }),
        }
    }

    fn seal(&self, secret: &Secret) -> SecretResult<Vec<u8>> {
        let plain = bincode::serialize(secret)
            .map_err(|e| SecretError::Serialization(e.to_string()))?;
        self.cipher
            .encrypt(GenericArray::from_slice(&self.nonce), plain.as_slice())
            .map_err(|e| SecretError::Crypto(format!("sealing failed: {}", e)))
    }

    fn unseal(&self, sealed: &[u8]) -> SecretResult<Secret> {
        let plain = self
            .cipher
            .decrypt(GenericArray::from_slice(&self.nonce), sealed)
            .map_err(|e| SecretError::Crypto(format!("unsealing failed: {}", e)))?;
        bincode::deserialize(&plain).map_err(|e| SecretError::Serialization(e.to_string()))
    }
}

impl Default for MemoryKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeeper")
            .field("secrets", &self.state.lock().sealed.len())
            .finish()
    }
}

#[async_trait]
impl Keeper for MemoryKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let state = self.state.lock();
        let mut locations = BTreeSet::new();
        for sealed in state.sealed.values() {
            locations.insert(self.unseal(sealed)?.location().to_string());
        }
        Ok(locations.into_iter().collect())
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        let state = self.state.lock();
        let mut ids = Vec::new();
        for (id, sealed) in &state.sealed {
            if self.unseal(sealed)?.location() == location {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let state = self.state.lock();
        match state.sealed.get(id) {
            Some(sealed) => self.unseal(sealed),
            None => Err(SecretError::not_found(id)),
        }
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let state = self.state.lock();
        let mut secrets = Vec::new();
        for sealed in state.sealed.values() {
            let sec = self.unseal(sealed)?;
            if sec.name() == name {
                secrets.push(sec);
            }
        }
        Ok(secrets)
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let id = if secret.id().is_empty() || !state.sealed.contains_key(secret.id()) {
            state.counter += 1;
            sortable_id(state.counter)
        } else {
            secret.id().to_string()
        };

        let stored = secret.with_id(id);
        let sealed = self.seal(&stored)?;
        state.sealed.insert(stored.id().to_string(), sealed);
        Ok(stored)
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let original = match state.sealed.get(id) {
            Some(sealed) => self.unseal(sealed)?,
            None => return Err(SecretError::not_found(id)),
        };

        state.counter += 1;
        let copy = original
            .with_id(sortable_id(state.counter))
            .with_location(location);
        let sealed = self.seal(&copy)?;
        state.sealed.insert(copy.id().to_string(), sealed);
        Ok(copy)
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let mut state = self.state.lock();
        let original = match state.sealed.get(id) {
            Some(sealed) => self.unseal(sealed)?,
            None => return Err(SecretError::not_found(id)),
        };

        let moved = original.with_location(location);
        let sealed = self.seal(&moved)?;
        state.sealed.insert(moved.id().to_string(), sealed);
        Ok(moved)
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        self.state.lock().sealed.remove(id);
        Ok(())
    }
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let _cfg: MemoryConfig = env.decode(value)?;
        Ok(Arc::new(MemoryKeeper::new()) as Arc<dyn Keeper>)
    })
}

/// Register the memory keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "In-process store sealed at rest, used as the cache substrate and test oracle",
            builder: build,
            validator: None,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_set_assigns_id_and_roundtrips() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2"))
            .await
            .unwrap();
        assert!(!stored.id().is_empty());

        let fetched = mem.get_secret(stored.id()).await.unwrap();
        assert_eq!(fetched.name(), "example");
        assert_eq!(fetched.password(), "hunter2");
    }

    #[tokio::test]
    async fn test_set_upserts_existing_id() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2"))
            .await
            .unwrap();
        let updated = mem
            .set_secret(stored.clone().with_password("changed"))
            .await
            .unwrap();
        assert_eq!(updated.id(), stored.id());

        let fetched = mem.get_secret(stored.id()).await.unwrap();
        assert_eq!(fetched.password(), "changed");
    }

    #[tokio::test]
    async fn test_unknown_id_allocates_fresh() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2").with_id("bogus"))
            .await
            .unwrap();
        assert_ne!(stored.id(), "bogus");
    }

    #[tokio::test]
    async fn test_ids_are_sortable_and_monotonic() {
        let mem = MemoryKeeper::new();
        let first = mem
            .set_secret(Secret::new("a", "u", "p"))
            .await
            .unwrap();
        let second = mem
            .set_secret(Secret::new("b", "u", "p"))
            .await
            .unwrap();
        assert!(first.id() < second.id());
    }

    #[tokio::test]
    async fn test_list_locations_is_a_set() {
        let mem = MemoryKeeper::new();
        mem.set_secret(Secret::new("a", "u", "p").with_location("work"))
            .await
            .unwrap();
        mem.set_secret(Secret::new("b", "u", "p").with_location("work"))
            .await
            .unwrap();
        mem.set_secret(Secret::new("c", "u", "p")).await.unwrap();

        let locs = mem.list_locations().await.unwrap();
        assert_eq!(locs, vec!["".to_string(), "work".to_string()]);
    }

    #[tokio::test]
    async fn test_copy_keeps_original() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2"))
            .await
            .unwrap();
        let copy = mem.copy_secret(stored.id(), "work").await.unwrap();
        assert_ne!(copy.id(), stored.id());
        assert_eq!(copy.location(), "work");

        let original = mem.get_secret(stored.id()).await.unwrap();
        assert_eq!(original.location(), "");
    }

    #[tokio::test]
    async fn test_move_keeps_id() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2"))
            .await
            .unwrap();
        let moved = mem.move_secret(stored.id(), "work").await.unwrap();
        assert_eq!(moved.id(), stored.id());
        assert_eq!(moved.location(), "work");
        assert_eq!(mem.list_secrets("").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let mem = MemoryKeeper::new();
        let stored = mem
            .set_secret(Secret::new("example", "alice", "hunter2"))
            .await
            .unwrap();
        mem.delete_secret(stored.id()).await.unwrap();
        mem.delete_secret(stored.id()).await.unwrap();
        assert!(mem.get_secret(stored.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_preserves_caller_timestamps() {
        let mem = MemoryKeeper::new();
        let old = Utc::now() - Duration::hours(25);
        let stored = mem
            .set_secret(Secret::new("stale", "u", "p").with_last_modified(old))
            .await
            .unwrap();
        assert_eq!(stored.last_modified(), old);
    }
}
