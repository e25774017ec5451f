//! Read-through caching over a backing keeper.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::memory::MemoryKeeper;
use super::types::Secret;

/// The configuration type string for the cache keeper.
pub const TYPE: &str = "cache";

/// Bidirectional mapping between backend ids and local store ids.
///
/// Both directions live in one structure so an insert or remove cannot
/// leave them out of step.
#[derive(Default)]
struct IdMap {
    cache_by_backend: HashMap<String, String>,
    backend_by_cache: HashMap<String, String>,
}

impl IdMap {
    fn insert(&mut self, backend_id: String, cache_id: String) {
        if let Some(old_cache) = self.cache_by_backend.insert(backend_id.clone(), cache_id.clone())
        {
            self.backend_by_cache.remove(&old_cache);
        }
        self.backend_by_cache.insert(cache_id, backend_id);
    }

    fn cache_id(&self, backend_id: &str) -> Option<String> {
        self.cache_by_backend.get(backend_id).cloned()
    }

    fn backend_id(&self, cache_id: &str) -> Option<String> {
        self.backend_by_cache.get(cache_id).cloned()
    }

    fn remove_backend(&mut self, backend_id: &str) -> Option<String> {
        let cache_id = self.cache_by_backend.remove(backend_id)?;
        self.backend_by_cache.remove(&cache_id);
        Some(cache_id)
    }
}

/// A write-denied, read-through cache over a backing keeper.
///
/// Fetched secrets are stored in a local [`MemoryKeeper`] and served from
/// there on later reads, so a secret read once stays readable while the
/// backend is unreachable. Deleting through the cache only invalidates the
/// local copy; every other mutation is refused.
pub struct CacheKeeper {
    backend: Arc<dyn Keeper>,
    store: MemoryKeeper,
    ids: Mutex<IdMap>,
    touch_on_read: bool,
}

impl CacheKeeper {
    /// Wrap a backing keeper. With `touch_on_read`, every cache hit
    /// refreshes the local copy's modification time.
    pub fn new(backend: Arc<dyn Keeper>, touch_on_read: bool) -> Self {
        Self {
            backend,
            store: MemoryKeeper::new(),
            ids: Mutex::new(IdMap::default()),
            touch_on_read,
        }
    }

    /// Store a fetched secret locally and record its id mapping. The
    /// returned secret carries the backend id callers know.
    async fn admit(&self, secret: Secret) -> SecretResult<Secret> {
        let backend_id = secret.id().to_string();
        let cached = self.store.set_secret(secret.clone().with_id("")).await?;
        self.ids
            .lock()
            .insert(backend_id.clone(), cached.id().to_string());
        Ok(secret)
    }

    async fn touch(&self, cache_id: &str, secret: Secret) -> SecretResult<Secret> {
        let touched = secret.with_last_modified(chrono::Utc::now());
        self.store
            .set_secret(touched.clone().with_id(cache_id))
            .await?;
        Ok(touched)
    }

    fn read_only_err() -> SecretError {
        SecretError::read_only("caching keeper does not allow direct writes")
    }
}

impl std::fmt::Debug for CacheKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKeeper")
            .field("touch_on_read", &self.touch_on_read)
            .finish()
    }
}

#[async_trait]
impl Keeper for CacheKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        self.backend.list_locations().await
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        self.backend.list_secrets(location).await
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let cache_id = self.ids.lock().cache_id(id);
        if let Some(cache_id) = cache_id {
            match self.store.get_secret(&cache_id).await {
                Ok(cached) => {
                    let cached = if self.touch_on_read {
                        self.touch(&cache_id, cached).await?
                    } else {
                        cached
                    };
                    return Ok(cached.with_id(id));
                }
                Err(err) if err.is_not_found() => {
                    self.ids.lock().remove_backend(id);
                }
                Err(err) => return Err(err),
            }
        }

        let fetched = self.backend.get_secret(id).await?;
        self.admit(fetched).await
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let cached = self.store.get_secrets_by_name(name).await?;
        if !cached.is_empty() {
            let mut out = Vec::with_capacity(cached.len());
            for sec in cached {
                let cache_id = sec.id().to_string();
                let Some(backend_id) = self.ids.lock().backend_id(&cache_id) else {
                    continue;
                };
                let sec = if self.touch_on_read {
                    self.touch(&cache_id, sec).await?
                } else {
                    sec
                };
                out.push(sec.with_id(backend_id));
            }
            return Ok(out);
        }

        let fetched = self.backend.get_secrets_by_name(name).await?;
        let mut out = Vec::with_capacity(fetched.len());
        for sec in fetched {
            out.push(self.admit(sec).await?);
        }
        Ok(out)
    }

    async fn set_secret(&self, _secret: Secret) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    async fn copy_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    async fn move_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    /// Invalidate the local copy. The backend is never touched.
    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        let cache_id = self.ids.lock().remove_backend(id);
        if let Some(cache_id) = cache_id {
            self.store.delete_secret(&cache_id).await?;
            tracing::debug!(id = %id, "cache entry invalidated");
        }
        Ok(())
    }
}

/// Configuration for the cache keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name of the keeper to cache.
    pub keeper: String,

    /// Refresh the local modification time on every cache hit.
    #[serde(default)]
    pub touch_on_read: bool,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: CacheConfig = env.decode(value)?;
        let backend = env.build(&cfg.keeper).await?;
        Ok(Arc::new(CacheKeeper::new(backend, cfg.touch_on_read)) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: CacheConfig = env.decode(value)?;
        let mut errs = ValidationError::new();

        if !env.exists(&cfg.keeper) {
            errs.append(BuildError::UnknownKeeper(cfg.keeper.clone()));
        } else if let Err(err) = env.validate(&cfg.keeper).await {
            errs.append(err);
        }

        errs.into_result()
    })
}

/// Register the cache keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Read-through cache over another keeper",
            builder: build,
            validator: Some(validate),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A backend that can be switched off to simulate outages.
    #[derive(Debug)]
    struct FlakyBackend {
        inner: MemoryKeeper,
        up: std::sync::atomic::AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: MemoryKeeper::new(),
                up: std::sync::atomic::AtomicBool::new(true),
            }
        }

        fn go_down(&self) {
            self.up.store(false, std::sync::atomic::Ordering::SeqCst);
        }

        fn check(&self) -> SecretResult<()> {
            if self.up.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SecretError::backend("backend unreachable", None))
            }
        }
    }

    #[async_trait]
    impl Keeper for FlakyBackend {
        async fn list_locations(&self) -> SecretResult<Vec<String>> {
            self.check()?;
            self.inner.list_locations().await
        }
        async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
            self.check()?;
            self.inner.list_secrets(location).await
        }
        async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
            self.check()?;
            self.inner.get_secret(id).await
        }
        async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
            self.check()?;
            self.inner.get_secrets_by_name(name).await
        }
        async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
            self.check()?;
            self.inner.set_secret(secret).await
        }
        async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
            self.check()?;
            self.inner.copy_secret(id, location).await
        }
        async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
            self.check()?;
            self.inner.move_secret(id, location).await
        }
        async fn delete_secret(&self, id: &str) -> SecretResult<()> {
            self.check()?;
            self.inner.delete_secret(id).await
        }
    }

    #[tokio::test]
    async fn test_read_through_and_serve_while_down() {
        let backend = Arc::new(FlakyBackend::new());
        let stored = backend
            .inner
            .set_secret(Secret::new("db", "svc", "p"))
            .await
            .unwrap();

        let cache = CacheKeeper::new(backend.clone(), false);

        // First read populates the cache.
        let first = cache.get_secret(stored.id()).await.unwrap();
        assert_eq!(first.id(), stored.id());

        // The backend goes away; the cache still answers.
        backend.go_down();
        let second = cache.get_secret(stored.id()).await.unwrap();
        assert_eq!(second.name(), "db");

        // Until the entry is invalidated.
        cache.delete_secret(stored.id()).await.unwrap();
        assert!(cache.get_secret(stored.id()).await.is_err());
    }

    #[tokio::test]
    async fn test_presents_backend_ids() {
        let backend = Arc::new(FlakyBackend::new());
        let stored = backend
            .inner
            .set_secret(Secret::new("db", "svc", "p"))
            .await
            .unwrap();

        let cache = CacheKeeper::new(backend.clone(), false);
        let by_name = cache.get_secrets_by_name("db").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id(), stored.id());

        backend.go_down();
        let again = cache.get_secrets_by_name("db").await.unwrap();
        assert_eq!(again[0].id(), stored.id());
    }

    #[tokio::test]
    async fn test_writes_denied() {
        let backend: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let cache = CacheKeeper::new(backend, false);

        assert!(cache
            .set_secret(Secret::new("x", "u", "p"))
            .await
            .unwrap_err()
            .is_read_only());
        assert!(cache
            .copy_secret("id", "loc")
            .await
            .unwrap_err()
            .is_read_only());
        assert!(cache
            .move_secret("id", "loc")
            .await
            .unwrap_err()
            .is_read_only());
    }

    #[tokio::test]
    async fn test_delete_never_touches_backend() {
        let backend = Arc::new(FlakyBackend::new());
        let stored = backend
            .inner
            .set_secret(Secret::new("db", "svc", "p"))
            .await
            .unwrap();

        let cache = CacheKeeper::new(backend.clone(), false);
        cache.get_secret(stored.id()).await.unwrap();
        cache.delete_secret(stored.id()).await.unwrap();

        // The backend still has the secret.
        assert!(backend.inner.get_secret(stored.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_touch_on_read_updates_local_time() {
        let backend = Arc::new(FlakyBackend::new());
        let old = chrono::Utc::now() - chrono::Duration::hours(5);
        let stored = backend
            .inner
            .set_secret(Secret::new("db", "svc", "p").with_last_modified(old))
            .await
            .unwrap();

        let cache = CacheKeeper::new(backend, true);
        let first = cache.get_secret(stored.id()).await.unwrap();
        assert_eq!(first.last_modified(), old);

        // The hit path refreshes the local copy.
        let second = cache.get_secret(stored.id()).await.unwrap();
        assert!(second.last_modified() > old);
    }
}
