//! The keeper contract every backend and middleware satisfies.

use async_trait::async_trait;

use super::error::SecretResult;
use super::types::Secret;

/// Trait for secret keeper implementations.
///
/// A keeper is either a leaf backend (in-memory store, file store, OS
/// keyring, interactive prompt) or a middleware that wraps other keepers
/// (router, seq, policy, cache, RPC client). Every implementation exposes
/// exactly these seven operations; middleware composes by delegating to
/// children behind `Arc<dyn Keeper>`.
///
/// Within a single keeper, operations are sequentially consistent per
/// caller task. Across a middleware composition the guarantees reduce to
/// those of the innermost backend touched.
#[async_trait]
pub trait Keeper: Send + Sync + std::fmt::Debug {
    /// List the locations present in this keeper. Order is unspecified and
    /// the empty string (the root location) may appear.
    async fn list_locations(&self) -> SecretResult<Vec<String>>;

    /// List the ids of the secrets stored in the given location.
    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>>;

    /// Retrieve the identified secret.
    async fn get_secret(&self, id: &str) -> SecretResult<Secret>;

    /// Retrieve every secret with the given name. The result may be empty.
    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>>;

    /// Persist the given secret, allocating an id if the secret is a draft
    /// or its id is unknown, and upserting in place otherwise. Returns the
    /// persisted secret with a non-empty id.
    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret>;

    /// Copy the identified secret into a new location, leaving the
    /// original untouched. The copy gets a fresh id.
    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret>;

    /// Move the identified secret into a new location, removing it from
    /// the old one. The id stays stable where the backend allows it.
    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret>;

    /// Remove the identified secret. Deleting an absent secret is treated
    /// as success by most callers.
    async fn delete_secret(&self, id: &str) -> SecretResult<()>;
}

/// Collect every secret stored in one location of a keeper.
///
/// Secrets that vanish between the id listing and the fetch are skipped
/// rather than failing the walk.
pub async fn collect_location(keeper: &dyn Keeper, location: &str) -> SecretResult<Vec<Secret>> {
    let ids = keeper.list_secrets(location).await?;
    let mut secrets = Vec::with_capacity(ids.len());
    for id in ids {
        match keeper.get_secret(&id).await {
            Ok(sec) => secrets.push(sec),
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(secrets)
}

/// Collect every secret reachable from a keeper, across all locations.
pub async fn collect_all(keeper: &dyn Keeper) -> SecretResult<Vec<Secret>> {
    let mut secrets = Vec::new();
    for location in keeper.list_locations().await? {
        secrets.extend(collect_location(keeper, &location).await?);
    }
    Ok(secrets)
}
