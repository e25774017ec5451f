//! Keyed replication between keepers.
//!
//! The sync engine gathers secrets from one or more sources into an
//! internal memory keeper, indexed by the `(name, username, location)`
//! identity key, then copies them into a destination keeper. Copies are
//! additive by default; overwriting and pruning are opt-in.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::secrets::memory::MemoryKeeper;
use crate::secrets::{Keeper, Secret, SecretError, SecretResult};

/// The identity key secrets are reconciled by across keepers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
    /// The secret's name.
    pub name: String,
    /// The secret's username.
    pub username: String,
    /// The secret's location.
    pub location: String,
}

impl SyncKey {
    fn of(secret: &Secret) -> Self {
        Self {
            name: secret.name().to_string(),
            username: secret.username().to_string(),
            location: secret.location().to_string(),
        }
    }
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.name, self.username)
    }
}

struct IndexEntry {
    cache_id: String,
    last_modified: DateTime<Utc>,
}

/// Options controlling duplicate handling and copy behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Keep the most recently modified secret when two sources share a
    /// key, instead of failing with a duplicate error.
    pub ignore_duplicates: bool,

    /// Overwrite the most recently modified matching secret in the
    /// destination instead of skipping keys the destination already has.
    pub overwrite_matching: bool,
}

/// An engine for copying secrets between keepers.
///
/// Fill the engine with `add_secret`, `add_location`, or `add_keeper`,
/// then push the gathered set with `copy_to` and optionally prune with
/// `delete_absent`.
///
/// Field deletion is not modeled: a field removed at the source stays
/// behind in a destination secret written by an earlier sync.
pub struct Sync {
    gatherer: MemoryKeeper,
    index: HashMap<SyncKey, IndexEntry>,
}

impl Sync {
    /// Create an empty sync engine.
    pub fn new() -> Self {
        Self {
            gatherer: MemoryKeeper::new(),
            index: HashMap::new(),
        }
    }

    /// How many distinct keys have been gathered.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether anything has been gathered.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The gathered keys.
    pub fn keys(&self) -> impl Iterator<Item = &SyncKey> {
        self.index.keys()
    }

    async fn index_secret(&mut self, secret: &Secret) -> SecretResult<()> {
        let gathered = self
            .gatherer
            .set_secret(secret.clone().with_id(""))
            .await?;
        self.index.insert(
            SyncKey::of(secret),
            IndexEntry {
                cache_id: gathered.id().to_string(),
                last_modified: secret.last_modified(),
            },
        );
        Ok(())
    }

    /// Add one secret to the set to be copied.
    ///
    /// A second secret with the same key fails with a duplicate error
    /// unless `ignore_duplicates` is set, in which case the one with the
    /// later modification time wins.
    pub async fn add_secret(&mut self, secret: &Secret, opts: SyncOptions) -> SecretResult<()> {
        let key = SyncKey::of(secret);
        if let Some(existing) = self.index.get(&key) {
            if !opts.ignore_duplicates {
                return Err(SecretError::Duplicate(key.to_string()));
            }
            if secret.last_modified() <= existing.last_modified {
                return Ok(());
            }
        }
        self.index_secret(secret).await
    }

    /// Add every secret in one location of the source keeper.
    pub async fn add_location(
        &mut self,
        from: &dyn Keeper,
        location: &str,
        opts: SyncOptions,
    ) -> SecretResult<()> {
        tracing::debug!(location = %location, "gathering location for sync");
        for secret in crate::secrets::collect_location(from, location).await? {
            self.add_secret(&secret, opts).await?;
        }
        Ok(())
    }

    /// Add every secret reachable from the source keeper.
    pub async fn add_keeper(&mut self, from: &dyn Keeper, opts: SyncOptions) -> SecretResult<()> {
        for location in from.list_locations().await? {
            self.add_location(from, &location, opts).await?;
        }
        Ok(())
    }

    /// Copy every gathered secret into the destination keeper.
    ///
    /// Keys the destination already holds are skipped, unless
    /// `overwrite_matching` is set, in which case the most recently
    /// modified matching destination secret is overwritten in place.
    /// Returns how many secrets were written.
    pub async fn copy_to(&self, dest: &dyn Keeper, opts: SyncOptions) -> SecretResult<usize> {
        let mut written = 0;
        for (key, entry) in &self.index {
            let matching: Vec<Secret> = dest
                .get_secrets_by_name(&key.name)
                .await?
                .into_iter()
                .filter(|sec| sec.username() == key.username && sec.location() == key.location)
                .collect();

            let target_id = match matching.iter().max_by_key(|sec| sec.last_modified()) {
                None => String::new(),
                Some(best) if opts.overwrite_matching => best.id().to_string(),
                Some(_) => {
                    tracing::debug!(key = %key, "destination already has secret, skipping");
                    continue;
                }
            };

            let gathered = self.gatherer.get_secret(&entry.cache_id).await?;
            let action = if target_id.is_empty() { "copying" } else { "overwriting" };
            tracing::info!(key = %key, "{} secret", action);

            dest.set_secret(gathered.with_id(target_id)).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Delete every secret in the destination whose key was not gathered.
    /// Returns how many secrets were deleted.
    pub async fn delete_absent(&self, dest: &dyn Keeper, _opts: SyncOptions) -> SecretResult<usize> {
        let mut deleted = 0;
        for location in dest.list_locations().await? {
            for secret in crate::secrets::collect_location(dest, &location).await? {
                if !self.index.contains_key(&SyncKey::of(&secret)) {
                    tracing::info!(key = %SyncKey::of(&secret), "deleting absent secret");
                    dest.delete_secret(secret.id()).await?;
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

impl Default for Sync {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sync").field("keys", &self.index.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dup_pair() -> (Secret, Secret) {
        let older = Secret::new("db", "svc", "old-pass")
            .with_location("work")
            .with_last_modified(Utc::now() - Duration::hours(2));
        let newer = Secret::new("db", "svc", "new-pass")
            .with_location("work")
            .with_last_modified(Utc::now());
        (older, newer)
    }

    #[tokio::test]
    async fn test_duplicate_rejected_by_default() {
        let (older, newer) = dup_pair();
        let mut sync = Sync::new();
        sync.add_secret(&older, SyncOptions::default()).await.unwrap();
        let err = sync
            .add_secret(&newer, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_ignore_duplicates_keeps_latest() {
        let (older, newer) = dup_pair();
        let opts = SyncOptions {
            ignore_duplicates: true,
            ..Default::default()
        };

        // Later one wins whichever order they arrive in.
        for pair in [[&older, &newer], [&newer, &older]] {
            let mut sync = Sync::new();
            sync.add_secret(pair[0], opts).await.unwrap();
            sync.add_secret(pair[1], opts).await.unwrap();
            assert_eq!(sync.len(), 1);

            let dest = MemoryKeeper::new();
            sync.copy_to(&dest, opts).await.unwrap();
            let copied = dest.get_secrets_by_name("db").await.unwrap();
            assert_eq!(copied.len(), 1);
            assert_eq!(copied[0].password(), "new-pass");
        }
    }

    #[tokio::test]
    async fn test_add_keeper_gathers_everything() {
        let source = MemoryKeeper::new();
        source
            .set_secret(Secret::new("a", "u", "p"))
            .await
            .unwrap();
        source
            .set_secret(Secret::new("b", "u", "p").with_location("work"))
            .await
            .unwrap();

        let mut sync = Sync::new();
        sync.add_keeper(&source, SyncOptions::default()).await.unwrap();
        assert_eq!(sync.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_is_additive_by_default() {
        let source = MemoryKeeper::new();
        source
            .set_secret(Secret::new("db", "svc", "from-source"))
            .await
            .unwrap();

        let dest = MemoryKeeper::new();
        let existing = dest
            .set_secret(Secret::new("db", "svc", "already-here"))
            .await
            .unwrap();

        let mut sync = Sync::new();
        sync.add_keeper(&source, SyncOptions::default()).await.unwrap();
        let written = sync.copy_to(&dest, SyncOptions::default()).await.unwrap();
        assert_eq!(written, 0);

        // Unchanged, same id.
        let kept = dest.get_secret(existing.id()).await.unwrap();
        assert_eq!(kept.password(), "already-here");
    }

    #[tokio::test]
    async fn test_copy_overwrites_most_recent_match() {
        let source = MemoryKeeper::new();
        source
            .set_secret(Secret::new("db", "svc", "fresh"))
            .await
            .unwrap();

        let dest = MemoryKeeper::new();
        dest.set_secret(
            Secret::new("db", "svc", "older").with_last_modified(Utc::now() - Duration::hours(3)),
        )
        .await
        .unwrap();
        let newest = dest
            .set_secret(
                Secret::new("db", "svc", "newer")
                    .with_last_modified(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();

        let mut sync = Sync::new();
        sync.add_keeper(&source, SyncOptions::default()).await.unwrap();
        let opts = SyncOptions {
            overwrite_matching: true,
            ..Default::default()
        };
        let written = sync.copy_to(&dest, opts).await.unwrap();
        assert_eq!(written, 1);

        let overwritten = dest.get_secret(newest.id()).await.unwrap();
        assert_eq!(overwritten.password(), "fresh");
    }

    #[tokio::test]
    async fn test_copy_creates_missing() {
        let source = MemoryKeeper::new();
        source
            .set_secret(
                Secret::new("db", "svc", "p")
                    .with_location("work")
                    .with_field("region", "eu"),
            )
            .await
            .unwrap();

        let dest = MemoryKeeper::new();
        let mut sync = Sync::new();
        sync.add_keeper(&source, SyncOptions::default()).await.unwrap();
        sync.copy_to(&dest, SyncOptions::default()).await.unwrap();

        let copied = dest.get_secrets_by_name("db").await.unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].location(), "work");
        assert_eq!(copied[0].field("region"), Some("eu"));
        assert!(!copied[0].id().is_empty());
    }

    #[tokio::test]
    async fn test_delete_absent_prunes_unindexed() {
        let source = MemoryKeeper::new();
        source
            .set_secret(Secret::new("keep", "u", "p"))
            .await
            .unwrap();

        let dest = MemoryKeeper::new();
        dest.set_secret(Secret::new("keep", "u", "p")).await.unwrap();
        let doomed = dest
            .set_secret(Secret::new("stray", "u", "p"))
            .await
            .unwrap();

        let mut sync = Sync::new();
        sync.add_keeper(&source, SyncOptions::default()).await.unwrap();
        let deleted = sync
            .delete_absent(&dest, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(dest.get_secret(doomed.id()).await.unwrap_err().is_not_found());
        assert_eq!(dest.get_secrets_by_name("keep").await.unwrap().len(), 1);
    }
}
