//! The keeper contract, exercised uniformly against every writable
//! backend. Each backend must satisfy the same observable behavior, no
//! matter how it stores its secrets.

use ghost::secrets::low::LowSecurityKeeper;
use ghost::secrets::memory::MemoryKeeper;
use ghost::secrets::{Keeper, Secret};

async fn exercise_contract(keeper: &dyn Keeper) {
    // A fresh store is empty.
    assert!(keeper.list_locations().await.unwrap().is_empty());

    // Drafts get ids; reads agree with what was written.
    let stored = keeper
        .set_secret(
            Secret::new("github", "alice", "hunter2")
                .with_kind("login")
                .with_field("otp", "123456"),
        )
        .await
        .unwrap();
    assert!(!stored.id().is_empty());

    let fetched = keeper.get_secret(stored.id()).await.unwrap();
    assert_eq!(fetched.name(), "github");
    assert_eq!(fetched.username(), "alice");
    assert_eq!(fetched.password(), "hunter2");
    assert_eq!(fetched.kind(), "login");
    assert_eq!(fetched.field("otp"), Some("123456"));

    // Upsert in place keeps the id.
    let updated = keeper
        .set_secret(fetched.clone().with_password("rotated"))
        .await
        .unwrap();
    assert_eq!(updated.id(), stored.id());
    assert_eq!(
        keeper.get_secret(stored.id()).await.unwrap().password(),
        "rotated"
    );

    // Lookup by name finds it; an unknown name finds nothing.
    let named = keeper.get_secrets_by_name("github").await.unwrap();
    assert_eq!(named.len(), 1);
    assert!(keeper
        .get_secrets_by_name("unheard-of")
        .await
        .unwrap()
        .is_empty());

    // Copy: fresh id, new location, original untouched.
    let copy = keeper.copy_secret(stored.id(), "work").await.unwrap();
    assert_ne!(copy.id(), stored.id());
    assert_eq!(copy.location(), "work");
    assert_eq!(keeper.get_secret(stored.id()).await.unwrap().location(), "");

    // Locations now list both, each holding the right ids.
    let locations = keeper.list_locations().await.unwrap();
    assert!(locations.contains(&String::new()));
    assert!(locations.contains(&"work".to_string()));
    assert_eq!(
        keeper.list_secrets("work").await.unwrap(),
        vec![copy.id().to_string()]
    );

    // Move: same id for these backends, gone from the old location.
    let moved = keeper.move_secret(stored.id(), "archive").await.unwrap();
    assert_eq!(moved.id(), stored.id());
    assert_eq!(moved.location(), "archive");
    assert!(keeper.list_secrets("").await.unwrap().is_empty());

    // Reads never return a secret without an id.
    for location in keeper.list_locations().await.unwrap() {
        for id in keeper.list_secrets(&location).await.unwrap() {
            assert!(!keeper.get_secret(&id).await.unwrap().id().is_empty());
        }
    }

    // Deletes are idempotent; missing ids read as not found.
    keeper.delete_secret(copy.id()).await.unwrap();
    keeper.delete_secret(copy.id()).await.unwrap();
    assert!(keeper
        .get_secret(copy.id())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(keeper
        .get_secret("never-existed")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn memory_keeper_honors_the_contract() {
    let keeper = MemoryKeeper::new();
    exercise_contract(&keeper).await;
}

#[tokio::test]
async fn low_security_keeper_honors_the_contract() {
    let dir = tempfile::tempdir().unwrap();
    let keeper = LowSecurityKeeper::open(dir.path().join("secrets.yaml")).unwrap();
    exercise_contract(&keeper).await;
}
