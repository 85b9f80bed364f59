//! Concurrent access tests for `MemoryIdentityStore`.
//!
//! Many requests for the same caller can arrive at once; the store must
//! still hand every one of them the same record.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc};

use forge_common_identity::{
    IdentityStore, MemoryIdentityStore, UserUpdate, assert_identity_error,
    testutil::{org_data, org_entry},
};
use tokio::task::JoinSet;

/// Number of concurrent tasks.
const CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Test: Racing first logins create exactly one record
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_get_or_create_yields_one_record() {
    let store = Arc::new(MemoryIdentityStore::new());

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let store = Arc::clone(&store);
        set.spawn(async move { store.get_or_create("racer").await.expect("get_or_create") });
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    while let Some(result) = set.join_next().await {
        let (user, was_created) = result.expect("task should not panic");
        ids.insert(user.id);
        if was_created {
            created += 1;
        }
    }

    assert_eq!(ids.len(), 1, "every caller sees the same record");
    assert_eq!(created, 1, "exactly one caller creates it");
    assert_eq!(store.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: Distinct callers never share records
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_distinct_callers_get_distinct_ids() {
    let store = Arc::new(MemoryIdentityStore::new());

    let mut set = JoinSet::new();
    for i in 0..CONCURRENCY {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let (user, _) =
                store.get_or_create(&format!("caller-{i:03}")).await.expect("get_or_create");
            user.id
        });
    }

    let mut ids = HashSet::new();
    while let Some(result) = set.join_next().await {
        ids.insert(result.expect("task should not panic"));
    }
    assert_eq!(ids.len(), CONCURRENCY);
}

// ---------------------------------------------------------------------------
// Test: Updates are visible to later lookups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_is_visible_through_every_lookup() {
    let store = MemoryIdentityStore::new();
    let (user, _) = store.get_or_create("jane").await.expect("get_or_create");

    let memberships = org_data([org_entry("acme", "Acme Corp", &["FORGE_TENANT_ADMIN"], None)]);
    let update = UserUpdate::builder().email("jane@acme.test").org_data(memberships.clone()).build();
    let updated = store.update(user.id, update).await.expect("update");

    let (again, created) = store.get_or_create("jane").await.expect("get_or_create");
    assert!(!created);
    assert_eq!(again, updated);
    assert_eq!(again.org_data, memberships);

    let found = store.find_by_auxiliary_id("jane").await.expect("find").expect("present");
    assert_eq!(found.email.as_deref(), Some("jane@acme.test"));
}

#[tokio::test]
async fn blank_auxiliary_id_is_invalid_input() {
    let store = MemoryIdentityStore::new();
    let result = store.get_or_create("   ").await;
    assert_identity_error!(result, InvalidInput);
    assert!(store.is_empty());
}
