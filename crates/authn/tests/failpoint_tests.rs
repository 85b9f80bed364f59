#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p forge-common-authn --features failpoints,testutil --test failpoint_tests
//! ```

use std::sync::Arc;

use forge_common_authn::{
    DEFAULT_JWKS_TIMEOUT, JwksError, JwksStore, RefreshOutcome,
    testutil::{ScriptedFetcher, TestKeyPair, jwks_document},
};

const ISSUER: &str = "https://idp.forge.test";

fn setup_store_with_key() -> (Arc<JwksStore>, Arc<ScriptedFetcher>, TestKeyPair) {
    let key = TestKeyPair::generate("fp-test-key");
    let fetcher = Arc::new(ScriptedFetcher::serving(jwks_document(&[key.jwk()])));
    let store = Arc::new(JwksStore::new(fetcher.clone()));
    store.register(ISSUER, "https://idp.forge.test/jwks", DEFAULT_JWKS_TIMEOUT);
    (store, fetcher, key)
}

#[tokio::test]
async fn jwks_fetch_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    let (store, fetcher, _) = setup_store_with_key();

    // Enable fail point; the fetch is never attempted
    fail::cfg("jwks-before-fetch", "return").expect("failed to configure fail point");

    let result = store.refresh(ISSUER).await;
    assert!(matches!(result, Err(JwksError::Fetch { .. })), "got: {result:?}");
    assert_eq!(fetcher.calls(), 0);
    assert!(store.key_material(ISSUER).is_none(), "no material installed on failure");

    scenario.teardown();
}

#[tokio::test]
async fn jwks_fetch_failpoint_releases_refresh_flag() {
    let scenario = fail::FailScenario::setup();
    let (store, _, key) = setup_store_with_key();

    fail::cfg("jwks-before-fetch", "return").expect("failed to configure fail point");
    assert!(store.refresh(ISSUER).await.is_err());
    fail::remove("jwks-before-fetch");

    let outcome = store.refresh(ISSUER).await.expect("refresh after fail point is removed");
    assert_eq!(outcome, RefreshOutcome::Refreshed);
    assert!(store.lookup(ISSUER, key.kid()).is_ok());

    scenario.teardown();
}

#[tokio::test]
async fn jwks_fetch_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let (store, fetcher, _) = setup_store_with_key();

    // No fail point configured, so the fetch goes through
    let result = store.refresh(ISSUER).await;
    assert!(result.is_ok(), "refresh should succeed without fail point");
    assert_eq!(fetcher.calls(), 1);

    scenario.teardown();
}
