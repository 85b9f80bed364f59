//! [`HttpJwksFetcher`] against a local HTTP server.

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use forge_common_authn::{
    AuthRequest, HttpJwksFetcher, IssuerConfig, JwksError, JwksStore, OriginKind, OriginRegistry,
    RefreshOutcome,
    testutil::{TestKeyPair, jwks_document},
};
use forge_common_identity::MemoryIdentityStore;
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use serde_json::{Value, json};

const ISSUER: &str = "https://idp.forge.test";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server runs");
    });
    format!("http://{addr}")
}

fn store_for(url: &str, timeout: Duration) -> JwksStore {
    let store = JwksStore::new(Arc::new(HttpJwksFetcher::new()));
    store.register(ISSUER, url, timeout);
    store
}

#[tokio::test]
async fn http_fetch_installs_keys() {
    let key = TestKeyPair::generate("http-key");
    let document = jwks_document(&[key.jwk()]);
    let base = serve(Router::new().route("/certs", get(move || async move { Json(document) }))).await;

    let store = store_for(&format!("{base}/certs"), Duration::from_secs(5));
    let outcome = store.refresh(ISSUER).await.expect("refresh succeeds");

    assert_eq!(outcome, RefreshOutcome::Refreshed);
    assert!(store.lookup(ISSUER, "http-key").is_ok());
}

#[tokio::test]
async fn http_error_status_is_a_fetch_error() {
    let base = serve(Router::new().route(
        "/certs",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream broke") }),
    ))
    .await;

    let store = store_for(&format!("{base}/certs"), Duration::from_secs(5));
    let result = store.refresh(ISSUER).await;
    assert!(matches!(result, Err(JwksError::Fetch { .. })), "got: {result:?}");
}

#[tokio::test]
async fn http_missing_route_is_a_fetch_error() {
    let base = serve(Router::new()).await;

    let store = store_for(&format!("{base}/certs"), Duration::from_secs(5));
    let result = store.refresh(ISSUER).await;
    assert!(matches!(result, Err(JwksError::Fetch { .. })), "got: {result:?}");
}

#[tokio::test]
async fn http_slow_endpoint_times_out() {
    let base = serve(Router::new().route(
        "/certs",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"keys": []}))
        }),
    ))
    .await;

    let store = store_for(&format!("{base}/certs"), Duration::from_millis(100));
    let result = store.refresh(ISSUER).await;
    assert!(matches!(result, Err(JwksError::Fetch { .. })), "got: {result:?}");
}

#[tokio::test]
async fn http_body_that_is_not_a_key_set_is_rejected() {
    let base = serve(Router::new().route("/certs", get(|| async { "<html>login</html>" }))).await;

    let store = store_for(&format!("{base}/certs"), Duration::from_secs(5));
    let result = store.refresh(ISSUER).await;
    assert!(matches!(result, Err(JwksError::Parse { .. })), "got: {result:?}");
}

#[tokio::test]
async fn registry_authenticates_against_live_endpoint() {
    let key = TestKeyPair::generate("live-key");
    let hits = Arc::new(AtomicUsize::new(0));
    let document: Value = jwks_document(&[key.jwk()]);

    let router = Router::new()
        .route(
            "/certs",
            get(|State((hits, document)): State<(Arc<AtomicUsize>, Value)>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(document)
            }),
        )
        .with_state((Arc::clone(&hits), document));
    let base = serve(router).await;

    let registry = OriginRegistry::builder()
        .fetcher(Arc::new(HttpJwksFetcher::new()))
        .identity(Arc::new(MemoryIdentityStore::new()))
        .build();
    registry
        .add_issuer(
            IssuerConfig::builder()
                .name("forge-idp")
                .issuer(ISSUER)
                .jwks_url(format!("{base}/certs"))
                .origin(OriginKind::Keycloak)
                .build()
                .expect("valid issuer"),
        )
        .expect("issuer registers");
    registry.refresh_all().await.expect("refresh succeeds");

    let token = key.sign(&json!({
        "iss": ISSUER,
        "sub": "live-user",
        "exp": Utc::now().timestamp() + 3600,
        "realm_access": {"roles": ["acme:FORGE_TENANT_USER"]},
    }));
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    );

    let authenticated =
        registry.authenticate(&AuthRequest::new(headers, "acme")).await.expect("authenticated");
    assert_eq!(authenticated.user.auxiliary_id, "live-user");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "cached keys are reused");
}
