//! Per-issuer JWKS cache with throttled, single-flight refresh.
//!
//! Each registered issuer owns one [`KeyMaterial`] snapshot. Readers clone an
//! `Arc` under a short read lock; a refresh fetches and parses outside any
//! lock and swaps the new snapshot in under a write lock held only for the
//! assignment. A reader therefore sees either the old set or the new one,
//! never a mix.
//!
//! ## Refresh rules
//!
//! - At most one fetch per issuer is in flight. The in-flight flag is an
//!   [`AtomicBool`] claimed by compare-and-swap; contenders fail fast with
//!   [`JwksError::RefreshInProgress`] instead of waiting.
//! - Once an issuer has refreshed successfully, further refreshes within the
//!   minimum interval (default 10s) of the last attempt are no-ops.
//! - A fetched set with zero keys, or with no structurally valid key, is a
//!   failure. The previous snapshot stays in place.
//!
//! ## Fail points
//!
//! With the `failpoints` feature, `jwks-before-fetch` fires after the
//! in-flight flag is claimed and before the network call.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use fail::fail_point;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk},
};
use p521::ecdsa::VerifyingKey as P521VerifyingKey;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    claims::Claims,
    error::{AuthError, JwksError},
    jwt::{verify_es512, verify_with_key},
    validation::VerifierAlgorithm,
};

/// Default minimum interval between refreshes of one issuer (10 seconds).
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Default JWKS fetch timeout (5 seconds).
pub const DEFAULT_JWKS_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte length of a P-521 field element.
const P521_COORDINATE_LEN: usize = 66;

/// Intended use of a key, from the JWK `use` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    /// `use` is `"sig"` or absent.
    Signing,
    /// Any other declared use (usually `"enc"`).
    Other,
}

/// One structurally valid public key from a JWK set.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    alg: Option<String>,
    key_use: KeyUse,
    kty: String,
    curve: Option<String>,
    decoding_key: DecodingKey,
    p521_key: Option<P521VerifyingKey>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("key_use", &self.key_use)
            .field("kty", &self.kty)
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Parse and structurally validate one JWK.
    ///
    /// A key is valid when it deserializes as a JWK and converts into a
    /// verifier key. The returned error string describes why it did not.
    ///
    /// # Errors
    ///
    /// Returns a description of the first structural problem found.
    pub fn from_jwk_value(value: &Value) -> Result<Self, String> {
        let jwk: Jwk = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| e.to_string())?;
        let p521_key = match &jwk.algorithm {
            AlgorithmParameters::EllipticCurve(params) if params.curve == EllipticCurve::P521 => {
                Some(p521_key_from_coordinates(&params.x, &params.y)?)
            },
            _ => None,
        };

        let str_param =
            |name: &str| value.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
        let key_use = match str_param("use") {
            None | Some("sig") => KeyUse::Signing,
            Some(_) => KeyUse::Other,
        };

        Ok(Self {
            kid: jwk.common.key_id.filter(|kid| !kid.is_empty()),
            alg: str_param("alg").map(str::to_owned),
            key_use,
            kty: str_param("kty").unwrap_or_default().to_owned(),
            curve: str_param("crv").map(str::to_owned),
            decoding_key,
            p521_key,
        })
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Declared algorithm, if any.
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Declared use.
    #[must_use]
    pub fn key_use(&self) -> KeyUse {
        self.key_use
    }

    /// JWK key type (`RSA`, `EC`, `OKP`, `oct`).
    #[must_use]
    pub fn kty(&self) -> &str {
        &self.kty
    }

    /// Key usable by the verifier.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// P-521 public key, present for `crv: P-521` EC keys.
    #[must_use]
    pub fn p521_key(&self) -> Option<&P521VerifyingKey> {
        self.p521_key.as_ref()
    }

    /// Verify `token` with this key under `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] when an ES512 token meets a key
    /// that is not P-521, and otherwise whatever the verifier reports.
    pub fn verify(
        &self,
        token: &str,
        algorithm: VerifierAlgorithm,
        issuer: &str,
    ) -> Result<Claims, AuthError> {
        match algorithm {
            VerifierAlgorithm::Jwt(alg) => verify_with_key(token, &self.decoding_key, alg, issuer),
            VerifierAlgorithm::Es512 => match &self.p521_key {
                Some(key) => verify_es512(token, key, issuer),
                None => Err(AuthError::invalid_key(format!(
                    "key '{}' is not a P-521 key",
                    self.kid().unwrap_or_default()
                ))),
            },
        }
    }

    /// Returns `true` if this key may verify tokens signed with `alg`.
    ///
    /// A declared `alg` must match exactly. Without one, the key type (and
    /// curve, for EC and OKP keys) must fit the algorithm family.
    #[must_use]
    pub fn supports(&self, alg: &str) -> bool {
        if let Some(declared) = &self.alg {
            return declared == alg;
        }

        let curve = self.curve.as_deref();
        match alg {
            "RS256" | "RS384" | "RS512" | "PS256" | "PS384" | "PS512" => self.kty == "RSA",
            "ES256" => self.kty == "EC" && curve == Some("P-256"),
            "ES384" => self.kty == "EC" && curve == Some("P-384"),
            "ES512" => self.kty == "EC" && curve == Some("P-521"),
            "EdDSA" => self.kty == "OKP" && curve == Some("Ed25519"),
            "HS256" | "HS384" | "HS512" => self.kty == "oct",
            _ => false,
        }
    }
}

/// Builds a P-521 key from base64url `x` and `y`, left-padding short
/// coordinates to the field size.
fn p521_key_from_coordinates(x: &str, y: &str) -> Result<P521VerifyingKey, String> {
    let mut sec1 = Vec::with_capacity(1 + 2 * P521_COORDINATE_LEN);
    sec1.push(0x04);
    for coordinate in [x, y] {
        let bytes = URL_SAFE_NO_PAD.decode(coordinate).map_err(|e| e.to_string())?;
        if bytes.len() > P521_COORDINATE_LEN {
            return Err(format!("P-521 coordinate is {} bytes", bytes.len()));
        }
        sec1.resize(sec1.len() + P521_COORDINATE_LEN - bytes.len(), 0);
        sec1.extend_from_slice(&bytes);
    }
    P521VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| "invalid P-521 public key".to_owned())
}

#[derive(Deserialize)]
struct JwkSetDocument {
    keys: Vec<Value>,
}

/// A verified snapshot of one issuer's public keys.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    keys: Vec<Arc<VerificationKey>>,
    refreshed_at: DateTime<Utc>,
}

impl KeyMaterial {
    /// Parse a JWK set document.
    ///
    /// Invalid keys are dropped; the count of dropped keys is returned
    /// alongside the material.
    ///
    /// # Errors
    ///
    /// - [`JwksError::Parse`] if the body is not a `{"keys": [...]}` document
    /// - [`JwksError::EmptyKeySet`] if `keys` is empty
    /// - [`JwksError::NoValidKeys`] if every key is invalid
    pub fn from_json(body: &str) -> Result<(Self, usize), JwksError> {
        let document: JwkSetDocument =
            serde_json::from_str(body).map_err(|e| JwksError::parse(e.to_string()))?;

        if document.keys.is_empty() {
            return Err(JwksError::EmptyKeySet);
        }

        let mut keys = Vec::with_capacity(document.keys.len());
        let mut invalid = 0;
        for raw in &document.keys {
            match VerificationKey::from_jwk_value(raw) {
                Ok(key) => keys.push(Arc::new(key)),
                Err(reason) => {
                    invalid += 1;
                    tracing::debug!(
                        kid = raw.get("kid").and_then(serde_json::Value::as_str).unwrap_or_default(),
                        reason = %reason,
                        "Skipping invalid JWK"
                    );
                },
            }
        }

        if keys.is_empty() {
            return Err(JwksError::NoValidKeys { invalid });
        }

        Ok((Self { keys, refreshed_at: Utc::now() }, invalid))
    }

    /// Number of valid keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if there are no keys. Never the case for material
    /// built by [`from_json`](Self::from_json).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key IDs of all keys that have one.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        self.keys.iter().filter_map(|k| k.kid()).collect()
    }

    /// When this snapshot was fetched.
    #[must_use]
    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Find a key by `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.iter().find(|k| k.kid() == Some(kid)).cloned()
    }

    /// All keys supporting `alg`, signing keys first, otherwise in document
    /// order.
    #[must_use]
    pub fn by_algorithm(&self, alg: &str) -> Vec<Arc<VerificationKey>> {
        let (mut signing, other): (Vec<_>, Vec<_>) = self
            .keys
            .iter()
            .filter(|k| k.supports(alg))
            .cloned()
            .partition(|k| k.key_use() == KeyUse::Signing);
        signing.extend(other);
        signing
    }
}

/// Source of raw JWKS documents.
///
/// The production implementation is [`HttpJwksFetcher`]; tests substitute a
/// scripted fetcher.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the JWKS document at `url`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::Fetch`] on network failure, timeout or a
    /// non-200 response.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, JwksError>;
}

/// [`JwksFetcher`] over HTTPS using `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Creates a fetcher with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher that reuses an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, JwksError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| JwksError::fetch_with_source("request failed", e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(JwksError::fetch(format!("unexpected status {status}")));
        }

        response.text().await.map_err(|e| JwksError::fetch_with_source("failed to read body", e))
    }
}

/// Result of a successful [`JwksStore::refresh`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New material was fetched and installed.
    Refreshed,
    /// Skipped because the last attempt was too recent.
    Throttled,
}

#[derive(Debug, Default)]
struct RefreshTimes {
    last_attempt: Option<Instant>,
    last_success: Option<Instant>,
}

struct IssuerEntry {
    url: String,
    timeout: Duration,
    material: RwLock<Option<Arc<KeyMaterial>>>,
    refreshing: AtomicBool,
    times: Mutex<RefreshTimes>,
}

/// Releases the in-flight flag on drop, including when the refresh future
/// is cancelled mid-fetch.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// JWKS cache for every configured issuer.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use forge_common_authn::jwks::{HttpJwksFetcher, JwksStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = JwksStore::new(Arc::new(HttpJwksFetcher::new()));
/// store.register(
///     "https://idp.example.com/realms/forge",
///     "https://idp.example.com/realms/forge/protocol/openid-connect/certs",
///     Duration::from_secs(5),
/// );
///
/// store.refresh("https://idp.example.com/realms/forge").await?;
/// let key = store.lookup("https://idp.example.com/realms/forge", "key-1")?;
/// # Ok(())
/// # }
/// ```
pub struct JwksStore {
    entries: RwLock<HashMap<String, Arc<IssuerEntry>>>,
    fetcher: Arc<dyn JwksFetcher>,
    min_refresh_interval: Duration,
}

impl fmt::Debug for JwksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksStore")
            .field("issuers", &self.entries.read().len())
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}

impl JwksStore {
    /// Creates an empty store with the default refresh interval.
    #[must_use]
    pub fn new(fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self::with_min_refresh_interval(fetcher, DEFAULT_MIN_REFRESH_INTERVAL)
    }

    /// Creates an empty store with a custom minimum refresh interval.
    #[must_use]
    pub fn with_min_refresh_interval(
        fetcher: Arc<dyn JwksFetcher>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self { entries: RwLock::new(HashMap::new()), fetcher, min_refresh_interval }
    }

    /// Register an issuer with empty key material, replacing any previous
    /// entry for the same issuer.
    pub fn register(&self, issuer: &str, jwks_url: &str, timeout: Duration) {
        let entry = IssuerEntry {
            url: jwks_url.to_owned(),
            timeout,
            material: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            times: Mutex::new(RefreshTimes::default()),
        };
        self.entries.write().insert(issuer.to_owned(), Arc::new(entry));
    }

    /// Discard an issuer and its key material. Returns `true` if it existed.
    pub fn remove(&self, issuer: &str) -> bool {
        self.entries.write().remove(issuer).is_some()
    }

    /// Returns `true` if the issuer is registered.
    #[must_use]
    pub fn contains(&self, issuer: &str) -> bool {
        self.entries.read().contains_key(issuer)
    }

    /// Current key material for an issuer, if it has ever refreshed.
    #[must_use]
    pub fn key_material(&self, issuer: &str) -> Option<Arc<KeyMaterial>> {
        self.entry(issuer).ok().and_then(|entry| entry.material.read().clone())
    }

    fn entry(&self, issuer: &str) -> Result<Arc<IssuerEntry>, JwksError> {
        self.entries.read().get(issuer).cloned().ok_or_else(|| JwksError::not_configured(issuer))
    }

    fn material(&self, issuer: &str) -> Result<Arc<KeyMaterial>, JwksError> {
        self.entry(issuer)?
            .material
            .read()
            .clone()
            .ok_or_else(|| JwksError::not_initialized(issuer))
    }

    /// Fetch and install fresh key material for `issuer`.
    ///
    /// # Errors
    ///
    /// - [`JwksError::NotConfigured`] if the issuer is unknown or has no URL
    /// - [`JwksError::RefreshInProgress`] if another refresh holds the flag
    /// - [`JwksError::Fetch`], [`JwksError::Parse`], [`JwksError::EmptyKeySet`] or
    ///   [`JwksError::NoValidKeys`] if the fetch fails; existing material is kept
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, issuer: &str) -> Result<RefreshOutcome, JwksError> {
        let entry = self.entry(issuer)?;
        if entry.url.is_empty() {
            return Err(JwksError::not_configured(issuer));
        }

        if entry
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("JWKS refresh already in progress");
            return Err(JwksError::RefreshInProgress);
        }
        let _guard = RefreshGuard(&entry.refreshing);

        {
            let mut times = entry.times.lock();
            if times.last_success.is_some()
                && times.last_attempt.is_some_and(|at| at.elapsed() < self.min_refresh_interval)
            {
                tracing::debug!("JWKS refresh throttled");
                return Ok(RefreshOutcome::Throttled);
            }
            times.last_attempt = Some(Instant::now());
        }

        fail_point!("jwks-before-fetch", |_| {
            Err(JwksError::fetch("injected failure before JWKS fetch"))
        });

        let body = self.fetcher.fetch(&entry.url, entry.timeout).await.inspect_err(|e| {
            tracing::warn!(url = %entry.url, error = %e, "JWKS fetch failed");
        })?;

        let (material, invalid) = KeyMaterial::from_json(&body).inspect_err(|e| {
            tracing::warn!(url = %entry.url, error = %e, "JWKS document rejected");
        })?;
        let key_count = material.len();

        *entry.material.write() = Some(Arc::new(material));
        entry.times.lock().last_success = Some(Instant::now());

        tracing::info!(keys = key_count, invalid_keys = invalid, "JWKS refreshed");
        Ok(RefreshOutcome::Refreshed)
    }

    /// Look up a key by `kid`.
    ///
    /// # Errors
    ///
    /// - [`JwksError::NotConfigured`] if the issuer is unknown
    /// - [`JwksError::NotInitialized`] if the issuer never refreshed
    /// - [`JwksError::KeyNotFound`] if no key has this `kid`
    pub fn lookup(&self, issuer: &str, kid: &str) -> Result<Arc<VerificationKey>, JwksError> {
        let material = self.material(issuer)?;
        match material.find(kid) {
            Some(key) => {
                tracing::debug!(kid = %kid, "JWKS key hit");
                Ok(key)
            },
            None => {
                tracing::debug!(kid = %kid, "JWKS key miss");
                Err(JwksError::key_not_found(kid))
            },
        }
    }

    /// All keys usable with `alg`, signing keys first.
    ///
    /// # Errors
    ///
    /// - [`JwksError::NotConfigured`] if the issuer is unknown
    /// - [`JwksError::NotInitialized`] if the issuer never refreshed
    /// - [`JwksError::UnsupportedAlgorithm`] if no key supports `alg`
    pub fn lookup_by_algorithm(
        &self,
        issuer: &str,
        alg: &str,
    ) -> Result<Vec<Arc<VerificationKey>>, JwksError> {
        let candidates = self.material(issuer)?.by_algorithm(alg);
        if candidates.is_empty() {
            return Err(JwksError::unsupported_algorithm(alg));
        }
        Ok(candidates)
    }
}
