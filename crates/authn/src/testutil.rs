//! Shared test utilities for authentication testing.
//!
//! This module provides helpers for generating Ed25519 and P-521 key pairs
//! and their JWKs, minting signed JWTs with arbitrary claims, crafting raw JWT strings
//! (for attack testing) and a scripted [`JwksFetcher`] that never touches the
//! network. It is feature-gated behind `testutil` to prevent leaking into
//! production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! forge-common-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use forge_common_authn::testutil::{TestKeyPair, jwks_document};
//! ```

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use p521::ecdsa::{
    Signature as P521Signature, SigningKey as P521SigningKey, VerifyingKey as P521VerifyingKey,
};
use parking_lot::Mutex;
use rand_core::OsRng;
use serde_json::{Value, json};
use signature::Signer as _;
use zeroize::Zeroizing;

use crate::{error::JwksError, jwks::JwksFetcher};

/// HMAC secret whose base64 form is identical in the standard and URL-safe
/// alphabets, so `oct` JWKs built from it decode either way.
pub const TEST_HMAC_SECRET: &[u8] = b"forge-hmac-test-secret-0123456789abc";

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)` where:
/// - `pkcs8_der` is the private key in PKCS#8 DER format wrapped in [`Zeroizing`] (suitable for
///   [`EncodingKey::from_ed_der`])
/// - `public_key_base64url` is the 32-byte public key encoded as base64url without padding
///   (the `x` member of an OKP JWK)
///
/// Each call generates a fresh random key pair.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_bytes = signing_key.verifying_key().to_bytes();
    let public_key_b64 = URL_SAFE_NO_PAD.encode(public_key_bytes);

    // Wrap intermediate private bytes in Zeroizing to scrub from memory on drop.
    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// An Ed25519 key pair with a key ID, able to sign tokens and describe
/// itself as a JWK.
pub struct TestKeyPair {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key_b64: String,
}

impl TestKeyPair {
    /// Generates a fresh key pair with the given `kid`.
    #[must_use]
    pub fn generate(kid: &str) -> Self {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        Self { kid: kid.to_owned(), pkcs8_der, public_key_b64 }
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public JWK with `kid`, `alg: EdDSA` and `use: sig`.
    #[must_use]
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.public_key_b64,
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// Public JWK without an `alg` member.
    #[must_use]
    pub fn jwk_without_alg(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.public_key_b64,
            "kid": self.kid,
        })
    }

    /// Verifier key for this pair.
    ///
    /// # Panics
    ///
    /// Panics if the generated public key is malformed (should not happen).
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_components(&self.public_key_b64).expect("valid Ed25519 public key")
    }

    /// Signs `claims` with this key, setting `kid` in the header.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails (should not happen with valid inputs).
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        self.encode(claims, Some(&self.kid))
    }

    /// Signs `claims` with this key, leaving `kid` out of the header.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails (should not happen with valid inputs).
    #[must_use]
    pub fn sign_without_kid(&self, claims: &Value) -> String {
        self.encode(claims, None)
    }

    fn encode(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_owned);
        let encoding_key = EncodingKey::from_ed_der(&self.pkcs8_der);
        jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
    }
}

/// A P-521 key pair that signs ES512 tokens.
///
/// `jsonwebtoken` cannot produce ES512 signatures, so tokens are assembled
/// by hand: base64url header and payload, then the fixed-size `r || s`
/// signature over both.
pub struct TestEs512KeyPair {
    kid: String,
    signing_key: P521SigningKey,
}

impl TestEs512KeyPair {
    /// Generates a fresh key pair with the given `kid`.
    #[must_use]
    pub fn generate(kid: &str) -> Self {
        Self { kid: kid.to_owned(), signing_key: P521SigningKey::random(&mut OsRng) }
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public key for direct verification.
    #[must_use]
    pub fn verifying_key(&self) -> P521VerifyingKey {
        P521VerifyingKey::from(&self.signing_key)
    }

    /// Public JWK with `kid`, `alg: ES512` and `use: sig`.
    #[must_use]
    pub fn jwk(&self) -> Value {
        let mut jwk = self.jwk_without_alg();
        jwk["alg"] = json!("ES512");
        jwk["use"] = json!("sig");
        jwk
    }

    /// Public JWK without an `alg` member.
    ///
    /// # Panics
    ///
    /// Panics if the public point has no affine coordinates (should not happen).
    #[must_use]
    pub fn jwk_without_alg(&self) -> Value {
        let point = self.verifying_key().to_encoded_point(false);
        let x = point.x().expect("x coordinate");
        let y = point.y().expect("y coordinate");
        json!({
            "kty": "EC",
            "crv": "P-521",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
            "kid": self.kid,
        })
    }

    /// Signs `claims` as an ES512 token, setting `kid` in the header.
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        self.encode(claims, Some(&self.kid))
    }

    /// Signs `claims` as an ES512 token without `kid`.
    #[must_use]
    pub fn sign_without_kid(&self, claims: &Value) -> String {
        self.encode(claims, None)
    }

    fn encode(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = json!({"alg": "ES512", "typ": "JWT"});
        if let Some(kid) = kid {
            header["kid"] = json!(kid);
        }
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signature: P521Signature = self.signing_key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }
}

/// Builds an `oct` JWK for an HMAC secret, optionally declaring `alg`.
#[must_use]
pub fn hmac_jwk(kid: &str, secret: &[u8], alg: Option<&str>) -> Value {
    let mut jwk = json!({
        "kty": "oct",
        "k": URL_SAFE_NO_PAD.encode(secret),
        "kid": kid,
    });
    if let Some(alg) = alg {
        jwk["alg"] = json!(alg);
    }
    jwk
}

/// Signs `claims` with an HMAC secret.
///
/// # Panics
///
/// Panics if `alg` is not an HMAC algorithm or encoding fails.
#[must_use]
pub fn sign_hmac(secret: &[u8], alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_owned);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret))
        .expect("Failed to encode test JWT")
}

/// Wraps JWKs in a `{"keys": [...]}` document.
#[must_use]
pub fn jwks_document(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A [`JwksFetcher`] that replays queued responses and counts calls.
///
/// Queued responses are consumed first; after that every call gets the
/// serving document, or a fetch error when none is set.
#[derive(Default)]
pub struct ScriptedFetcher {
    queue: Mutex<VecDeque<Result<String, JwksError>>>,
    serving: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    /// Creates a fetcher that always returns `document`.
    #[must_use]
    pub fn serving(document: Value) -> Self {
        let fetcher = Self::default();
        fetcher.set_serving(document);
        fetcher
    }

    /// Sleeps for `delay` (tokio time) before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the document returned once the queue is empty.
    pub fn set_serving(&self, document: Value) {
        *self.serving.lock() = Some(document.to_string());
    }

    /// Queues a successful response.
    pub fn push_ok(&self, document: Value) {
        self.queue.lock().push_back(Ok(document.to_string()));
    }

    /// Queues a failed response.
    pub fn push_err(&self, error: JwksError) {
        self.queue.lock().push_back(Err(error));
    }

    /// Number of fetches started so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JwksFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String, JwksError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queue.lock().pop_front();
        match queued {
            Some(response) => response,
            None => self
                .serving
                .lock()
                .clone()
                .ok_or_else(|| JwksError::fetch("no scripted JWKS response")),
        }
    }
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given [`AuthError`] variant.
///
/// Works with any `AuthError` variant. On failure, prints the expected variant
/// and the actual result for debugging.
///
/// [`AuthError`]: crate::error::AuthError
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use forge_common_authn::assert_auth_error;
/// use forge_common_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

/// Asserts that a [`Result<T, Rejection>`] is an `Err` with the given
/// status and exact message.
///
/// [`Rejection`]: crate::error::Rejection
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use forge_common_authn::assert_rejection;
/// use forge_common_authn::error::Rejection;
///
/// let result: Result<(), Rejection> = Err(Rejection::forbidden("nope"));
/// assert_rejection!(result, Forbidden, "nope");
/// ```
#[macro_export]
macro_rules! assert_rejection {
    ($result:expr, $status:ident, $message:expr) => {
        match &$result {
            Err(rejection) => {
                assert_eq!(
                    rejection.status,
                    $crate::error::RejectionStatus::$status,
                    "unexpected status for rejection: {rejection}"
                );
                assert_eq!(rejection.message, $message);
            },
            Ok(_) => panic!("expected {} rejection, got Ok", stringify!($status)),
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::{AuthError, Rejection};

    #[test]
    fn test_generate_test_keypair_produces_valid_key() {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        // PKCS#8 DER for Ed25519 is 48 bytes (16 header + 32 key)
        assert_eq!(pkcs8_der.len(), 48);
        // Base64url of 32 bytes = 43 characters (no padding)
        assert_eq!(public_key_b64.len(), 43);
    }

    #[test]
    fn test_generate_test_keypair_unique() {
        let (_, pk1) = generate_test_keypair();
        let (_, pk2) = generate_test_keypair();
        assert_ne!(pk1, pk2, "each call should produce a unique key pair");
    }

    #[test]
    fn test_sign_produces_three_part_token() {
        let key = TestKeyPair::generate("kid-001");
        let jwt = key.sign(&json!({"sub": "test"}));
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3, "JWT should have header.payload.signature");
        assert!(!parts[2].is_empty(), "signature should not be empty");
    }

    #[test]
    fn test_craft_raw_jwt_format() {
        let header = json!({"alg": "none", "typ": "JWT"});
        let payload = json!({"sub": "test"});
        let jwt = craft_raw_jwt(&header, &payload);
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty(), "signature should be empty for raw JWTs");
    }

    #[test]
    fn test_hmac_jwk_optional_alg() {
        assert_eq!(hmac_jwk("h", b"one", Some("HS256"))["alg"], "HS256");
        assert!(hmac_jwk("h", b"one", None).get("alg").is_none());
    }

    #[tokio::test]
    async fn test_scripted_fetcher_queue_then_serving() {
        let fetcher = ScriptedFetcher::serving(json!({"keys": []}));
        fetcher.push_err(JwksError::fetch("down"));

        assert!(fetcher.fetch("u", Duration::from_secs(1)).await.is_err());
        assert_eq!(fetcher.fetch("u", Duration::from_secs(1)).await.unwrap(), r#"{"keys":[]}"#);
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_assert_auth_error_token_expired() {
        let result: Result<(), AuthError> = Err(AuthError::token_expired());
        assert_auth_error!(result, TokenExpired);
    }

    #[test]
    fn test_assert_auth_error_with_message() {
        let result: Result<(), AuthError> = Err(AuthError::invalid_signature());
        assert_auth_error!(result, InvalidSignature, "signature should be rejected");
    }

    #[test]
    fn test_assert_rejection() {
        let result: Result<(), Rejection> = Err(Rejection::unauthorized("denied"));
        assert_rejection!(result, Unauthorized, "denied");
    }
}
