//! JWT decoding and signature verification.
//!
//! Headers are read from the raw protected segment rather than through the
//! verifier's typed header, so an algorithm the verifier has no variant for
//! surfaces as [`AuthError::UnsupportedAlgorithm`] instead of a generic parse
//! failure.
//!
//! # Example
//!
//! ```no_run
//! // Requires a valid JWT token string.
//! use forge_common_authn::jwt::{decode_token_header, decode_unverified_claims};
//!
//! # fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let header = decode_token_header(token)?;
//! let claims = decode_unverified_claims(token)?;
//!
//! println!("Algorithm: {}", header.alg);
//! println!("Issuer: {:?}", claims.issuer());
//! # Ok(())
//! # }
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, get_current_timestamp};
use p521::ecdsa::{Signature as P521Signature, VerifyingKey as P521VerifyingKey};
use serde::Deserialize;
use serde_json::Value;
use signature::Verifier as _;

use crate::{claims::Claims, error::AuthError};

/// Clock skew tolerated on `exp` and `nbf`, in seconds. Matches the
/// `jsonwebtoken` default used on every other algorithm.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// The protected header fields this crate inspects.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm, exactly as written in the token.
    pub alg: String,
    /// Key identifier, when the issuer sets one.
    #[serde(default)]
    pub kid: Option<String>,
    /// Token type.
    #[serde(default)]
    pub typ: Option<String>,
}

fn split_token(token: &str) -> Result<[&str; 3], AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok([header, payload, signature]),
        _ => Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots")),
    }
}

/// Decode the JWT header without verification.
///
/// An empty `kid` is treated as absent.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the token is not three
/// dot-separated segments or the header is not base64url-encoded JSON with
/// an `alg` string.
pub fn decode_token_header(token: &str) -> Result<TokenHeader, AuthError> {
    let [header, _, _] = split_token(token)?;

    let bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
    })?;
    let mut header: TokenHeader = serde_json::from_slice(&bytes).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}"))
    })?;

    if header.kid.as_deref().is_some_and(str::is_empty) {
        header.kid = None;
    }

    Ok(header)
}

/// Decode JWT claims without verification.
///
/// Only used to read `iss` for routing. Nothing read here is trusted until
/// the signature has been verified.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if:
/// - The JWT does not have exactly 3 parts
/// - The payload cannot be base64-decoded
/// - The payload is not a JSON object
pub fn decode_unverified_claims(token: &str) -> Result<Claims, AuthError> {
    let [_, payload, _] = split_token(token)?;

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT payload: {e}"))
    })?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT claims: {e}")))
}

/// Verify a JWT signature and its time-based claims with one key.
///
/// - `exp` is required and enforced
/// - `nbf` is enforced when present
/// - `iss` must equal `issuer`
/// - `aud` is left to the caller
///
/// Signature checking happens before claim checks, so
/// [`AuthError::TokenExpired`] implies the key matched.
///
/// # Errors
///
/// Returns the [`AuthError`] mapped from the verifier's failure.
pub fn verify_with_key(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    issuer: &str,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "iss"]);

    let token_data = decode::<Claims>(token, key, &validation)?;

    Ok(token_data.claims)
}

/// Verify an ES512 (ECDSA P-521, SHA-512) token with one key.
///
/// The signature is the 132-byte fixed-size `r || s` encoding over
/// `header.payload`. Claim checks follow [`verify_with_key`]: `exp` and
/// `iss` are required, `nbf` is enforced when present, and the same leeway
/// applies.
///
/// # Errors
///
/// - [`AuthError::InvalidTokenFormat`] for a malformed token
/// - [`AuthError::InvalidSignature`] when the key does not verify the signature
/// - the claim failures [`verify_with_key`] reports
pub fn verify_es512(
    token: &str,
    key: &P521VerifyingKey,
    issuer: &str,
) -> Result<Claims, AuthError> {
    let [header, payload, signature] = split_token(token)?;

    let signature_bytes = URL_SAFE_NO_PAD.decode(signature).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT signature: {e}"))
    })?;
    let signature =
        P521Signature::from_slice(&signature_bytes).map_err(|_| AuthError::invalid_signature())?;

    let signing_input = format!("{header}.{payload}");
    key.verify(signing_input.as_bytes(), &signature).map_err(|_| AuthError::invalid_signature())?;

    let claims = decode_unverified_claims(token)?;
    validate_registered_claims(&claims, issuer, get_current_timestamp())?;
    Ok(claims)
}

/// `exp`, `nbf` and `iss` checks for tokens verified outside `jsonwebtoken`.
///
/// Non-numeric `exp` and non-string `iss` count as missing.
fn validate_registered_claims(claims: &Claims, issuer: &str, now: u64) -> Result<(), AuthError> {
    let exp = claims
        .get("exp")
        .and_then(Value::as_u64)
        .ok_or_else(|| AuthError::missing_claim("exp"))?;
    let iss = match claims.get("iss") {
        Some(Value::String(iss)) => vec![iss.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    if iss.is_empty() {
        return Err(AuthError::missing_claim("iss"));
    }

    if exp < now.saturating_sub(CLOCK_SKEW_LEEWAY) {
        return Err(AuthError::token_expired());
    }
    if let Some(nbf) = claims.get("nbf").and_then(Value::as_u64)
        && nbf > now.saturating_add(CLOCK_SKEW_LEEWAY)
    {
        return Err(AuthError::token_not_yet_valid());
    }

    if !iss.contains(&issuer) {
        return Err(AuthError::invalid_issuer("Issuer validation failed"));
    }
    Ok(())
}
