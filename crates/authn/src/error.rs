//! Authentication error types.
//!
//! Errors are layered the way failures travel through a request:
//!
//! - [`JwksError`]: key-material failures raised by the [`JwksStore`](crate::JwksStore).
//! - [`AuthError`]: token-level failures raised while decoding and verifying a JWT.
//! - [`Rejection`]: the only failure that leaves the crate at request time, an HTTP status plus a
//!   fixed message that never names the issuer, key or claim behind it.
//! - [`RegistryError`]: configuration and startup failures of the
//!   [`OriginRegistry`](crate::OriginRegistry).

use std::{fmt, sync::Arc};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors raised while fetching, parsing or looking up JWKS key material.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum JwksError {
    /// The issuer is unknown to the store or has no JWKS URL.
    #[error("JWKS not configured for issuer: {issuer}")]
    NotConfigured {
        /// Issuer that was looked up.
        issuer: String,
    },

    /// Network failure, timeout or non-200 response.
    #[error("JWKS fetch failed: {message}")]
    Fetch {
        /// Description of the failure.
        message: String,
        /// The underlying transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The response body is not a JWK set.
    #[error("JWKS parse failed: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// The JWK set contains zero keys.
    #[error("JWKS contains no keys")]
    EmptyKeySet,

    /// Every key in the JWK set failed structural validation.
    #[error("JWKS contains no valid keys ({invalid} rejected)")]
    NoValidKeys {
        /// Number of keys that were rejected.
        invalid: usize,
    },

    /// Another caller is already refreshing this issuer.
    #[error("JWKS refresh already in progress")]
    RefreshInProgress,

    /// No key with this `kid` exists in the current material.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// The issuer has never been refreshed successfully.
    #[error("JWKS not initialized for issuer: {issuer}")]
    NotInitialized {
        /// Issuer that was looked up.
        issuer: String,
    },

    /// No key declares (or is compatible with) the requested algorithm.
    #[error("No key supports algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The requested algorithm.
        alg: String,
    },
}

impl JwksError {
    /// Creates a new `NotConfigured` error.
    #[must_use]
    pub fn not_configured(issuer: impl Into<String>) -> Self {
        Self::NotConfigured { issuer: issuer.into() }
    }

    /// Creates a new `Fetch` error without a source.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch { message: message.into(), source: None }
    }

    /// Creates a new `Fetch` error with a source error.
    #[must_use]
    pub fn fetch_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Parse` error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `NotInitialized` error.
    #[must_use]
    pub fn not_initialized(issuer: impl Into<String>) -> Self {
        Self::NotInitialized { issuer: issuer.into() }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(alg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { alg: alg.into() }
    }

    /// Returns `true` for failures that a later refresh may fix.
    ///
    /// Transport and key-material failures are transient; lookups that miss
    /// against healthy material are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::Parse { .. }
                | Self::EmptyKeySet
                | Self::NoValidKeys { .. }
                | Self::RefreshInProgress
        )
    }
}

/// Token decoding and verification errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No usable `Authorization: Bearer` header.
    #[error("Missing authorization")]
    MissingAuthorization,

    /// Malformed JWT, cannot be decoded.
    #[error("Invalid token format: {message}")]
    InvalidTokenFormat {
        /// Description of the format error.
        message: String,
    },

    /// Algorithm not in the allow-list or not executable by the verifier.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Description of the rejection.
        message: String,
    },

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf claim in future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// No key could verify the token.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of the key failure.
        message: String,
    },

    /// The `iss` claim does not match the configured issuer.
    #[error("Invalid issuer: {message}")]
    InvalidIssuer {
        /// Description of the mismatch.
        message: String,
    },

    /// Required claim is missing.
    #[error("Missing claim: {claim}")]
    MissingClaim {
        /// Name of the missing claim.
        claim: String,
    },

    /// Key material could not be obtained.
    #[error("JWKS error: {0}")]
    Jwks(
        /// The underlying key-material error.
        #[source]
        JwksError,
    ),
}

impl AuthError {
    /// Creates a new `MissingAuthorization` error.
    #[must_use]
    pub fn missing_authorization() -> Self {
        Self::MissingAuthorization
    }

    /// Creates a new `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat { message: message.into() }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a new `TokenExpired` error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a new `TokenNotYetValid` error.
    #[must_use]
    pub fn token_not_yet_valid() -> Self {
        Self::TokenNotYetValid
    }

    /// Creates a new `InvalidSignature` error.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey { message: message.into() }
    }

    /// Creates a new `InvalidIssuer` error.
    #[must_use]
    pub fn invalid_issuer(message: impl Into<String>) -> Self {
        Self::InvalidIssuer { message: message.into() }
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim { claim: claim.into() }
    }

    /// Wraps a key-material error.
    #[must_use]
    pub fn jwks(err: JwksError) -> Self {
        Self::Jwks(err)
    }

    /// Returns `true` when the failure means the key did not verify the
    /// signature, so another candidate key may still succeed.
    #[must_use]
    pub fn is_key_mismatch(&self) -> bool {
        matches!(self, Self::InvalidSignature | Self::InvalidKey { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            ErrorKind::InvalidSignature => AuthError::invalid_signature(),
            ErrorKind::ExpiredSignature => AuthError::token_expired(),
            ErrorKind::ImmatureSignature => AuthError::token_not_yet_valid(),
            ErrorKind::InvalidIssuer => AuthError::invalid_issuer("Issuer validation failed"),
            ErrorKind::MissingRequiredClaim(claim) => AuthError::missing_claim(claim.clone()),
            // The key family does not match the header algorithm.
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidAlgorithmName => AuthError::invalid_key(err.to_string()),
            _ => AuthError::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

impl From<JwksError> for AuthError {
    fn from(err: JwksError) -> Self {
        AuthError::Jwks(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// HTTP status of a [`Rejection`]. Nothing else is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionStatus {
    /// 401: the caller could not be authenticated.
    Unauthorized,
    /// 403: the caller was authenticated but lacks access.
    Forbidden,
}

impl RejectionStatus {
    /// The equivalent [`http::StatusCode`].
    #[must_use]
    pub fn status_code(self) -> http::StatusCode {
        match self {
            Self::Unauthorized => http::StatusCode::UNAUTHORIZED,
            Self::Forbidden => http::StatusCode::FORBIDDEN,
        }
    }
}

/// A terminal, caller-visible authentication failure.
///
/// The message is safe to return in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP status class.
    pub status: RejectionStatus,
    /// Human-readable, non-sensitive message.
    pub message: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.status_code().as_u16(), self.message)
    }
}

impl std::error::Error for Rejection {}

impl Rejection {
    /// Creates a 401 rejection.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { status: RejectionStatus::Unauthorized, message: message.into() }
    }

    /// Creates a 403 rejection.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self { status: RejectionStatus::Forbidden, message: message.into() }
    }

    /// Returns `true` for a 401.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == RejectionStatus::Unauthorized
    }

    /// Returns `true` for a 403.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.status == RejectionStatus::Forbidden
    }
}

/// Registry configuration and startup errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The issuer string is already registered.
    #[error("Issuer already registered: {issuer}")]
    DuplicateIssuer {
        /// The colliding issuer string.
        issuer: String,
    },

    /// The configuration is structurally invalid.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Every issuer failed to refresh; nothing can be authenticated.
    #[error("JWKS refresh failed for all {} issuers", failures.len())]
    AllIssuersFailed {
        /// Per-issuer failures, keyed by issuer string.
        failures: Vec<(String, JwksError)>,
    },
}

impl RegistryError {
    /// Creates a new `DuplicateIssuer` error.
    #[must_use]
    pub fn duplicate_issuer(issuer: impl Into<String>) -> Self {
        Self::DuplicateIssuer { issuer: issuer.into() }
    }

    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_token_format("test");
        assert_eq!(err.to_string(), "Invalid token format: test");

        let err = AuthError::token_expired();
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::missing_claim("sub");
        assert_eq!(err.to_string(), "Missing claim: sub");

        let err = JwksError::NoValidKeys { invalid: 3 };
        assert_eq!(err.to_string(), "JWKS contains no valid keys (3 rejected)");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::TokenExpired));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidAlgorithm);
        let auth_err: AuthError = jwt_err.into();
        assert!(auth_err.is_key_mismatch());
    }

    #[test]
    fn test_jwks_error_is_transient() {
        assert!(JwksError::fetch("timeout").is_transient());
        assert!(JwksError::parse("bad json").is_transient());
        assert!(JwksError::EmptyKeySet.is_transient());
        assert!(JwksError::RefreshInProgress.is_transient());
        assert!(!JwksError::key_not_found("k1").is_transient());
        assert!(!JwksError::not_configured("https://issuer").is_transient());
    }

    #[test]
    fn test_jwks_error_preserves_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let auth_err = AuthError::jwks(JwksError::fetch_with_source("GET failed", io));

        let level_1 = auth_err.source().expect("level 1 source");
        assert_eq!(level_1.to_string(), "JWKS fetch failed: GET failed");

        let level_2 = level_1.source().expect("level 2 source");
        assert_eq!(level_2.to_string(), "timed out");
    }

    #[test]
    fn test_rejection_status_codes() {
        let r = Rejection::unauthorized("Invalid authorization token in request");
        assert!(r.is_unauthorized());
        assert_eq!(r.status.status_code(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(r.to_string(), "401 Invalid authorization token in request");

        let r = Rejection::forbidden("User does not have any roles assigned");
        assert!(r.is_forbidden());
        assert_eq!(r.status.status_code(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_all_issuers_failed_display() {
        let err = RegistryError::AllIssuersFailed {
            failures: vec![
                ("https://a".into(), JwksError::fetch("down")),
                ("https://b".into(), JwksError::EmptyKeySet),
            ],
        };
        assert_eq!(err.to_string(), "JWKS refresh failed for all 2 issuers");
    }
}
