//! JWT algorithm validation.
//!
//! This module provides the algorithm allow-list applied to every token
//! before any key lookup happens.
//!
//! # Security
//!
//! - Strict string comparison against the allow-list prevents algorithm substitution
//! - `"none"` is always rejected
//! - Every allow-listed algorithm maps onto a verifier; ES512 is checked with
//!   `p521` because `jsonwebtoken` has no P-521 support

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted for security reasons.
///
/// `none` carries no signature and is trivially bypassable.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Accepted JWT algorithms.
///
/// RSA (PKCS#1 v1.5 and PSS), ECDSA and HMAC at 256/384/512 bits, plus
/// EdDSA. Comparison is exact and case-sensitive.
pub const ACCEPTED_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512", "HS256",
    "HS384", "HS512", "EdDSA",
];

/// Validate a JWT header algorithm against the allow-list.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is `"none"`
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use forge_common_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("RS256").is_ok());
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("none").is_err());
/// assert!(validate_algorithm("rs256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list"
        )));
    }

    Ok(())
}

/// Signature scheme selected for an allow-listed algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierAlgorithm {
    /// Verified by `jsonwebtoken`.
    Jwt(Algorithm),
    /// ECDSA over P-521 with SHA-512. `jsonwebtoken` has no variant for it,
    /// so these signatures are checked with `p521`.
    Es512,
}

/// Map an allow-listed algorithm name onto the scheme that verifies it.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm fails
/// [`validate_algorithm`] or cannot be executed.
///
/// # Examples
///
/// ```
/// use forge_common_authn::validation::{VerifierAlgorithm, verifier_algorithm};
///
/// assert_eq!(verifier_algorithm("ES512").unwrap(), VerifierAlgorithm::Es512);
/// assert!(verifier_algorithm("none").is_err());
/// ```
pub fn verifier_algorithm(alg: &str) -> Result<VerifierAlgorithm, AuthError> {
    validate_algorithm(alg)?;
    if alg == "ES512" {
        return Ok(VerifierAlgorithm::Es512);
    }
    Algorithm::from_str(alg).map(VerifierAlgorithm::Jwt).map_err(|_| {
        AuthError::unsupported_algorithm(format!("Algorithm '{alg}' is not supported by verifier"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_algorithm_accepts_allow_list() {
        for alg in ACCEPTED_ALGORITHMS {
            assert!(validate_algorithm(alg).is_ok(), "{alg} should be accepted");
        }
    }

    #[test]
    fn test_validate_algorithm_none_rejected() {
        for alg in ["none", "None", "NONE"] {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm { ref message }) if message.contains("not allowed for security reasons")),
                "Expected security rejection for '{alg}'"
            );
        }
    }

    #[test]
    fn test_validate_algorithm_not_in_list() {
        for alg in ["RS1", "ES256K", "rs256", "", "HS128"] {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm { ref message }) if message.contains("not in accepted list")),
                "Expected list rejection for '{alg}'"
            );
        }
    }

    #[test]
    fn test_verifier_algorithm_maps_names() {
        assert_eq!(verifier_algorithm("RS256").unwrap(), VerifierAlgorithm::Jwt(Algorithm::RS256));
        assert_eq!(verifier_algorithm("PS384").unwrap(), VerifierAlgorithm::Jwt(Algorithm::PS384));
        assert_eq!(verifier_algorithm("ES256").unwrap(), VerifierAlgorithm::Jwt(Algorithm::ES256));
        assert_eq!(verifier_algorithm("HS512").unwrap(), VerifierAlgorithm::Jwt(Algorithm::HS512));
        assert_eq!(verifier_algorithm("EdDSA").unwrap(), VerifierAlgorithm::Jwt(Algorithm::EdDSA));
    }

    #[test]
    fn test_every_accepted_algorithm_has_a_verifier() {
        for alg in ACCEPTED_ALGORITHMS {
            assert!(verifier_algorithm(alg).is_ok(), "{alg} should be verifiable");
        }
        assert_eq!(verifier_algorithm("ES512").unwrap(), VerifierAlgorithm::Es512);
    }

    #[test]
    fn test_accepted_algorithms_constant() {
        assert_eq!(ACCEPTED_ALGORITHMS.len(), 13);
        assert!(!ACCEPTED_ALGORITHMS.contains(&"none"));
    }
}
