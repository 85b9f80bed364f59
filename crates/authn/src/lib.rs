//! # Forge Common Authentication
//!
//! Multi-tenant JWT authentication for Forge services.
//!
//! This crate provides:
//! - **JWKS store**: per-issuer key cache with throttled, single-flight refresh
//! - **Key resolver**: signature verification with a bounded refresh-and-retry on key rotation
//! - **Origin registry**: routes a token to its issuer's processor by exact `iss` match
//! - **Processors**: embedded IdP, two internal token services, and externally configured issuers
//! - **Claim mapping**: derives organization membership and roles from token claims
//!
//! ## Security
//!
//! - The `iss` claim is read unverified only to choose an issuer; the token is
//!   verified against that issuer's keys before anything else is trusted
//! - `alg: none` and algorithms outside the allow-list are rejected before key lookup
//! - Callers see a 401 or 403 with a coarse message; causes are only logged
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use forge_common_authn::{AuthRequest, AuthnConfig, HttpJwksFetcher, OriginRegistry};
//! use forge_common_identity::MemoryIdentityStore;
//!
//! # async fn example(headers: http::HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthnConfig::from_yaml_str(&std::fs::read_to_string("authn.yaml")?)?;
//! let registry = OriginRegistry::from_config(
//!     config,
//!     Arc::new(HttpJwksFetcher::new()),
//!     Arc::new(MemoryIdentityStore::new()),
//! )?;
//! registry.refresh_all().await?;
//!
//! let request = AuthRequest::new(headers, "acme");
//! match registry.authenticate(&request).await {
//!     Ok(authenticated) => println!("user {}", authenticated.user.id),
//!     Err(rejection) => println!("rejected: {rejection}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JSON claim access.
pub mod claims;
/// Issuer configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Per-issuer JWKS cache.
pub mod jwks;
/// JWT decoding and signature verification.
pub mod jwt;
/// Claim-to-organization mapping.
pub mod mapping;
/// Organization data merge.
pub mod merge;
/// Token processors.
pub mod processors;
/// Issuer routing.
pub mod registry;
/// Request and result types.
pub mod request;
/// Key resolution with refresh-and-retry.
pub mod resolver;
/// Algorithm validation.
pub mod validation;

/// Test utilities for JWT and JWKS testing.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use claims::Claims;
pub use config::{AuthnConfig, ClaimMapping, IssuerConfig, OriginKind, RetryPolicy};
pub use error::{AuthError, JwksError, Rejection, RejectionStatus, RegistryError, Result};
pub use jwks::{
    DEFAULT_JWKS_TIMEOUT, DEFAULT_MIN_REFRESH_INTERVAL, HttpJwksFetcher, JwksFetcher, JwksStore,
    RefreshOutcome,
};
pub use registry::{OriginRegistry, RefreshReport, RegisteredIssuer};
pub use request::{AuthRequest, AuthenticatedUser};
pub use resolver::KeyResolver;
pub use validation::{
    ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, VerifierAlgorithm, validate_algorithm,
};
