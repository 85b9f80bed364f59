//! Key resolution during token verification.
//!
//! With a `kid` the key is looked up directly; a miss triggers a bounded
//! refresh-and-retry loop governed by [`RetryPolicy`]. Without a `kid`,
//! every key supporting the header algorithm is tried in order and the first
//! one whose signature check passes wins. If none does, one refresh-and-retry
//! pass runs against the refreshed key set before giving up.

use std::sync::Arc;

use crate::{
    claims::Claims,
    config::RetryPolicy,
    error::{AuthError, JwksError, Result},
    jwks::{JwksStore, VerificationKey},
    jwt::decode_token_header,
    validation::{VerifierAlgorithm, verifier_algorithm},
};

/// Verifies tokens against the keys of one [`JwksStore`].
#[derive(Debug, Clone)]
pub struct KeyResolver {
    store: Arc<JwksStore>,
    retry: RetryPolicy,
}

impl KeyResolver {
    /// Creates a resolver over `store` with the given retry budget.
    #[must_use]
    pub fn new(store: Arc<JwksStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// The underlying key store.
    #[must_use]
    pub fn store(&self) -> &Arc<JwksStore> {
        &self.store
    }

    /// The retry budget applied on key misses.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Verify `token` as issued by `issuer` and return its claims.
    ///
    /// The header algorithm is checked against the allow-list before any
    /// key lookup. Signature, `exp`, `nbf` and `iss` are verified; audience
    /// and scope are left to the caller.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTokenFormat`] for a malformed token
    /// - [`AuthError::UnsupportedAlgorithm`] for a rejected or unexecutable algorithm
    /// - [`AuthError::InvalidKey`] when no key can be found that verifies the token
    /// - [`AuthError::Jwks`] when a refresh fails outright
    /// - any claim failure reported by the verifier
    #[tracing::instrument(skip(self, token))]
    pub async fn verify(&self, issuer: &str, token: &str) -> Result<Claims> {
        let header = decode_token_header(token)?;
        let algorithm = verifier_algorithm(&header.alg)?;

        match header.kid.as_deref() {
            Some(kid) => {
                let key = self.resolve_kid(issuer, kid).await?;
                if !key.supports(&header.alg) {
                    return Err(AuthError::invalid_key(format!(
                        "key '{kid}' cannot verify {} tokens",
                        header.alg
                    )));
                }
                key.verify(token, algorithm, issuer)
            },
            None => self.verify_without_kid(issuer, token, &header.alg, algorithm).await,
        }
    }

    async fn resolve_kid(&self, issuer: &str, kid: &str) -> Result<Arc<VerificationKey>> {
        match self.store.lookup(issuer, kid) {
            Ok(key) => return Ok(key),
            Err(JwksError::KeyNotFound { .. } | JwksError::NotInitialized { .. }) => {},
            Err(e) => return Err(e.into()),
        }

        self.refresh_with_retry(issuer, || self.store.lookup(issuer, kid).is_ok()).await?;

        self.store
            .lookup(issuer, kid)
            .map_err(|_| AuthError::invalid_key(format!("no key found for kid '{kid}'")))
    }

    async fn verify_without_kid(
        &self,
        issuer: &str,
        token: &str,
        alg: &str,
        algorithm: VerifierAlgorithm,
    ) -> Result<Claims> {
        let candidates = self.candidates(issuer, alg)?;
        if let Some(result) = try_candidates(token, &candidates, algorithm, issuer) {
            return result;
        }

        tracing::debug!(alg = %alg, "No cached key verified token, refreshing");
        self.refresh_with_retry(issuer, || false).await?;

        let refreshed = self.candidates(issuer, alg)?;
        try_candidates(token, &refreshed, algorithm, issuer).unwrap_or_else(|| {
            Err(AuthError::invalid_key(format!("no {alg} key verified the token signature")))
        })
    }

    fn candidates(&self, issuer: &str, alg: &str) -> Result<Vec<Arc<VerificationKey>>> {
        match self.store.lookup_by_algorithm(issuer, alg) {
            Ok(keys) => Ok(keys),
            Err(JwksError::NotInitialized { .. } | JwksError::UnsupportedAlgorithm { .. }) => {
                Ok(Vec::new())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh until a refresh completes or `ready` reports the wanted key
    /// has appeared.
    ///
    /// Only [`JwksError::RefreshInProgress`] is retried; any other refresh
    /// failure is returned at once.
    async fn refresh_with_retry(&self, issuer: &str, ready: impl Fn() -> bool) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.store.refresh(issuer).await {
                Ok(outcome) => {
                    tracing::debug!(attempt, ?outcome, "JWKS refresh completed");
                    return Ok(());
                },
                Err(JwksError::RefreshInProgress) => {
                    if ready() {
                        return Ok(());
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        if ready() {
            return Ok(());
        }
        tracing::warn!(attempts = max_attempts, "JWKS refresh still in progress after retries");
        Err(AuthError::invalid_key("JWKS refresh did not complete"))
    }
}

/// Try each candidate in order.
///
/// Returns `None` when every candidate failed with a key mismatch, so the
/// caller may refresh. Any other failure means a key verified the signature
/// and is final.
fn try_candidates(
    token: &str,
    candidates: &[Arc<VerificationKey>],
    algorithm: VerifierAlgorithm,
    issuer: &str,
) -> Option<Result<Claims>> {
    for key in candidates {
        match key.verify(token, algorithm, issuer) {
            Err(e) if e.is_key_mismatch() => {
                tracing::debug!(kid = key.kid().unwrap_or_default(), "Candidate key rejected");
            },
            result => return Some(result),
        }
    }
    None
}
