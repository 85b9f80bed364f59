//! Issuer routing.
//!
//! The [`OriginRegistry`] maps each configured issuer string to its
//! configuration and processor, owns the shared [`JwksStore`], and is the
//! single entry point request handlers call. Issuer matching is exact,
//! case-sensitive string equality; no prefix or normalized match is ever
//! attempted.
//!
//! Build one registry at startup, call [`OriginRegistry::refresh_all`], and
//! share it behind an `Arc` with every request handler.

use std::{collections::HashMap, sync::Arc, time::Duration};

use forge_common_identity::IdentityStore;
use futures::future::join_all;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::{
    config::{AuthnConfig, IssuerConfig, OriginKind, RetryPolicy},
    error::{JwksError, Rejection, RegistryError},
    jwks::{DEFAULT_MIN_REFRESH_INTERVAL, JwksFetcher, JwksStore},
    jwt::decode_unverified_claims,
    processors::{INVALID_TOKEN, ProcessContext, Processor},
    request::{AuthRequest, AuthenticatedUser},
    resolver::KeyResolver,
};

/// Length of the issuer-derived subject prefix.
pub const ISSUER_PREFIX_LEN: usize = 10;

/// First [`ISSUER_PREFIX_LEN`] hex characters of SHA-256 of `issuer`.
///
/// # Examples
///
/// ```
/// use forge_common_authn::registry::issuer_prefix;
///
/// let prefix = issuer_prefix("https://login.partner.example.com");
/// assert_eq!(prefix.len(), 10);
/// assert_eq!(prefix, issuer_prefix("https://login.partner.example.com"));
/// ```
#[must_use]
pub fn issuer_prefix(issuer: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(issuer.as_bytes()));
    digest.truncate(ISSUER_PREFIX_LEN);
    digest
}

/// A configured issuer together with its processor.
#[derive(Debug, Clone)]
pub struct RegisteredIssuer {
    config: IssuerConfig,
    processor: Processor,
    subject_prefix: Option<String>,
}

impl RegisteredIssuer {
    fn new(config: IssuerConfig) -> Self {
        let subject_prefix =
            (config.origin() == OriginKind::Custom).then(|| issuer_prefix(config.issuer()));
        Self { processor: Processor::from(config.origin()), config, subject_prefix }
    }

    /// Issuer configuration.
    #[must_use]
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Processor selected from the origin kind.
    #[must_use]
    pub fn processor(&self) -> Processor {
        self.processor
    }

    /// Subject namespacing prefix. Set for custom issuers only.
    #[must_use]
    pub fn subject_prefix(&self) -> Option<&str> {
        self.subject_prefix.as_deref()
    }
}

/// Outcome of a [`OriginRegistry::refresh_all`] that did not fail outright.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Issuers whose refresh succeeded (or was throttled).
    pub refreshed: Vec<String>,
    /// Issuers whose refresh failed.
    pub failed: Vec<(String, JwksError)>,
    /// Issuers without a JWKS URL, never refreshed.
    pub skipped: Vec<String>,
}

impl RefreshReport {
    /// Returns `true` if some issuers failed while others succeeded.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Default)]
struct Issuers {
    by_issuer: HashMap<String, Arc<RegisteredIssuer>>,
    order: Vec<String>,
}

/// Table of configured issuers and the entry point for authentication.
pub struct OriginRegistry {
    store: Arc<JwksStore>,
    resolver: KeyResolver,
    issuers: RwLock<Issuers>,
    identity: Arc<dyn IdentityStore>,
}

impl std::fmt::Debug for OriginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginRegistry")
            .field("issuers", &self.issuers.read().order)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl OriginRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Source of JWKS documents.
    /// * `identity` - Identity store written by processors.
    /// * `retry` - Key-miss retry budget (default: 5 attempts, 1s apart).
    /// * `min_refresh_interval` - Per-issuer refresh throttle (default: 10s).
    #[builder]
    pub fn new(
        fetcher: Arc<dyn JwksFetcher>,
        identity: Arc<dyn IdentityStore>,
        #[builder(default)] retry: RetryPolicy,
        #[builder(default = DEFAULT_MIN_REFRESH_INTERVAL)] min_refresh_interval: Duration,
    ) -> Self {
        let store = Arc::new(JwksStore::with_min_refresh_interval(fetcher, min_refresh_interval));
        let resolver = KeyResolver::new(Arc::clone(&store), retry);
        Self { store, resolver, issuers: RwLock::new(Issuers::default()), identity }
    }

    /// Build a registry from configuration.
    ///
    /// The static organization names of every issuer are added to every
    /// issuer's reserved set, so no dynamic mapping can claim them.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] or
    /// [`RegistryError::DuplicateIssuer`] from validation and registration.
    pub fn from_config(
        config: AuthnConfig,
        fetcher: Arc<dyn JwksFetcher>,
        identity: Arc<dyn IdentityStore>,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let reserved = config.reserved_org_names();

        let registry = Self::builder()
            .fetcher(fetcher)
            .identity(identity)
            .retry(config.retry)
            .min_refresh_interval(config.min_refresh_interval)
            .build();

        for mut issuer in config.issuers {
            issuer.reserved_org_names.extend(reserved.iter().cloned());
            registry.add_issuer(issuer)?;
        }
        Ok(registry)
    }
}

impl OriginRegistry {
    /// Register an issuer and create its (empty) key material.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidConfig`] if the configuration is invalid
    /// - [`RegistryError::DuplicateIssuer`] if the issuer string is taken
    pub fn add_issuer(&self, config: IssuerConfig) -> Result<(), RegistryError> {
        config.validate()?;

        let mut issuers = self.issuers.write();
        if issuers.by_issuer.contains_key(config.issuer()) {
            return Err(RegistryError::duplicate_issuer(config.issuer()));
        }

        self.store.register(config.issuer(), config.jwks_url(), config.jwks_timeout());
        tracing::info!(
            name = %config.name(),
            issuer = %config.issuer(),
            origin = %config.origin(),
            "Registered issuer"
        );

        let issuer = config.issuer().to_owned();
        issuers.order.push(issuer.clone());
        issuers.by_issuer.insert(issuer, Arc::new(RegisteredIssuer::new(config)));
        Ok(())
    }

    /// Remove an issuer and discard its key material. Returns `true` if it
    /// was registered.
    pub fn remove_issuer(&self, issuer: &str) -> bool {
        let mut issuers = self.issuers.write();
        if issuers.by_issuer.remove(issuer).is_none() {
            return false;
        }
        issuers.order.retain(|registered| registered != issuer);
        self.store.remove(issuer);
        tracing::info!(issuer = %issuer, "Removed issuer");
        true
    }

    /// The issuer registered under exactly `issuer`.
    #[must_use]
    pub fn resolve_by_issuer(&self, issuer: &str) -> Option<Arc<RegisteredIssuer>> {
        self.issuers.read().by_issuer.get(issuer).cloned()
    }

    /// Every issuer of `origin`, in registration order.
    #[must_use]
    pub fn resolve_by_origin(&self, origin: OriginKind) -> Vec<Arc<RegisteredIssuer>> {
        self.issuers().into_iter().filter(|issuer| issuer.config().origin() == origin).collect()
    }

    /// The first registered issuer of `origin`.
    #[must_use]
    pub fn first_by_origin(&self, origin: OriginKind) -> Option<Arc<RegisteredIssuer>> {
        self.resolve_by_origin(origin).into_iter().next()
    }

    /// Every issuer, in registration order.
    #[must_use]
    pub fn issuers(&self) -> Vec<Arc<RegisteredIssuer>> {
        let issuers = self.issuers.read();
        issuers.order.iter().filter_map(|issuer| issuers.by_issuer.get(issuer).cloned()).collect()
    }

    /// Whether `issuer` accepts service account tokens. Unknown issuers
    /// never do.
    #[must_use]
    pub fn is_service_account(&self, issuer: &str) -> bool {
        self.resolve_by_issuer(issuer).is_some_and(|issuer| issuer.config().service_account())
    }

    /// The shared key store.
    #[must_use]
    pub fn store(&self) -> &Arc<JwksStore> {
        &self.store
    }

    /// The key resolver used by every processor.
    #[must_use]
    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Refresh every issuer with a JWKS URL, in parallel.
    ///
    /// Partial failure is logged and reported; the registry keeps serving
    /// the issuers that refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AllIssuersFailed`] when every attempted
    /// refresh failed. The process should not serve traffic in that state.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_all(&self) -> Result<RefreshReport, RegistryError> {
        let mut report = RefreshReport::default();
        let mut targets = Vec::new();
        for issuer in self.issuers() {
            let name = issuer.config().issuer().to_owned();
            if issuer.config().jwks_url().is_empty() {
                report.skipped.push(name);
            } else {
                targets.push(name);
            }
        }

        if targets.is_empty() {
            tracing::debug!("No issuers with a JWKS URL to refresh");
            return Ok(report);
        }

        let results = join_all(targets.iter().map(|issuer| self.store.refresh(issuer))).await;
        for (issuer, result) in targets.into_iter().zip(results) {
            match result {
                Ok(_) => report.refreshed.push(issuer),
                Err(e) => report.failed.push((issuer, e)),
            }
        }

        if report.refreshed.is_empty() {
            tracing::error!(failed = report.failed.len(), "JWKS refresh failed for every issuer");
            return Err(RegistryError::AllIssuersFailed { failures: report.failed });
        }
        for (issuer, error) in &report.failed {
            tracing::warn!(issuer = %issuer, error = %error, "JWKS refresh failed for issuer");
        }
        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "JWKS refresh complete"
        );
        Ok(report)
    }

    /// Authenticate a request.
    ///
    /// Reads `iss` from the unverified token only to pick the issuer; the
    /// selected processor then verifies the token against that issuer's
    /// keys before trusting anything in it.
    ///
    /// # Errors
    ///
    /// Returns a 401 or 403 [`Rejection`].
    #[tracing::instrument(skip_all, fields(org = %request.org_name))]
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthenticatedUser, Rejection> {
        let token = request.bearer_token()?;

        let claims = decode_unverified_claims(token).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse token claims");
            Rejection::unauthorized("Error parsing the token claims")
        })?;
        let issuer = claims.issuer().unwrap_or_default();

        let Some(registered) = self.resolve_by_issuer(issuer) else {
            tracing::warn!(issuer = %issuer, "Token issuer is not configured");
            return Err(Rejection::unauthorized(INVALID_TOKEN));
        };

        let ctx = ProcessContext {
            resolver: &self.resolver,
            identity: self.identity.as_ref(),
            config: registered.config(),
            subject_prefix: registered.subject_prefix(),
        };
        registered.processor().process(&ctx, token, request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use forge_common_identity::MemoryIdentityStore;

    use super::*;
    use crate::{
        config::ClaimMapping,
        testutil::{ScriptedFetcher, TestKeyPair, jwks_document},
    };

    fn issuer(name: &str, url: &str, origin: OriginKind) -> IssuerConfig {
        IssuerConfig::builder()
            .name(name)
            .issuer(format!("https://{name}.example.com"))
            .jwks_url(url)
            .origin(origin)
            .build()
            .unwrap()
    }

    fn registry(fetcher: Arc<ScriptedFetcher>) -> OriginRegistry {
        OriginRegistry::builder()
            .fetcher(fetcher)
            .identity(Arc::new(MemoryIdentityStore::new()))
            .build()
    }

    #[test]
    fn test_issuer_prefix_known_value() {
        // SHA-256("abc") = ba7816bf8f01cfea...
        assert_eq!(issuer_prefix("abc"), "ba7816bf8f");
        assert_ne!(issuer_prefix("https://a.example.com"), issuer_prefix("https://b.example.com"));
    }

    #[test]
    fn test_add_and_resolve_exact_match() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        registry.add_issuer(issuer("idp", "https://idp/jwks", OriginKind::Keycloak)).unwrap();

        assert!(registry.resolve_by_issuer("https://idp.example.com").is_some());
        assert!(registry.resolve_by_issuer("https://IDP.example.com").is_none());
        assert!(registry.resolve_by_issuer("https://idp.example.com/").is_none());
        assert!(registry.resolve_by_issuer("https://idp.example").is_none());
        assert!(registry.store().contains("https://idp.example.com"));
    }

    #[test]
    fn test_duplicate_issuer_rejected() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        registry.add_issuer(issuer("idp", "https://idp/jwks", OriginKind::Keycloak)).unwrap();
        let result = registry.add_issuer(issuer("idp", "https://other/jwks", OriginKind::Custom));
        assert!(matches!(result, Err(RegistryError::DuplicateIssuer { .. })));

        let kept = registry.resolve_by_issuer("https://idp.example.com").unwrap();
        assert_eq!(kept.config().origin(), OriginKind::Keycloak);
    }

    #[test]
    fn test_resolve_by_origin_in_registration_order() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        registry.add_issuer(issuer("b", "u", OriginKind::Custom)).unwrap();
        registry.add_issuer(issuer("idp", "u", OriginKind::Keycloak)).unwrap();
        registry.add_issuer(issuer("a", "u", OriginKind::Custom)).unwrap();

        let names: Vec<_> = registry
            .resolve_by_origin(OriginKind::Custom)
            .iter()
            .map(|i| i.config().name().to_owned())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.first_by_origin(OriginKind::Custom).unwrap().config().name(), "b");
        assert!(registry.first_by_origin(OriginKind::LegacyV2).is_none());
    }

    #[test]
    fn test_subject_prefix_only_for_custom() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        registry.add_issuer(issuer("ext", "u", OriginKind::Custom)).unwrap();
        registry.add_issuer(issuer("idp", "u", OriginKind::Keycloak)).unwrap();

        let ext = registry.resolve_by_issuer("https://ext.example.com").unwrap();
        assert_eq!(ext.subject_prefix(), Some(issuer_prefix("https://ext.example.com").as_str()));
        assert_eq!(ext.processor(), Processor::Custom);
        let idp = registry.resolve_by_issuer("https://idp.example.com").unwrap();
        assert_eq!(idp.subject_prefix(), None);
    }

    #[test]
    fn test_remove_issuer() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        registry.add_issuer(issuer("ext", "u", OriginKind::Custom)).unwrap();
        assert!(registry.remove_issuer("https://ext.example.com"));
        assert!(!registry.remove_issuer("https://ext.example.com"));
        assert!(registry.issuers().is_empty());
        assert!(!registry.store().contains("https://ext.example.com"));
    }

    #[test]
    fn test_is_service_account() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        let config = IssuerConfig::builder()
            .name("idp")
            .issuer("https://idp.example.com")
            .origin(OriginKind::Keycloak)
            .service_account(true)
            .build()
            .unwrap();
        registry.add_issuer(config).unwrap();
        assert!(registry.is_service_account("https://idp.example.com"));
        assert!(!registry.is_service_account("https://unknown.example.com"));
    }

    #[test]
    fn test_from_config_installs_reserved_names() {
        let config = AuthnConfig {
            issuers: vec![
                IssuerConfig::builder()
                    .name("static")
                    .issuer("https://static.example.com")
                    .claim_mappings(vec![
                        ClaimMapping::builder().org_name("Acme").roles(vec!["R".into()]).build(),
                    ])
                    .build()
                    .unwrap(),
                IssuerConfig::builder()
                    .name("dynamic")
                    .issuer("https://dynamic.example.com")
                    .claim_mappings(vec![
                        ClaimMapping::builder()
                            .org_attribute("org")
                            .org_display_attribute("display")
                            .roles_attribute("roles")
                            .build(),
                    ])
                    .build()
                    .unwrap(),
            ],
            ..AuthnConfig::default()
        };

        let registry = OriginRegistry::from_config(
            config,
            Arc::new(ScriptedFetcher::default()),
            Arc::new(MemoryIdentityStore::new()),
        )
        .unwrap();

        let dynamic = registry.resolve_by_issuer("https://dynamic.example.com").unwrap();
        assert!(dynamic.config().reserved_org_names().contains("acme"));
    }

    #[tokio::test]
    async fn test_refresh_all_empty_registry() {
        let registry = registry(Arc::new(ScriptedFetcher::default()));
        let report = registry.refresh_all().await.unwrap();
        assert!(report.refreshed.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_skips_issuers_without_url() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let registry = registry(fetcher.clone());
        registry.add_issuer(issuer("bare", "", OriginKind::Custom)).unwrap();

        let report = registry.refresh_all().await.unwrap();
        assert_eq!(report.skipped, vec!["https://bare.example.com"]);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_all_partial_failure() {
        let key = TestKeyPair::generate("k1");
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(jwks_document(&[key.jwk()]));
        fetcher.push_err(JwksError::fetch("connection refused"));
        let registry = registry(fetcher.clone());
        registry.add_issuer(issuer("up", "https://up/jwks", OriginKind::Custom)).unwrap();
        registry.add_issuer(issuer("down", "https://down/jwks", OriginKind::Custom)).unwrap();

        let report = registry.refresh_all().await.unwrap();
        assert_eq!(report.refreshed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.is_partial());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_total_failure() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let registry = registry(fetcher);
        registry.add_issuer(issuer("a", "https://a/jwks", OriginKind::Custom)).unwrap();
        registry.add_issuer(issuer("b", "https://b/jwks", OriginKind::Keycloak)).unwrap();

        match registry.refresh_all().await {
            Err(RegistryError::AllIssuersFailed { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected AllIssuersFailed, got {other:?}"),
        }
    }
}
