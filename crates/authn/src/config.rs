//! Issuer configuration.
//!
//! Configuration is normally loaded from YAML at startup with
//! [`AuthnConfig::from_yaml_str`], then handed to
//! [`OriginRegistry::from_config`](crate::OriginRegistry::from_config).
//! Durations use humantime notation (`5s`, `1m`).
//!
//! ```yaml
//! retry:
//!   max_attempts: 5
//!   delay: 1s
//! issuers:
//!   - name: forge-idp
//!     issuer: https://idp.example.com/realms/forge
//!     jwks_url: https://idp.example.com/realms/forge/protocol/openid-connect/certs
//!     origin: keycloak
//!   - name: partner
//!     issuer: https://login.partner.example.com
//!     jwks_url: https://login.partner.example.com/.well-known/jwks.json
//!     audiences: [forge-api]
//!     scopes: [forge.read]
//!     claim_mappings:
//!       - org_name: partner-corp
//!         org_display_name: Partner Corp
//!         roles_attribute: forge.roles
//! ```

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::RegistryError, jwks::DEFAULT_JWKS_TIMEOUT};

/// Default maximum refresh attempts on a key miss.
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between refresh attempts on a key miss.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Which processor handles tokens from an issuer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginKind {
    /// The embedded identity provider (realm-role tokens).
    #[serde(rename = "keycloak")]
    Keycloak,
    /// Current internal token service, identity from upstream headers.
    #[serde(rename = "kas-legacy")]
    LegacyV1,
    /// Older internal token service, identity keyed by actor header.
    #[serde(rename = "kas-ssa")]
    LegacyV2,
    /// Any externally configured issuer.
    #[default]
    #[serde(rename = "custom")]
    Custom,
}

impl OriginKind {
    /// Configuration name of this origin.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keycloak => "keycloak",
            Self::LegacyV1 => "kas-legacy",
            Self::LegacyV2 => "kas-ssa",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for OriginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One claim-to-organization rule.
///
/// The shape is selected by which fields are set:
///
/// | shape                    | `org_name` | `org_attribute` | roles from         |
/// |--------------------------|------------|-----------------|--------------------|
/// | static org, static roles | set        | -               | `roles`            |
/// | static org, claim roles  | set        | -               | `roles_attribute`  |
/// | dynamic                  | -          | set             | `roles_attribute`  |
///
/// `is_service_account` replaces role derivation with the fixed service
/// account roles and is only valid with a static org.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ClaimMapping {
    /// Claim path holding the organization name (dynamic mode).
    #[serde(default, alias = "orgAttribute")]
    #[builder(into)]
    pub org_attribute: Option<String>,
    /// Claim path holding the organization display name (dynamic mode).
    #[serde(default, alias = "orgDisplayAttribute")]
    #[builder(into)]
    pub org_display_attribute: Option<String>,
    /// Static organization name.
    #[serde(default, alias = "orgName")]
    #[builder(into)]
    pub org_name: Option<String>,
    /// Static organization display name; defaults to `org_name`.
    #[serde(default, alias = "orgDisplayName")]
    #[builder(into)]
    pub org_display_name: Option<String>,
    /// Claim path holding roles.
    #[serde(default, alias = "rolesAttribute")]
    #[builder(into)]
    pub roles_attribute: Option<String>,
    /// Static roles.
    #[serde(default)]
    #[builder(default)]
    pub roles: Vec<String>,
    /// Grant the fixed service account roles.
    #[serde(default, alias = "isServiceAccount")]
    #[builder(default)]
    pub is_service_account: bool,
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl ClaimMapping {
    /// Returns `true` if the organization name comes from a claim.
    #[must_use]
    pub fn is_org_dynamic(&self) -> bool {
        is_set(self.org_attribute.as_ref())
    }

    /// Returns `true` if the organization name is configured literally.
    #[must_use]
    pub fn is_org_static(&self) -> bool {
        is_set(self.org_name.as_ref())
    }

    /// Check that exactly one mapping shape applies.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] describing the violated rule.
    pub fn validate(&self) -> Result<(), RegistryError> {
        match (self.is_org_static(), self.is_org_dynamic()) {
            (true, true) => {
                return Err(RegistryError::invalid_config(
                    "claim mapping sets both org_name and org_attribute",
                ));
            },
            (false, false) => {
                return Err(RegistryError::invalid_config(
                    "claim mapping needs org_name or org_attribute",
                ));
            },
            _ => {},
        }

        if self.is_org_dynamic() {
            if self.is_service_account {
                return Err(RegistryError::invalid_config(
                    "service account mappings cannot use a dynamic organization",
                ));
            }
            if !is_set(self.org_display_attribute.as_ref()) || !is_set(self.roles_attribute.as_ref())
            {
                return Err(RegistryError::invalid_config(
                    "dynamic claim mapping needs org_display_attribute and roles_attribute",
                ));
            }
            return Ok(());
        }

        if !self.is_service_account && !is_set(self.roles_attribute.as_ref()) && self.roles.is_empty()
        {
            return Err(RegistryError::invalid_config(format!(
                "claim mapping for '{}' needs roles or roles_attribute",
                self.org_name.as_deref().unwrap_or_default()
            )));
        }

        Ok(())
    }
}

fn default_jwks_timeout() -> Duration {
    DEFAULT_JWKS_TIMEOUT
}

/// Configuration of one identity source.
///
/// Build in code with [`IssuerConfig::builder`], which validates, or
/// deserialize and call [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
    pub(crate) name: String,
    pub(crate) issuer: String,
    #[serde(default)]
    pub(crate) jwks_url: String,
    #[serde(default)]
    pub(crate) origin: OriginKind,
    #[serde(with = "humantime_serde", default = "default_jwks_timeout")]
    pub(crate) jwks_timeout: Duration,
    #[serde(default)]
    pub(crate) audiences: Vec<String>,
    #[serde(default)]
    pub(crate) scopes: Vec<String>,
    #[serde(default)]
    pub(crate) service_account: bool,
    #[serde(default)]
    pub(crate) claim_mappings: Vec<ClaimMapping>,
    #[serde(default)]
    pub(crate) reserved_org_names: BTreeSet<String>,
}

#[bon::bon]
impl IssuerConfig {
    /// Creates a validated issuer configuration.
    ///
    /// # Optional Fields
    ///
    /// * `jwks_url` - JWKS endpoint; without one the issuer is never refreshed.
    /// * `origin` - Processor kind (default: custom).
    /// * `jwks_timeout` - Fetch timeout (default: 5 seconds).
    /// * `audiences` - Accepted audiences, any one suffices.
    /// * `scopes` - Required scopes, all must be granted.
    /// * `service_account` - Accept client-credential tokens.
    /// * `claim_mappings` - Ordered claim mapping rules.
    /// * `reserved_org_names` - Names dynamic mappings may not claim.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] if the name or issuer is
    /// empty or any claim mapping is invalid.
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(into)] issuer: String,
        #[builder(into, default)] jwks_url: String,
        #[builder(default)] origin: OriginKind,
        #[builder(default = DEFAULT_JWKS_TIMEOUT)] jwks_timeout: Duration,
        #[builder(default)] audiences: Vec<String>,
        #[builder(default)] scopes: Vec<String>,
        #[builder(default)] service_account: bool,
        #[builder(default)] claim_mappings: Vec<ClaimMapping>,
        #[builder(default)] reserved_org_names: BTreeSet<String>,
    ) -> Result<Self, RegistryError> {
        let config = Self {
            name,
            issuer,
            jwks_url,
            origin,
            jwks_timeout,
            audiences,
            scopes,
            service_account,
            claim_mappings,
            reserved_org_names,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] if the name or issuer is
    /// empty or any claim mapping is invalid.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::invalid_config("issuer name cannot be empty"));
        }
        if self.issuer.trim().is_empty() {
            return Err(RegistryError::invalid_config(format!(
                "issuer '{}' has an empty issuer string",
                self.name
            )));
        }
        for mapping in &self.claim_mappings {
            mapping.validate().map_err(|e| {
                RegistryError::invalid_config(format!("issuer '{}': {e}", self.name))
            })?;
        }
        Ok(())
    }

    /// Logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected `iss` value, matched exactly.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// JWKS endpoint URL. Empty when the issuer is never refreshed.
    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Processor kind.
    #[must_use]
    pub fn origin(&self) -> OriginKind {
        self.origin
    }

    /// JWKS fetch timeout.
    #[must_use]
    pub fn jwks_timeout(&self) -> Duration {
        self.jwks_timeout
    }

    /// Accepted audiences.
    #[must_use]
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Required scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Whether client-credential tokens are accepted.
    #[must_use]
    pub fn service_account(&self) -> bool {
        self.service_account
    }

    /// Ordered claim mapping rules.
    #[must_use]
    pub fn claim_mappings(&self) -> &[ClaimMapping] {
        &self.claim_mappings
    }

    /// Organization names dynamic mappings may not claim.
    #[must_use]
    pub fn reserved_org_names(&self) -> &BTreeSet<String> {
        &self.reserved_org_names
    }

    /// Static organization names of every claim mapping, lowercased.
    #[must_use]
    pub fn static_org_names(&self) -> BTreeSet<String> {
        self.claim_mappings
            .iter()
            .filter_map(|m| m.org_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

/// Bounded refresh-and-retry budget applied when a token names an unknown
/// `kid`. The worst-case added latency is roughly
/// `(max_attempts - 1) * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum number of refresh attempts.
    #[serde(default = "default_retry_attempts")]
    #[builder(default = default_retry_attempts())]
    pub max_attempts: u32,

    /// Delay between attempts.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    #[builder(default = default_retry_delay())]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: default_retry_attempts(), delay: default_retry_delay() }
    }
}

fn default_min_refresh_interval() -> Duration {
    crate::jwks::DEFAULT_MIN_REFRESH_INTERVAL
}

/// Top-level authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthnConfig {
    /// Configured identity sources.
    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,
    /// Key-miss retry budget.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Minimum interval between refreshes of one issuer.
    #[serde(with = "humantime_serde", default = "default_min_refresh_interval")]
    pub min_refresh_interval: Duration,
}

impl Default for AuthnConfig {
    fn default() -> Self {
        Self {
            issuers: Vec::new(),
            retry: RetryPolicy::default(),
            min_refresh_interval: default_min_refresh_interval(),
        }
    }
}

impl AuthnConfig {
    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] if the YAML is malformed,
    /// has unknown fields, or fails validation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| RegistryError::invalid_config(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every issuer and the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] on the first problem found.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.retry.max_attempts == 0 {
            return Err(RegistryError::invalid_config("retry.max_attempts must be at least 1"));
        }
        self.issuers.iter().try_for_each(IssuerConfig::validate)
    }

    /// Lowercased static organization names across every issuer.
    #[must_use]
    pub fn reserved_org_names(&self) -> BTreeSet<String> {
        self.issuers.iter().flat_map(IssuerConfig::static_org_names).collect()
    }
}
