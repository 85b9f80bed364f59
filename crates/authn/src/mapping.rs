//! Claim-mapping engine.
//!
//! Turns verified claims into organization membership for the organization
//! named in the request, using an issuer's ordered [`ClaimMapping`] rules.
//! The first rule whose organization name equals the requested one wins;
//! later rules resolving to the same name are never consulted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use forge_common_identity::{OrgData, OrgEntry};
use thiserror::Error;

use crate::{claims::Claims, config::ClaimMapping};

/// Roles granted by a service account mapping, replacing any derived roles.
pub const SERVICE_ACCOUNT_ROLES: &[&str] = &["FORGE_PROVIDER_ADMIN", "FORGE_TENANT_ADMIN"];

/// Why claim mapping produced no membership for the requested organization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MappingError {
    /// The request names no organization.
    #[error("Request does not name an organization")]
    MissingRequestedOrg,

    /// A dynamic mapping resolved to a statically configured organization.
    #[error("Organization '{org}' is reserved and cannot be mapped dynamically")]
    ReservedOrgName {
        /// The reserved organization name.
        org: String,
    },

    /// No mapping resolved to the requested organization.
    #[error("No claim mapping for organization '{org}'")]
    NoMatchingMapping {
        /// The requested organization name.
        org: String,
    },

    /// The winning mapping produced no roles.
    #[error("No roles for organization '{org}'")]
    NoClaimRoles {
        /// The requested organization name.
        org: String,
    },
}

/// Membership derived for the requested organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgResolution {
    /// A single entry, keyed by the lowercased organization name.
    pub org_data: OrgData,
    /// Whether the winning mapping is a service account mapping.
    pub is_service_account: bool,
}

impl ClaimMapping {
    /// Organization name (lowercased) and display name this mapping yields
    /// for `claims`.
    ///
    /// Static mappings ignore the claims. The display name falls back to the
    /// organization name as configured or as found in the claim, before
    /// lowercasing. Returns `None` when a dynamic organization claim is
    /// absent.
    #[must_use]
    pub fn org_names(&self, claims: &Claims) -> Option<(String, String)> {
        if self.is_org_dynamic() {
            let raw = claims.get_str(self.org_attribute.as_deref()?)?;
            let display = self
                .org_display_attribute
                .as_deref()
                .and_then(|path| claims.get_str(path))
                .unwrap_or(raw);
            return Some((raw.to_lowercase(), display.to_owned()));
        }

        let name = self.org_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        let display = self
            .org_display_name
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(name);
        Some((name.to_lowercase(), display.to_owned()))
    }

    /// Roles this mapping grants for `claims`.
    ///
    /// Service account mappings return [`SERVICE_ACCOUNT_ROLES`]; mappings
    /// with `roles_attribute` read the claim in any list shape; otherwise the
    /// static `roles` apply.
    #[must_use]
    pub fn roles(&self, claims: &Claims) -> Vec<String> {
        if self.is_service_account {
            return SERVICE_ACCOUNT_ROLES.iter().map(|r| (*r).to_owned()).collect();
        }
        match self.roles_attribute.as_deref().filter(|path| !path.trim().is_empty()) {
            Some(path) => claims.get_list(path),
            None => self.roles.clone(),
        }
    }
}

/// Resolve membership in `requested_org` from `claims`.
///
/// `requested_org` is compared case-insensitively. `reserved` holds
/// lowercased organization names that dynamic mappings may not claim.
///
/// # Errors
///
/// - [`MappingError::MissingRequestedOrg`] for a blank requested organization
/// - [`MappingError::ReservedOrgName`] if the winning mapping is dynamic and
///   resolved to a reserved name
/// - [`MappingError::NoMatchingMapping`] if no mapping resolves to the
///   requested organization
/// - [`MappingError::NoClaimRoles`] if the winning mapping yields no roles
pub fn resolve_org_data(
    mappings: &[ClaimMapping],
    reserved: &BTreeSet<String>,
    claims: &Claims,
    requested_org: &str,
    now: DateTime<Utc>,
) -> Result<OrgResolution, MappingError> {
    let requested = requested_org.trim().to_lowercase();
    if requested.is_empty() {
        return Err(MappingError::MissingRequestedOrg);
    }

    let Some((mapping, display_name)) = mappings.iter().find_map(|mapping| {
        mapping
            .org_names(claims)
            .filter(|(name, _)| *name == requested)
            .map(|(_, display)| (mapping, display))
    }) else {
        return Err(MappingError::NoMatchingMapping { org: requested });
    };

    if mapping.is_org_dynamic() && reserved.contains(&requested) {
        return Err(MappingError::ReservedOrgName { org: requested });
    }

    let roles = mapping.roles(claims);
    if roles.is_empty() {
        return Err(MappingError::NoClaimRoles { org: requested });
    }

    let entry = OrgEntry::builder()
        .name(requested.clone())
        .display_name(display_name)
        .roles(roles)
        .updated_at(now)
        .build();

    Ok(OrgResolution {
        org_data: OrgData::from([(requested, entry)]),
        is_service_account: mapping.is_service_account,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn claims(value: Value) -> Claims {
        Claims::try_from(value).unwrap()
    }

    fn static_mapping(org: &str, roles: &[&str]) -> ClaimMapping {
        ClaimMapping::builder()
            .org_name(org)
            .roles(roles.iter().map(|r| (*r).to_owned()).collect())
            .build()
    }

    fn dynamic_mapping() -> ClaimMapping {
        ClaimMapping::builder()
            .org_attribute("tenant.name")
            .org_display_attribute("tenant.display")
            .roles_attribute("tenant.roles")
            .build()
    }

    fn resolve(
        mappings: &[ClaimMapping],
        claims: &Claims,
        org: &str,
    ) -> Result<OrgResolution, MappingError> {
        resolve_org_data(mappings, &BTreeSet::new(), claims, org, Utc::now())
    }

    #[test]
    fn test_static_org_static_roles() {
        let mappings = [static_mapping("Acme", &["FORGE_TENANT_ADMIN"])];
        let resolved = resolve(&mappings, &claims(json!({})), "ACME").unwrap();

        let entry = &resolved.org_data["acme"];
        assert_eq!(entry.name, "acme");
        assert_eq!(entry.display_name, "Acme");
        assert_eq!(entry.roles, vec!["FORGE_TENANT_ADMIN"]);
        assert_eq!(entry.org_type, "ENTERPRISE");
        assert!(entry.teams.is_empty());
        assert!(entry.updated_at.is_some());
        assert!(!resolved.is_service_account);
    }

    #[test]
    fn test_static_org_claim_roles() {
        let mapping = ClaimMapping::builder()
            .org_name("acme")
            .org_display_name("Acme Corp")
            .roles_attribute("forge.roles")
            .build();
        let token = claims(json!({"forge": {"roles": "FORGE_TENANT_ADMIN; FORGE_TENANT_USER"}}));

        let resolved = resolve(&[mapping], &token, "acme").unwrap();
        let entry = &resolved.org_data["acme"];
        assert_eq!(entry.display_name, "Acme Corp");
        assert_eq!(entry.roles, vec!["FORGE_TENANT_ADMIN", "FORGE_TENANT_USER"]);
    }

    #[test]
    fn test_service_account_roles_override() {
        let mapping = ClaimMapping::builder()
            .org_name("acme")
            .roles(vec!["IGNORED".into()])
            .is_service_account(true)
            .build();
        let resolved = resolve(&[mapping], &claims(json!({})), "acme").unwrap();
        assert!(resolved.is_service_account);
        assert_eq!(resolved.org_data["acme"].roles, SERVICE_ACCOUNT_ROLES);
    }

    #[test]
    fn test_dynamic_org() {
        let token = claims(json!({
            "tenant": {"name": "Initech", "display": "Initech LLC", "roles": ["FORGE_TENANT_ADMIN"]}
        }));
        let resolved = resolve(&[dynamic_mapping()], &token, "initech").unwrap();
        let entry = &resolved.org_data["initech"];
        assert_eq!(entry.display_name, "Initech LLC");
        assert_eq!(entry.roles, vec!["FORGE_TENANT_ADMIN"]);
    }

    #[test]
    fn test_dynamic_display_falls_back_to_raw_name() {
        let token = claims(json!({"tenant": {"name": "Initech", "roles": "ADMIN"}}));
        let resolved = resolve(&[dynamic_mapping()], &token, "initech").unwrap();
        assert_eq!(resolved.org_data["initech"].display_name, "Initech");
    }

    #[test]
    fn test_dynamic_reserved_name_rejected() {
        let token = claims(json!({"tenant": {"name": "acme", "roles": ["ADMIN"]}}));
        let reserved = BTreeSet::from(["acme".to_owned()]);
        let result = resolve_org_data(&[dynamic_mapping()], &reserved, &token, "acme", Utc::now());
        assert_eq!(result, Err(MappingError::ReservedOrgName { org: "acme".into() }));
    }

    #[test]
    fn test_static_mapping_may_use_reserved_name() {
        let reserved = BTreeSet::from(["acme".to_owned()]);
        let mappings = [static_mapping("acme", &["ADMIN"])];
        let result =
            resolve_org_data(&mappings, &reserved, &claims(json!({})), "acme", Utc::now());
        assert!(result.is_ok());
    }

    #[test]
    fn test_no_matching_mapping() {
        let mappings = [static_mapping("acme", &["ADMIN"])];
        let result = resolve(&mappings, &claims(json!({})), "globex");
        assert_eq!(result, Err(MappingError::NoMatchingMapping { org: "globex".into() }));
    }

    #[test]
    fn test_no_roles() {
        let mapping = ClaimMapping::builder().org_name("acme").roles_attribute("missing").build();
        let result = resolve(&[mapping], &claims(json!({})), "acme");
        assert_eq!(result, Err(MappingError::NoClaimRoles { org: "acme".into() }));
    }

    #[test]
    fn test_blank_requested_org() {
        let mappings = [static_mapping("acme", &["ADMIN"])];
        assert_eq!(
            resolve(&mappings, &claims(json!({})), "  "),
            Err(MappingError::MissingRequestedOrg)
        );
    }

    #[test]
    fn test_first_matching_mapping_wins() {
        let mappings = [
            static_mapping("acme", &["FIRST"]),
            static_mapping("ACME", &["SECOND"]),
            ClaimMapping::builder().org_name("acme").is_service_account(true).build(),
        ];
        let resolved = resolve(&mappings, &claims(json!({})), "acme").unwrap();
        assert_eq!(resolved.org_data["acme"].roles, vec!["FIRST"]);
        assert!(!resolved.is_service_account);
    }

    #[test]
    fn test_first_match_with_no_roles_does_not_fall_through() {
        let mappings = [
            ClaimMapping::builder().org_name("acme").roles_attribute("absent").build(),
            static_mapping("acme", &["SECOND"]),
        ];
        let result = resolve(&mappings, &claims(json!({})), "acme");
        assert!(matches!(result, Err(MappingError::NoClaimRoles { .. })));
    }

    #[test]
    fn test_dynamic_mapping_skipped_when_claim_absent() {
        let mappings = [dynamic_mapping(), static_mapping("acme", &["STATIC"])];
        let resolved = resolve(&mappings, &claims(json!({})), "acme").unwrap();
        assert_eq!(resolved.org_data["acme"].roles, vec!["STATIC"]);
    }
}
