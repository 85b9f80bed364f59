//! Profile and role data injected by the trusted upstream gateway in front
//! of the legacy token services.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use forge_common_identity::{UserRecord, UserUpdate};

use super::{ProcessContext, changed, update_user};
use crate::{
    error::Rejection,
    merge::{MergeOutcome, merge_upstream_org},
    request::{
        AuthRequest, ORG_DISPLAY_NAME_HEADER, USER_EMAIL_HEADER, USER_NAME_HEADER,
        USER_ROLES_HEADER,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpstreamProfile {
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) roles: Vec<String>,
    pub(crate) org_display_name: String,
}

fn decode_header(value: &str) -> Option<String> {
    STANDARD.decode(value).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Roles as sent upstream, e.g. `forge-tenant-admin`, become
/// `FORGE_TENANT_ADMIN`. The result is sorted.
pub(crate) fn normalize_roles(raw: &str) -> Vec<String> {
    let mut roles: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(|role| role.replace('-', "_").to_uppercase())
        .collect();
    roles.sort();
    roles
}

/// Read the upstream headers.
///
/// The name and email headers are optional; roles and the organization
/// display name are required.
pub(crate) fn read_upstream_profile(request: &AuthRequest) -> Result<UpstreamProfile, Rejection> {
    let (first_name, last_name) = match request.header(USER_NAME_HEADER) {
        Some(encoded) => {
            let name = decode_header(encoded).ok_or_else(|| {
                tracing::warn!("Failed to decode user name header, invalid base64 value");
                Rejection::unauthorized("Invalid value in NGC org user name header")
            })?;
            let (first, last) = name.split_once(' ').unwrap_or((name.as_str(), ""));
            let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
            (non_empty(first), non_empty(last))
        },
        None => {
            tracing::debug!("Request has no user name header");
            (None, None)
        },
    };

    let email = match request.header(USER_EMAIL_HEADER) {
        Some(encoded) => Some(decode_header(encoded).ok_or_else(|| {
            tracing::warn!("Failed to decode user email header, invalid base64 value");
            Rejection::unauthorized("Invalid value in NGC org user email header")
        })?),
        None => {
            tracing::debug!("Request has no user email header");
            None
        },
    };

    let roles = request.header(USER_ROLES_HEADER).map(normalize_roles).unwrap_or_default();
    if roles.is_empty() {
        tracing::warn!("Request has no roles header, access denied");
        return Err(Rejection::unauthorized("Request is missing NGC roles header"));
    }

    let encoded_display = request.header(ORG_DISPLAY_NAME_HEADER).ok_or_else(|| {
        tracing::warn!("Request has no org display name header, access denied");
        Rejection::unauthorized("Request is missing NGC org display name header")
    })?;
    let org_display_name = decode_header(encoded_display).ok_or_else(|| {
        tracing::warn!("Failed to decode org display name header");
        Rejection::unauthorized("Invalid value in NGC org display name header")
    })?;

    Ok(UpstreamProfile { first_name, last_name, email, roles, org_display_name })
}

/// Write the profile and the membership of `org_name` back, touching the
/// store only when something changed.
pub(crate) async fn apply_upstream_profile(
    ctx: &ProcessContext<'_>,
    user: UserRecord,
    org_name: &str,
    profile: &UpstreamProfile,
) -> Result<UserRecord, Rejection> {
    let org_data = match merge_upstream_org(
        &user.org_data,
        org_name,
        &profile.org_display_name,
        &profile.roles,
        Utc::now(),
    ) {
        MergeOutcome::Updated(org_data) => Some(org_data),
        MergeOutcome::Unchanged => None,
    };

    let update = UserUpdate {
        email: changed(user.email.as_deref(), profile.email.as_deref()),
        first_name: changed(user.first_name.as_deref(), profile.first_name.as_deref()),
        last_name: changed(user.last_name.as_deref(), profile.last_name.as_deref()),
        org_data,
    };
    if update.is_empty() {
        return Ok(user);
    }

    update_user(ctx.identity, user.id, update).await
}
