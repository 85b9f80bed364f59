//! Tokens from the current internal token service.
//!
//! The token proves membership through its `access` list; roles, display
//! names and profile data arrive in headers set by the trusted upstream
//! gateway.

use serde_json::Value;

use super::{
    ProcessContext, get_or_create_user, require_subject, upstream::apply_upstream_profile,
    upstream::read_upstream_profile, verify_token,
};
use crate::{
    claims::Claims,
    error::Rejection,
    request::{AuthRequest, AuthenticatedUser},
};

/// Prefix of `access` entry types that grant organization membership.
pub const ORG_ACCESS_TYPE_PREFIX: &str = "group/ngc";

/// Returns `true` if the `access` claim lists `org_name` (case-insensitive)
/// under an organization access type.
#[must_use]
pub fn has_org_access(claims: &Claims, org_name: &str) -> bool {
    let Some(entries) = claims.get("access").and_then(Value::as_array) else {
        return false;
    };
    entries.iter().any(|entry| {
        let field = |name: &str| entry.get(name).and_then(Value::as_str).unwrap_or_default();
        field("type").starts_with(ORG_ACCESS_TYPE_PREFIX)
            && field("name").eq_ignore_ascii_case(org_name)
    })
}

#[tracing::instrument(skip_all, fields(issuer = %ctx.config.name(), org = %request.org_name))]
pub(crate) async fn process(
    ctx: &ProcessContext<'_>,
    token: &str,
    request: &AuthRequest,
) -> Result<AuthenticatedUser, Rejection> {
    let claims = verify_token(ctx, token).await?;
    let subject = require_subject(&claims)?;

    let org_name = request.org_name.trim().to_lowercase();
    if org_name.is_empty() || !has_org_access(&claims, &org_name) {
        tracing::warn!("Token does not grant access to the requested org");
        return Err(Rejection::forbidden(
            "User is not a member of the organization specified in URL",
        ));
    }

    let profile = read_upstream_profile(request)?;
    let user = get_or_create_user(ctx.identity, subject).await?;
    let user = apply_upstream_profile(ctx, user, &org_name, &profile).await?;

    Ok(AuthenticatedUser { user, is_service_account: false })
}
