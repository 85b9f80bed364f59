//! Embedded identity provider tokens.
//!
//! Membership comes from realm roles written as `<org>:<ROLE>`. A token
//! carrying a client ID was obtained with client credentials and represents
//! a service account, which the issuer must explicitly allow.

use chrono::Utc;
use forge_common_identity::{OrgData, OrgEntry, UserUpdate};

use super::{
    ProcessContext, get_or_create_user, require_subject, update_user, verify_token,
};
use crate::{
    claims::Claims,
    error::Rejection,
    merge::{MergeOutcome, merge_org_data},
    request::{AuthRequest, AuthenticatedUser},
};

/// Claim path of the realm role list.
pub const REALM_ROLES_CLAIM: &str = "realm_access.roles";

/// Claims that carry the client ID of a client-credentials token.
pub const CLIENT_ID_CLAIMS: &[&str] = &["client_id", "clientId"];

/// Build organization data from `<org>:<ROLE>` realm roles.
///
/// Entries without exactly one colon, or with an empty half, are ignored.
/// Organization names are lowercased and each becomes its own display name.
/// Roles keep first-seen order and are deduplicated per organization.
#[must_use]
pub fn org_data_from_realm_roles(roles: &[String]) -> OrgData {
    let mut org_data = OrgData::new();
    for role in roles {
        let mut parts = role.split(':');
        let (Some(org), Some(role), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (org, role) = (org.trim().to_lowercase(), role.trim());
        if org.is_empty() || role.is_empty() {
            continue;
        }

        let entry = org_data.entry(org.clone()).or_insert_with(|| {
            OrgEntry::builder().name(org.clone()).display_name(org).build()
        });
        if !entry.roles.iter().any(|existing| existing == role) {
            entry.roles.push(role.to_owned());
        }
    }
    org_data
}

fn client_id(claims: &Claims) -> Option<&str> {
    claims.first_str(CLIENT_ID_CLAIMS)
}

#[tracing::instrument(skip_all, fields(issuer = %ctx.config.name(), org = %request.org_name))]
pub(crate) async fn process(
    ctx: &ProcessContext<'_>,
    token: &str,
    request: &AuthRequest,
) -> Result<AuthenticatedUser, Rejection> {
    let claims = verify_token(ctx, token).await?;
    let subject = require_subject(&claims)?;

    let is_service_account = client_id(&claims).is_some();
    if is_service_account && !ctx.config.service_account() {
        tracing::warn!("Service account token rejected, service accounts are disabled");
        return Err(Rejection::unauthorized("Service accounts are not enabled"));
    }

    let now = Utc::now();
    let mut fresh = org_data_from_realm_roles(&claims.get_list(REALM_ROLES_CLAIM));
    if fresh.is_empty() {
        tracing::warn!("Token carries no organization roles");
        return Err(Rejection::forbidden("User does not have any roles assigned"));
    }
    for entry in fresh.values_mut() {
        entry.updated_at = Some(now);
    }

    let requested_org = request.org_name.trim().to_lowercase();
    let user = get_or_create_user(ctx.identity, subject).await?;

    let user = match merge_org_data(&user.org_data, &fresh, &requested_org, now)? {
        MergeOutcome::Unchanged => user,
        MergeOutcome::Updated(org_data) => {
            let (first_name, last_name) = claims.names();
            let update = UserUpdate {
                email: claims.email().map(str::to_owned),
                first_name,
                last_name,
                org_data: Some(org_data),
            };
            update_user(ctx.identity, user.id, update).await?
        },
    };

    Ok(AuthenticatedUser { user, is_service_account })
}
