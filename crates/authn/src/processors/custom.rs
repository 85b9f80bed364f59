//! Externally configured issuers.
//!
//! Checks run in a fixed order: audience (401), scopes (403), then claim
//! mapping against the requested organization. The identity store is only
//! touched once all of them pass.

use chrono::Utc;
use forge_common_identity::UserUpdate;

use super::{
    ProcessContext, get_or_create_user, require_subject, update_user, verify_token,
};
use crate::{
    error::Rejection,
    mapping::{MappingError, resolve_org_data},
    merge::{MergeOutcome, merge_org_data},
    request::{AuthRequest, AuthenticatedUser},
};

fn mapping_rejection(err: &MappingError) -> Rejection {
    tracing::warn!(error = %err, "Claim mapping failed");
    match err {
        MappingError::ReservedOrgName { .. } => Rejection::forbidden(
            "Organization cannot be authorized dynamically using claims data",
        ),
        MappingError::NoMatchingMapping { .. } => Rejection::unauthorized(
            "No authorization configuration exists for organization specified in URL",
        ),
        MappingError::NoClaimRoles { .. } => Rejection::unauthorized(
            "Failed to extract organization roles from claims, invalid or non-existent role data",
        ),
        MappingError::MissingRequestedOrg => Rejection::unauthorized(
            "Failed to extract organization data from claims, invalid claim or configuration",
        ),
    }
}

#[tracing::instrument(skip_all, fields(issuer = %ctx.config.name(), org = %request.org_name))]
pub(crate) async fn process(
    ctx: &ProcessContext<'_>,
    token: &str,
    request: &AuthRequest,
) -> Result<AuthenticatedUser, Rejection> {
    let claims = verify_token(ctx, token).await?;
    let subject = require_subject(&claims)?;
    let requested_org = request.org_name.trim().to_lowercase();

    if !claims.has_any_audience(ctx.config.audiences()) {
        tracing::warn!("Token audience does not match issuer configuration");
        return Err(Rejection::unauthorized("Token audience does not match issuer configuration"));
    }
    if !claims.has_all_scopes(ctx.config.scopes()) {
        tracing::warn!("Token scopes do not match issuer requirements");
        return Err(Rejection::forbidden("Token scopes do not match required scopes for issuer"));
    }

    let now = Utc::now();
    let resolution = resolve_org_data(
        ctx.config.claim_mappings(),
        ctx.config.reserved_org_names(),
        &claims,
        &requested_org,
        now,
    )
    .map_err(|e| mapping_rejection(&e))?;

    let auxiliary_id = match ctx.subject_prefix {
        Some(prefix) => format!("{prefix}:{subject}"),
        None => subject.to_owned(),
    };

    let user = get_or_create_user(ctx.identity, &auxiliary_id).await?;
    let user = match merge_org_data(&user.org_data, &resolution.org_data, &requested_org, now)? {
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

    Ok(AuthenticatedUser { user, is_service_account: resolution.is_service_account })
}
