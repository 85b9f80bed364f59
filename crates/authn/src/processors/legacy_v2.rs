//! Tokens from the older internal token service.
//!
//! These tokens are bound to a caller by a correlation header and carry a
//! fixed scope. The identity record is keyed by the header value rather than
//! the token subject.

use super::{
    ProcessContext, get_or_create_user, upstream::apply_upstream_profile,
    upstream::read_upstream_profile, verify_token,
};
use crate::{
    error::Rejection,
    request::{ACTOR_ID_HEADER, AuthRequest, AuthenticatedUser, LEGACY_ACTOR_ID_HEADER},
};

/// Scope every legacy v2 token must carry.
pub const REQUIRED_SCOPE: &str = "kas";

/// The caller's actor ID, preferring the current header name.
#[must_use]
pub fn actor_id(request: &AuthRequest) -> Option<&str> {
    request.header(ACTOR_ID_HEADER).or_else(|| request.header(LEGACY_ACTOR_ID_HEADER))
}

#[tracing::instrument(skip_all, fields(issuer = %ctx.config.name(), org = %request.org_name))]
pub(crate) async fn process(
    ctx: &ProcessContext<'_>,
    token: &str,
    request: &AuthRequest,
) -> Result<AuthenticatedUser, Rejection> {
    let claims = verify_token(ctx, token).await?;

    if !claims.scopes().iter().any(|scope| scope == REQUIRED_SCOPE) {
        tracing::warn!("Token lacks the required scope");
        return Err(Rejection::forbidden("Token scopes do not match required scopes for issuer"));
    }

    let Some(actor_id) = actor_id(request) else {
        tracing::warn!("Request has no actor ID header");
        return Err(Rejection::unauthorized("Request is missing actor ID header"));
    };

    let org_name = request.org_name.trim().to_lowercase();
    if org_name.is_empty() {
        return Err(Rejection::forbidden(
            "User is not a member of the organization specified in URL",
        ));
    }

    let profile = read_upstream_profile(request)?;
    let user = get_or_create_user(ctx.identity, actor_id).await?;
    let user = apply_upstream_profile(ctx, user, &org_name, &profile).await?;

    Ok(AuthenticatedUser { user, is_service_account: false })
}
