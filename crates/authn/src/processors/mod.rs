//! Token processors, one per origin kind.
//!
//! Every processor follows the same outline: verify the token through the
//! [`KeyResolver`], require a subject, derive organization membership in the
//! way its origin asserts it, then write any changes back through the
//! [`IdentityStore`]. Failures leave a processor only as a [`Rejection`];
//! the underlying cause is logged, never returned.

use forge_common_identity::{IdentityStore, UserId, UserRecord, UserUpdate};

use crate::{
    claims::Claims,
    config::{IssuerConfig, OriginKind},
    error::{AuthError, Rejection},
    request::{AuthRequest, AuthenticatedUser},
    resolver::KeyResolver,
};

pub mod custom;
pub mod keycloak;
pub mod legacy_v1;
pub mod legacy_v2;
mod upstream;

pub(crate) const TOKEN_EXPIRED: &str = "Authorization token in request has expired";
pub(crate) const INVALID_TOKEN: &str = "Invalid authorization token in request";
pub(crate) const MISSING_SUBJECT: &str =
    "Invalid authorization token, could not find subject ID in claim";

/// Everything a processor may touch while handling one token.
pub struct ProcessContext<'a> {
    /// Verifies the token against the issuer's keys.
    pub resolver: &'a KeyResolver,
    /// Durable identity records.
    pub identity: &'a dyn IdentityStore,
    /// Configuration of the token's issuer.
    pub config: &'a IssuerConfig,
    /// Namespacing prefix for subjects, set for custom issuers only.
    pub subject_prefix: Option<&'a str>,
}

/// Processing strategy for one origin kind, chosen once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    /// Embedded identity provider.
    Keycloak,
    /// Current internal token service.
    LegacyV1,
    /// Older internal token service.
    LegacyV2,
    /// Externally configured issuer.
    Custom,
}

impl From<OriginKind> for Processor {
    fn from(origin: OriginKind) -> Self {
        match origin {
            OriginKind::Keycloak => Self::Keycloak,
            OriginKind::LegacyV1 => Self::LegacyV1,
            OriginKind::LegacyV2 => Self::LegacyV2,
            OriginKind::Custom => Self::Custom,
        }
    }
}

impl Processor {
    /// Authenticate `token` for `request`.
    ///
    /// # Errors
    ///
    /// Returns a 401 or 403 [`Rejection`] describing the coarse failure.
    pub async fn process(
        self,
        ctx: &ProcessContext<'_>,
        token: &str,
        request: &AuthRequest,
    ) -> Result<AuthenticatedUser, Rejection> {
        match self {
            Self::Keycloak => keycloak::process(ctx, token, request).await,
            Self::LegacyV1 => legacy_v1::process(ctx, token, request).await,
            Self::LegacyV2 => legacy_v2::process(ctx, token, request).await,
            Self::Custom => custom::process(ctx, token, request).await,
        }
    }
}

/// Verify the token, collapsing every failure to one of two messages.
pub(crate) async fn verify_token(ctx: &ProcessContext<'_>, token: &str) -> Result<Claims, Rejection> {
    ctx.resolver.verify(ctx.config.issuer(), token).await.map_err(|e| match e {
        AuthError::TokenExpired => {
            tracing::warn!("Token expired");
            Rejection::unauthorized(TOKEN_EXPIRED)
        },
        e => {
            tracing::warn!(error = %e, "Failed to validate JWT token in authorization header");
            Rejection::unauthorized(INVALID_TOKEN)
        },
    })
}

pub(crate) fn require_subject(claims: &Claims) -> Result<&str, Rejection> {
    claims.subject().ok_or_else(|| Rejection::unauthorized(MISSING_SUBJECT))
}

pub(crate) async fn get_or_create_user(
    identity: &dyn IdentityStore,
    auxiliary_id: &str,
) -> Result<UserRecord, Rejection> {
    match identity.get_or_create(auxiliary_id).await {
        Ok((user, created)) => {
            if created {
                tracing::info!(user_id = %user.id, "Created user record");
            }
            Ok(user)
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to get or create user record");
            Err(Rejection::unauthorized("Failed to retrieve or create user record, DB error"))
        },
    }
}

pub(crate) async fn update_user(
    identity: &dyn IdentityStore,
    user_id: UserId,
    update: UserUpdate,
) -> Result<UserRecord, Rejection> {
    identity.update(user_id, update).await.map_err(|e| {
        tracing::error!(error = %e, user_id = %user_id, "Failed to update user record");
        Rejection::unauthorized("Failed to update user record, DB error")
    })
}

/// Returns `Some(new)` when it is set and differs from `current`.
pub(crate) fn changed(current: Option<&str>, new: Option<&str>) -> Option<String> {
    new.filter(|value| current != Some(*value)).map(str::to_owned)
}
