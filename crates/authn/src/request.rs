//! Inbound request surface.

use forge_common_identity::UserRecord;
use http::{HeaderMap, header::AUTHORIZATION};

use crate::error::Rejection;

/// Header carrying the upstream-asserted user name (base64).
pub const USER_NAME_HEADER: &str = "NV-Ngc-User-Name";
/// Header carrying the upstream-asserted email (base64).
pub const USER_EMAIL_HEADER: &str = "X-Ngc-Email-Id";
/// Header carrying upstream-asserted roles (comma-separated).
pub const USER_ROLES_HEADER: &str = "NV-Ngc-User-Roles";
/// Header carrying the upstream-asserted organization display name (base64).
pub const ORG_DISPLAY_NAME_HEADER: &str = "NV-Ngc-Org-Display-Name";
/// Correlation header identifying the caller of legacy v2 tokens.
pub const ACTOR_ID_HEADER: &str = "NV-Actor-Id";
/// Older spelling of [`ACTOR_ID_HEADER`].
pub const LEGACY_ACTOR_ID_HEADER: &str = "X-Starfleet-Id";

/// What the authentication core needs from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// Organization named in the request path.
    pub org_name: String,
}

impl AuthRequest {
    /// Creates a request for `org_name`.
    #[must_use]
    pub fn new(headers: HeaderMap, org_name: impl Into<String>) -> Self {
        Self { headers, org_name: org_name.into() }
    }

    /// A header value as a non-empty, trimmed string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// The bearer token. See [`bearer_token`].
    ///
    /// # Errors
    ///
    /// Returns a 401 [`Rejection`] when no usable bearer token is present.
    pub fn bearer_token(&self) -> Result<&str, Rejection> {
        bearer_token(&self.headers)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// Returns a 401 [`Rejection`] if the header is missing, not a bearer
/// header, or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, Rejection> {
    let missing = || Rejection::unauthorized("Request is missing authorization header");

    let value = headers.get(AUTHORIZATION).ok_or_else(missing)?;
    let value = value.to_str().map_err(|_| missing())?.trim();
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(missing());
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(Rejection::unauthorized("Invalid authorization token in request"));
    }
    Ok(token)
}

/// A successfully authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The stored identity record, after any write-back.
    pub user: UserRecord,
    /// Whether the token proved a service account rather than a person.
    pub is_service_account: bool,
}
