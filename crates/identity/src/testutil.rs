//! Shared test utilities for identity-store testing.
//!
//! Feature-gated behind `testutil` to keep fixtures out of production builds.
//!
//! ```toml
//! [dev-dependencies]
//! forge-common-identity = { path = "../identity", features = ["testutil"] }
//! ```

use chrono::{DateTime, Utc};

use crate::types::{OrgData, OrgEntry};

/// Builds an org entry with the given roles and timestamp.
#[must_use]
pub fn org_entry(
    name: &str,
    display_name: &str,
    roles: &[&str],
    updated_at: Option<DateTime<Utc>>,
) -> OrgEntry {
    OrgEntry::builder()
        .name(name)
        .display_name(display_name)
        .roles(roles.iter().map(|r| (*r).to_owned()).collect())
        .maybe_updated_at(updated_at)
        .build()
}

/// Builds an [`OrgData`] map from a list of entries, keyed by entry name.
#[must_use]
pub fn org_data(entries: impl IntoIterator<Item = OrgEntry>) -> OrgData {
    entries.into_iter().map(|entry| (entry.name.clone(), entry)).collect()
}

/// Asserts that an [`IdentityResult`](crate::IdentityResult) is an `Err`
/// matching the given [`IdentityError`](crate::IdentityError) variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use forge_common_identity::{IdentityError, IdentityResult, assert_identity_error};
///
/// let result: IdentityResult<()> = Err(IdentityError::conflict());
/// assert_identity_error!(result, Conflict);
/// ```
#[macro_export]
macro_rules! assert_identity_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::IdentityError::$variant { .. })),
            "expected IdentityError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}
