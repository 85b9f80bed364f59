//! Identity record types shared between the store and the authentication core.
//!
//! A [`UserRecord`] is keyed by an auxiliary ID (the namespaced subject
//! computed during token processing) and carries per-organization
//! membership data in [`OrgData`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organization type assigned to every entry written by token processing.
pub const ORG_TYPE_ENTERPRISE: &str = "ENTERPRISE";

/// Macro to define a newtype wrapper around `i64` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `i64`
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<i64>`, `Into<i64>` and `Display`
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Primary key of a user record.
    ///
    /// # Examples
    ///
    /// ```
    /// use forge_common_identity::UserId;
    ///
    /// let id = UserId::from(7);
    /// assert_eq!(i64::from(id), 7);
    /// assert_eq!(id.to_string(), "7");
    /// ```
    UserId
);

/// Membership of one user in one organization.
///
/// # Examples
///
/// ```
/// use forge_common_identity::OrgEntry;
///
/// let entry = OrgEntry::builder()
///     .name("acme")
///     .display_name("Acme Corp")
///     .roles(vec!["FORGE_TENANT_ADMIN".to_owned()])
///     .build();
/// assert_eq!(entry.org_type, "ENTERPRISE");
/// assert!(entry.updated_at.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct OrgEntry {
    /// Lowercased organization name.
    pub name: String,
    /// Human-readable organization name.
    pub display_name: String,
    /// Organization type.
    #[builder(default = ORG_TYPE_ENTERPRISE.to_owned())]
    #[serde(default = "default_org_type")]
    pub org_type: String,
    /// Roles granted within the organization.
    #[builder(default)]
    #[serde(default)]
    pub roles: Vec<String>,
    /// Team names within the organization.
    #[builder(default)]
    #[serde(default)]
    pub teams: Vec<String>,
    /// When this entry was last derived from a token. `None` means never.
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_org_type() -> String {
    ORG_TYPE_ENTERPRISE.to_owned()
}

impl OrgEntry {
    /// Compares every field except `updated_at`.
    #[must_use]
    pub fn same_content(&self, other: &OrgEntry) -> bool {
        self.name == other.name
            && self.display_name == other.display_name
            && self.org_type == other.org_type
            && self.roles == other.roles
            && self.teams == other.teams
    }
}

/// Organization memberships keyed by lowercased organization name.
pub type OrgData = BTreeMap<String, OrgEntry>;

/// A durable user record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Primary key.
    pub id: UserId,
    /// Namespaced subject the record is keyed by.
    pub auxiliary_id: String,
    /// Email address, if known.
    pub email: Option<String>,
    /// Given name, if known.
    pub first_name: Option<String>,
    /// Family name, if known.
    pub last_name: Option<String>,
    /// Per-organization membership data.
    pub org_data: OrgData,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by [`IdentityStore::update`](crate::IdentityStore::update).
///
/// `None` fields leave the stored value untouched. `org_data`, when set,
/// replaces the whole organization map.
#[derive(Clone, Debug, Default, PartialEq, Eq, bon::Builder)]
pub struct UserUpdate {
    /// New email address.
    #[builder(into)]
    pub email: Option<String>,
    /// New given name.
    #[builder(into)]
    pub first_name: Option<String>,
    /// New family name.
    #[builder(into)]
    pub last_name: Option<String>,
    /// Replacement organization map.
    pub org_data: Option<OrgData>,
}

impl UserUpdate {
    /// Returns `true` when applying this update would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.org_data.is_none()
    }
}
