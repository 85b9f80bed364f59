//! Identity merge.
//!
//! Reconciles freshly derived organization data with what the identity
//! store already holds. Only the requested organization is ever touched;
//! other memberships on the record are carried over unchanged.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Utc};
use forge_common_identity::{OrgData, OrgEntry};

use crate::error::Rejection;

/// Age after which a stored organization entry is refreshed regardless of
/// content.
pub const STALENESS_WINDOW: Duration = Duration::from_secs(60);

/// Whether the stored record needs a write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The stored entry is fresh and identical.
    Unchanged,
    /// The full replacement organization map to persist.
    Updated(OrgData),
}

impl MergeOutcome {
    /// Returns `true` for [`MergeOutcome::Updated`].
    #[must_use]
    pub fn needs_update(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Returns `true` if `entry` has no timestamp or was updated more than
/// [`STALENESS_WINDOW`] before `now`.
#[must_use]
pub fn is_stale(entry: &OrgEntry, now: DateTime<Utc>) -> bool {
    match entry.updated_at {
        None => true,
        Some(updated_at) => (now - updated_at).to_std().is_ok_and(|age| age > STALENESS_WINDOW),
    }
}

/// Merge the requested organization from `fresh` into `existing`.
///
/// The stored entry is left alone only when it exists, is not stale and
/// matches the fresh entry field for field (timestamps aside). Otherwise the
/// fresh entry, stamped with `now`, replaces it.
///
/// # Errors
///
/// Returns a 403 [`Rejection`] if `fresh` has no entry for `requested_org`.
pub fn merge_org_data(
    existing: &OrgData,
    fresh: &OrgData,
    requested_org: &str,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, Rejection> {
    let Some(fresh_entry) = fresh.get(requested_org) else {
        tracing::warn!(requested_org = %requested_org, "Requested org not found in token claims");
        return Err(Rejection::forbidden("Requested organization not found in token claims"));
    };

    if let Some(stored) = existing.get(requested_org)
        && !is_stale(stored, now)
        && stored.same_content(fresh_entry)
    {
        return Ok(MergeOutcome::Unchanged);
    }

    let mut merged = existing.clone();
    let mut entry = fresh_entry.clone();
    entry.updated_at = Some(now);
    merged.insert(requested_org.to_owned(), entry);

    tracing::info!(org = %requested_org, "Updating user org data");
    Ok(MergeOutcome::Updated(merged))
}

/// Merge organization data asserted by trusted upstream headers.
///
/// A missing entry is created. An existing entry is rewritten only when its
/// role set or display name differs; staleness alone never triggers a write.
#[must_use]
pub fn merge_upstream_org(
    existing: &OrgData,
    org_name: &str,
    display_name: &str,
    roles: &[String],
    now: DateTime<Utc>,
) -> MergeOutcome {
    let entry = match existing.get(org_name) {
        None => OrgEntry::builder()
            .name(org_name)
            .display_name(display_name)
            .roles(roles.to_vec())
            .updated_at(now)
            .build(),
        Some(stored) => {
            let roles_changed = stored.roles.len() != roles.len()
                || stored.roles.iter().collect::<BTreeSet<_>>()
                    != roles.iter().collect::<BTreeSet<_>>();
            let display_changed = stored.display_name != display_name;
            if !roles_changed && !display_changed {
                return MergeOutcome::Unchanged;
            }

            let mut entry = stored.clone();
            if roles_changed {
                entry.roles = roles.to_vec();
            }
            entry.display_name = display_name.to_owned();
            entry.updated_at = Some(now);
            entry
        },
    };

    let mut merged = existing.clone();
    merged.insert(org_name.to_owned(), entry);
    MergeOutcome::Updated(merged)
}
