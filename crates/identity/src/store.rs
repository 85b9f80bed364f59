//! The identity-store contract and its in-memory implementation.
//!
//! The authentication core never queries a database directly. It only calls
//! the narrow [`IdentityStore`] contract: look up or create a record by its
//! auxiliary ID, then write back changed fields.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::{IdentityError, IdentityResult},
    types::{OrgData, UserId, UserRecord, UserUpdate},
};

/// Persistent storage for user identity records.
///
/// Implementations must be safe to share across request handlers.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns the record keyed by `auxiliary_id`, creating an empty one if
    /// none exists.
    ///
    /// The boolean is `true` when the record was created by this call.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidInput`] if `auxiliary_id` is blank.
    async fn get_or_create(&self, auxiliary_id: &str) -> IdentityResult<(UserRecord, bool)>;

    /// Returns the record keyed by `auxiliary_id`, if any.
    async fn find_by_auxiliary_id(&self, auxiliary_id: &str) -> IdentityResult<Option<UserRecord>>;

    /// Applies a partial update and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotFound`] if no record has `user_id`.
    async fn update(&self, user_id: UserId, update: UserUpdate) -> IdentityResult<UserRecord>;
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, UserRecord>,
    by_auxiliary_id: HashMap<String, UserId>,
    next_id: i64,
}

/// In-memory implementation of [`IdentityStore`] for testing.
///
/// Records live in a hash map guarded by a [`parking_lot::RwLock`]; nothing
/// survives a restart.
///
/// # Examples
///
/// ```
/// use forge_common_identity::{IdentityStore, MemoryIdentityStore, UserUpdate};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryIdentityStore::new();
///
///     let (user, created) = store.get_or_create("a1b2c3d4e5:user-1").await?;
///     assert!(created);
///
///     let user = store
///         .update(user.id, UserUpdate::builder().email("jane@example.com").build())
///         .await?;
///     assert_eq!(user.email.as_deref(), Some("jane@example.com"));
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryIdentityStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully-formed record, replacing any record with the same
    /// auxiliary ID. Intended for seeding test fixtures.
    pub fn insert(&self, auxiliary_id: &str, org_data: OrgData) -> UserRecord {
        let mut inner = self.inner.write();
        let id = match inner.by_auxiliary_id.get(auxiliary_id) {
            Some(id) => *id,
            None => {
                inner.next_id += 1;
                UserId::from(inner.next_id)
            },
        };
        let now = Utc::now();
        let record = UserRecord {
            id,
            auxiliary_id: auxiliary_id.to_owned(),
            email: None,
            first_name: None,
            last_name: None,
            org_data,
            created_at: now,
            updated_at: now,
        };
        inner.by_auxiliary_id.insert(auxiliary_id.to_owned(), id);
        inner.users.insert(id, record.clone());
        record
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().users.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().users.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    #[tracing::instrument(skip(self))]
    async fn get_or_create(&self, auxiliary_id: &str) -> IdentityResult<(UserRecord, bool)> {
        if auxiliary_id.trim().is_empty() {
            return Err(IdentityError::invalid_input(
                "auxiliary ID cannot be empty or whitespace-only",
            ));
        }

        let mut inner = self.inner.write();
        if let Some(id) = inner.by_auxiliary_id.get(auxiliary_id).copied() {
            let record = inner
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| IdentityError::internal("auxiliary index points at missing user"))?;
            return Ok((record, false));
        }

        inner.next_id += 1;
        let id = UserId::from(inner.next_id);
        let now = Utc::now();
        let record = UserRecord {
            id,
            auxiliary_id: auxiliary_id.to_owned(),
            email: None,
            first_name: None,
            last_name: None,
            org_data: OrgData::new(),
            created_at: now,
            updated_at: now,
        };
        inner.by_auxiliary_id.insert(auxiliary_id.to_owned(), id);
        inner.users.insert(id, record.clone());
        tracing::debug!(user_id = %id, "created user record");
        Ok((record, true))
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_auxiliary_id(&self, auxiliary_id: &str) -> IdentityResult<Option<UserRecord>> {
        let inner = self.inner.read();
        Ok(inner.by_auxiliary_id.get(auxiliary_id).and_then(|id| inner.users.get(id)).cloned())
    }

    #[tracing::instrument(skip(self, update))]
    async fn update(&self, user_id: UserId, update: UserUpdate) -> IdentityResult<UserRecord> {
        let mut inner = self.inner.write();
        let record =
            inner.users.get_mut(&user_id).ok_or_else(|| IdentityError::not_found(user_id.to_string()))?;

        let UserUpdate { email, first_name, last_name, org_data } = update;
        if let Some(email) = email {
            record.email = Some(email);
        }
        if let Some(first_name) = first_name {
            record.first_name = Some(first_name);
        }
        if let Some(last_name) = last_name {
            record.last_name = Some(last_name);
        }
        if let Some(org_data) = org_data {
            record.org_data = org_data;
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }
}
