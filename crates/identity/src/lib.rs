//! # Forge Common Identity
//!
//! Identity record types and the identity-store contract consumed by the
//! Forge authentication core.
//!
//! The authentication core derives organization memberships from verified
//! tokens and reconciles them with a durable [`UserRecord`]. It only talks to
//! storage through [`IdentityStore`], which keeps the core independent of the
//! database actually backing user records.
//!
//! # Quick Start
//!
//! ```
//! use forge_common_identity::{IdentityStore, MemoryIdentityStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryIdentityStore::new();
//!     let (user, created) = store.get_or_create("user-1").await?;
//!     assert!(created);
//!     assert!(user.org_data.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with record builders and assertion macros.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

pub use error::{BoxError, IdentityError, IdentityResult};
pub use store::{IdentityStore, MemoryIdentityStore};
pub use types::{ORG_TYPE_ENTERPRISE, OrgData, OrgEntry, UserId, UserRecord, UserUpdate};
