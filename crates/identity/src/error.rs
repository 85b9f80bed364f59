//! Identity store error types and result alias.
//!
//! Every [`IdentityStore`](crate::IdentityStore) implementation maps its
//! internal failures onto [`IdentityError`], so callers in the
//! authentication core can classify failures without knowing which backend
//! is in use.
//!
//! # Example
//!
//! ```
//! use forge_common_identity::{IdentityError, IdentityResult, UserId};
//!
//! fn lookup(id: UserId) -> IdentityResult<()> {
//!     Err(IdentityError::not_found(id.to_string()))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for identity store operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur during identity store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute so that
/// structured logs can display the full cause.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The requested user record does not exist.
    #[error("User not found: {id}")]
    NotFound {
        /// Identifier that was looked up.
        id: String,
    },

    /// The caller supplied an unusable value (blank auxiliary ID and the like).
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the rejected input.
        message: String,
    },

    /// A concurrent writer modified the record first.
    #[error("Identity record conflict")]
    Conflict,

    /// Backend-specific failure that fits no other category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl IdentityError {
    /// Creates a new `NotFound` error for the given identifier.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(IdentityError::not_found("42").to_string(), "User not found: 42");
        assert_eq!(
            IdentityError::invalid_input("auxiliary ID is blank").to_string(),
            "Invalid input: auxiliary ID is blank"
        );
        assert_eq!(IdentityError::conflict().to_string(), "Identity record conflict");
        assert_eq!(IdentityError::internal("disk full").to_string(), "Internal error: disk full");
    }

    #[test]
    fn test_internal_preserves_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = IdentityError::internal_with_source("write failed", inner);

        let source = err.source().expect("source must be preserved");
        assert_eq!(source.to_string(), "pipe closed");
    }

    #[test]
    fn test_internal_without_source() {
        let err = IdentityError::internal("boom");
        assert!(err.source().is_none());
    }
}
