//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a storage backend.
///
/// The engine distinguishes exactly two failure classes at this
/// boundary: the store rejected a write, or the store could not be
/// reached. Everything else is the engine's own business.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected a write (duplicate key, null in a required
    /// column, broken reference).
    #[error("constraint violation: {message}")]
    Constraint {
        /// Description of the violated constraint.
        message: String,
    },

    /// The store could not be reached or failed mid-operation.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an unavailability error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}
