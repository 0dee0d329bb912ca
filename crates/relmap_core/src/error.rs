//! Error types for the engine.

use relmap_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
///
/// Protocol misuse (`Transaction*`, `InvalidTransactionState`) and
/// registry misses are programmer errors and are never retried.
/// `ConstraintViolation` is reported after the automatic rollback has
/// completed, so the store is back in its prior committed state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity type was never registered.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// The name that missed the registry.
        name: String,
    },

    /// An entity type was registered twice.
    #[error("duplicate entity type: {name}")]
    DuplicateEntityType {
        /// The name registered twice.
        name: String,
    },

    /// The field path does not exist on the entity type.
    #[error("unknown field {field} on entity type {entity}")]
    UnknownField {
        /// Entity type name.
        entity: String,
        /// Field path that missed.
        field: String,
    },

    /// The relationship does not exist on the entity type.
    #[error("unknown relationship {name} on entity type {entity}")]
    UnknownRelationship {
        /// Entity type name.
        entity: String,
        /// Relationship name that missed.
        name: String,
    },

    /// An operation requiring an active unit of work was called outside one.
    #[error("no active transaction")]
    TransactionNotActive,

    /// `begin` was called while a unit of work was already active.
    #[error("transaction already active")]
    TransactionAlreadyActive,

    /// `commit` was called in a state that cannot commit.
    #[error("invalid transaction state: {state}")]
    InvalidTransactionState {
        /// The state the unit of work was in.
        state: &'static str,
    },

    /// A query placeholder had no bound value.
    #[error("unbound query parameter: {name}")]
    UnboundParameter {
        /// The placeholder name.
        name: String,
    },

    /// A query template could not be parsed.
    #[error("query parse error: {message}")]
    QueryParse {
        /// Description of the problem.
        message: String,
    },

    /// The store rejected a write; the flush was rolled back.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Store-reported description.
        message: String,
    },

    /// The store could not be reached.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Store-reported description.
        message: String,
    },

    /// An entity with caller-assigned identity reached the flush
    /// without a key, or a referenced entity has no key yet.
    #[error("entity of type {entity} has no key")]
    KeyMissing {
        /// Entity type name.
        entity: String,
    },

    /// A value did not match the field's declared kind.
    #[error("type mismatch on {entity}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Entity type name.
        entity: String,
        /// Field path.
        field: String,
        /// Declared field kind.
        expected: &'static str,
        /// Kind of the offending value.
        actual: &'static str,
    },

    /// An entity handle did not resolve in this session's arena.
    #[error("entity handle does not belong to this session")]
    InvalidHandle,

    /// The store returned a row the registry cannot map.
    #[error("malformed row: {message}")]
    MalformedRow {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an unknown-entity-type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown-field error.
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Creates an unknown-relationship error.
    pub fn unknown_relationship(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownRelationship {
            entity: entity.into(),
            name: name.into(),
        }
    }

    /// Creates an unbound-parameter error.
    pub fn unbound_parameter(name: impl Into<String>) -> Self {
        Self::UnboundParameter { name: name.into() }
    }

    /// Creates a query parse error.
    pub fn query_parse(message: impl Into<String>) -> Self {
        Self::QueryParse {
            message: message.into(),
        }
    }

    /// Creates a key-missing error.
    pub fn key_missing(entity: impl Into<String>) -> Self {
        Self::KeyMissing {
            entity: entity.into(),
        }
    }

    /// Creates a malformed-row error.
    pub fn malformed_row(message: impl Into<String>) -> Self {
        Self::MalformedRow {
            message: message.into(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint { message } => Self::ConstraintViolation { message },
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let constraint: CoreError = StoreError::constraint("duplicate").into();
        assert!(matches!(constraint, CoreError::ConstraintViolation { .. }));

        let down: CoreError = StoreError::unavailable("gone").into();
        assert!(matches!(down, CoreError::StoreUnavailable { .. }));
    }
}
