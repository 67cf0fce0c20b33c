//! Error types for the ORM.

use strata_core::CoreError;
use thiserror::Error;

use crate::cascade::OperationKind;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Error from the metadata store or the query runner.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A cascade was needed that the relation does not grant (strict mode).
    #[error("cascade {kind} is not allowed on relation '{entity}.{relation}'")]
    CascadeNotAllowed {
        /// The operation that would have propagated.
        kind: OperationKind,
        /// Target of the entity declaring the relation.
        entity: String,
        /// Relation property name.
        relation: String,
    },

    /// An entity needed a primary value that it does not have yet.
    #[error("entity '{0}' has no primary value")]
    NotPersisted(String),

    /// A single-valued accessor was used on an array relation, or the reverse.
    #[error("relation '{entity}.{relation}' has a different cardinality")]
    Cardinality {
        /// Entity target.
        entity: String,
        /// Relation property name.
        relation: String,
    },

    /// An entity of the wrong target was placed in a relation.
    #[error("relation '{relation}' expects '{expected}', got '{found}'")]
    WrongTarget {
        /// Relation property name.
        relation: String,
        /// Target the relation declares.
        expected: String,
        /// Target of the entity given.
        found: String,
    },
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
