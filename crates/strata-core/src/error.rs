//! Error types shared by every strata crate.

use thiserror::Error;

/// Errors raised by the metadata store and the query runner.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// `begin_transaction` was called while a transaction is open.
    #[error("transaction already started")]
    TransactionAlreadyStarted,

    /// `commit` or `rollback` was called without an open transaction.
    #[error("transaction not started")]
    TransactionNotStarted,

    /// The runner gave its connection back to the pool.
    #[error("query runner already released")]
    RunnerReleased,

    /// No metadata has been registered for the given target.
    #[error("no metadata registered for entity '{0}'")]
    MetadataNotRegistered(String),

    /// A non-junction entity does not have exactly one primary column.
    #[error("entity '{target}' must have exactly one primary column, found {found}")]
    PrimaryColumnCount {
        /// Entity target name.
        target: String,
        /// Number of primary columns declared.
        found: usize,
    },

    /// A relation name that the entity does not declare.
    #[error("entity '{entity}' has no relation '{relation}'")]
    UnknownRelation {
        /// Entity target name.
        entity: String,
        /// Relation property name.
        relation: String,
    },

    /// A column name that the entity does not declare.
    #[error("entity '{entity}' has no column '{column}'")]
    UnknownColumn {
        /// Entity target name.
        entity: String,
        /// Column property name.
        column: String,
    },

    /// Metadata that is internally inconsistent.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
