//! Error types for schema synchronization.

use strata_core::CoreError;

/// Errors that can occur while planning or applying schema changes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Error from the metadata store or the query runner.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error outside a query runner (pool setup, introspection).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The active engine has no type for a declared column.
    #[error("Data type {sql_type} is not supported by {dialect}")]
    UnsupportedDataType {
        /// Dialect name.
        dialect: &'static str,
        /// The offending type.
        sql_type: String,
    },

    /// A change was handed to a dialect that cannot apply it in place.
    #[error("{dialect} cannot apply {change} on '{table}' in place; table recreation required")]
    RequiresRecreation {
        /// Dialect name.
        dialect: &'static str,
        /// Table name.
        table: String,
        /// Short description of the change.
        change: String,
    },

    /// Invalid synchronization state.
    #[error("Invalid schema state: {0}")]
    InvalidState(String),
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
