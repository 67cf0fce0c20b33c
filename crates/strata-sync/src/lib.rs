//! Schema synchronization for strata entities.
//!
//! `strata-sync` keeps a live database schema in step with the entity
//! metadata registered in a [`strata_core::MetadataStore`]. There are no
//! migration files: every run compares what the entities expect with what
//! the database holds and applies the difference.
//!
//! # Architecture
//!
//! - **Schema** - Dialect-neutral tables, columns, keys and indexes, built
//!   from entity metadata or read back from the database
//! - **Introspector** - Reads the live tables from the SQLite catalog
//! - **Diff** - Turns a live table and a desired table into [`SchemaChange`]s
//! - **Dialect** - Renders changes as SQL and reports what the engine can
//!   do in place
//! - **Recreation** - Rebuilds a table when a change cannot be applied in
//!   place, keeping its rows
//! - **Synchronizer** - Cleans up interrupted runs, plans and applies
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::{ColumnMetadata, ColumnType, EntityMetadata, MetadataStore};
//! use strata_sync::prelude::*;
//!
//! let metadata = MetadataStore::builder()
//!     .entity(
//!         EntityMetadata::new("User", "user")
//!             .column(ColumnMetadata::generated_id("id"))
//!             .column(ColumnMetadata::new("name", ColumnType::String).length(100)),
//!     )
//!     .build()?;
//!
//! let synchronizer = SchemaSynchronizer::new(pool, SqliteDialect::new(), Arc::new(metadata));
//! let plan = synchronizer.synchronize().await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the changes without applying them
//! strata-sync --schema entities.json plan
//!
//! # Apply them
//! strata-sync --schema entities.json sync
//!
//! # Only remove tables left over by an interrupted recreation
//! strata-sync cleanup
//! ```

pub mod dialect;
pub mod diff;
pub mod error;
pub mod introspect;
pub mod operations;
pub mod recreate;
pub mod schema;
pub mod synchronizer;

pub use dialect::{MigrationDialect, PostgresDialect, SqliteDialect};
pub use error::{Result, SyncError};
pub use introspect::SqliteIntrospector;
pub use operations::SchemaChange;
pub use recreate::TableRecreation;
pub use synchronizer::{
    DEFAULT_TEMP_TABLE_PREFIX, SchemaSynchronizer, SyncOptions, SyncPlan, TableAction, TablePlan,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dialect::{MigrationDialect, PostgresDialect, SqliteDialect};
    pub use crate::diff::{creation_order, diff_table};
    pub use crate::error::{Result, SyncError};
    pub use crate::introspect::SqliteIntrospector;
    pub use crate::operations::{SchemaChange, final_table};
    pub use crate::recreate::TableRecreation;
    pub use crate::schema::{
        ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema,
        PrimaryKeySchema, SqlType, TableSchema, UniqueKeySchema,
    };
    pub use crate::synchronizer::{
        SchemaSynchronizer, SyncOptions, SyncPlan, TableAction, TablePlan,
    };
}
