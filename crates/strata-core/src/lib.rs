//! # strata-core
//!
//! Shared building blocks for the strata object-relational mapper:
//!
//! - [`Value`] - column values and their sqlx bindings
//! - [`EntityMetadata`] and [`MetadataStore`] - the declared shape of every
//!   entity, its columns and its relation graph
//! - [`QueryRunner`] - a single-owner connection with explicit transaction
//!   control, used by both the persist executor and the schema synchronizer
//! - [`naming`] - default names for join columns, junction tables and
//!   constraints

mod error;
pub mod metadata;
pub mod naming;
pub mod runner;
pub mod value;

pub use error::{CoreError, Result};
pub use metadata::{
    Cascade, ColumnMetadata, ColumnType, DefaultValue, EntityKind, EntityMetadata, ForeignKeyAction,
    IndexMetadata, JunctionMetadata, MetadataStore, MetadataStoreBuilder, RelationKind,
    RelationMetadata, TreeMetadata, UniqueMetadata,
};
pub use runner::{ExecuteResult, QueryRunner};
pub use value::Value;
