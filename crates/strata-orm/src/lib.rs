//! # strata-orm
//!
//! Persistence of whole entity graphs.
//!
//! This crate provides:
//! - [`EntityRef`] - shared, mutable graph nodes with typed relation handles
//! - [`SubjectDiffer`] - builds a [`PersistOperation`] from the previously
//!   persisted graph and the current one
//! - [`CascadeAuthorizer`] - per-relation insert/update/remove permissions,
//!   skipped or enforced depending on [`CascadeMode`]
//! - [`RelationResolver`] - insert ordering and foreign-key fixups
//! - [`PersistExecutor`] - runs a change-set in one transaction, including
//!   closure-table rows for tree entities
//! - [`EntityManager`] - the usual entry point
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata_core::{Cascade, ColumnMetadata, ColumnType, EntityMetadata, MetadataStore, RelationMetadata};
//! use strata_orm::{EntityManager, PersistOptions};
//!
//! let store = MetadataStore::builder()
//!     .entity(
//!         EntityMetadata::new("User", "user")
//!             .column(ColumnMetadata::generated_id("id"))
//!             .column(ColumnMetadata::new("name", ColumnType::String))
//!             .relation(RelationMetadata::one_to_many("posts", "Post", "author").cascade(Cascade::all())),
//!     )
//!     .entity(
//!         EntityMetadata::new("Post", "post")
//!             .column(ColumnMetadata::generated_id("id"))
//!             .column(ColumnMetadata::new("title", ColumnType::String))
//!             .relation(RelationMetadata::many_to_one("author", "User").inverse("posts")),
//!     )
//!     .build()?;
//!
//! let manager = EntityManager::new(pool, Arc::new(store), PersistOptions::default());
//! let user = manager.create("User")?;
//! user.set("name", "alice")?;
//! let post = manager.create("Post")?;
//! post.set("title", "hello")?;
//! user.add("posts", &post)?;
//!
//! // Two INSERTs, then the post's author_id is pointed at the new user.
//! manager.persist(&user).await?;
//!
//! // Dropping the post from the array deletes it on the next persist.
//! user.remove(&user.relation("posts")?, &post)?;
//! manager.persist(&user).await?;
//! ```
//!
//! ## Cascades
//!
//! A relation grants each of insert, update and remove separately. With
//! [`CascadeMode::Permissive`] (the default) a refused operation is skipped;
//! with [`CascadeMode::Strict`] it fails the whole persist with
//! [`OrmError::CascadeNotAllowed`] before anything is written.

pub mod cascade;
pub mod differ;
pub mod entity;
mod error;
pub mod executor;
mod manager;
pub mod operation;
pub mod resolver;

pub use cascade::{CascadeAuthorizer, CascadeMode, OperationKind};
pub use differ::SubjectDiffer;
pub use entity::{EntityRef, RelationHandle, RelationSlot};
pub use error::{OrmError, Result};
pub use executor::PersistExecutor;
pub use manager::{EntityManager, PersistOptions};
pub use operation::{
    JunctionOperation, PersistOperation, RelationUpdate, RemoveOperation, UpdateOperation,
};
pub use resolver::RelationResolver;

// Re-export commonly used types from strata-core
pub use strata_core::{MetadataStore, Value};
