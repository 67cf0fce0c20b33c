//! Entry point for persisting entity graphs.
//!
//! The [`EntityManager`] ties the pieces together: it diffs the graph against
//! the last persisted snapshot, resolves relation ordering, and runs the
//! change-set on a connection reserved for the call.

use std::sync::{Arc, Mutex, PoisonError};

use sqlx::SqlitePool;
use strata_core::{MetadataStore, QueryRunner, Value};
use tracing::debug;

use crate::cascade::CascadeMode;
use crate::differ::SubjectDiffer;
use crate::entity::EntityRef;
use crate::error::Result;
use crate::executor::PersistExecutor;
use crate::resolver::RelationResolver;

/// Options for [`EntityManager`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistOptions {
    /// How refused cascades are handled.
    pub cascade_mode: CascadeMode,
}

/// A persisted root remembered for the next diff.
#[derive(Debug)]
struct Snapshot {
    target: String,
    id: Value,
    graph: EntityRef,
}

/// Persists entity graphs against a SQLite pool.
///
/// # Example
///
/// ```ignore
/// let manager = EntityManager::new(pool, Arc::new(store), PersistOptions::default());
///
/// let post = manager.create("Post")?;
/// post.set("title", "hello")?;
/// manager.persist(&post).await?;
/// assert!(post.id().is_some());
///
/// post.set("title", "hello again")?;
/// manager.persist(&post).await?; // one UPDATE
/// ```
#[derive(Debug)]
pub struct EntityManager {
    pool: SqlitePool,
    store: Arc<MetadataStore>,
    options: PersistOptions,
    snapshots: Mutex<Vec<Snapshot>>,
}

impl EntityManager {
    /// Creates a manager.
    #[must_use]
    pub const fn new(pool: SqlitePool, store: Arc<MetadataStore>, options: PersistOptions) -> Self {
        Self {
            pool,
            store,
            options,
            snapshots: Mutex::new(Vec::new()),
        }
    }

    /// Returns the pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the metadata store.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Creates an empty instance of a registered entity.
    pub fn create(&self, target: &str) -> Result<EntityRef> {
        Ok(EntityRef::new(Arc::clone(self.store.get(target)?)))
    }

    /// Persists `entity` and everything reachable from it.
    ///
    /// The graph is diffed against the snapshot taken when the same row was
    /// last persisted through this manager, or treated as new otherwise.
    pub async fn persist(&self, entity: &EntityRef) -> Result<EntityRef> {
        let old = entity
            .id()
            .and_then(|id| self.snapshot(&entity.target(), &id));
        self.persist_with(old.as_ref(), entity).await
    }

    /// Persists `new` using `old` as the previously persisted graph.
    pub async fn persist_with(&self, old: Option<&EntityRef>, new: &EntityRef) -> Result<EntityRef> {
        let mut op = SubjectDiffer::new(&self.store, self.options.cascade_mode).difference(old, new)?;
        if op.is_empty() {
            debug!(target_entity = %new.target(), "Nothing to persist");
            self.remember(new);
            return Ok(new.clone());
        }
        RelationResolver::new().resolve(new, &mut op);

        let mut runner = QueryRunner::connect(&self.pool).await?;
        let executed = PersistExecutor::new(&self.store)
            .execute(&mut runner, &op)
            .await;
        let released = runner.release().await;
        executed?;
        released?;

        self.remember(new);
        Ok(new.clone())
    }

    /// A copy of the graph last persisted for the given row.
    #[must_use]
    pub fn snapshot(&self, target: &str, id: &Value) -> Option<EntityRef> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.target == target && &s.id == id)
            .map(|s| s.graph.clone())
    }

    /// Forgets every snapshot; the next persist of any root diffs against nothing.
    pub fn clear_snapshots(&self) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn remember(&self, entity: &EntityRef) {
        let Some(id) = entity.id() else { return };
        let target = entity.target();
        let graph = entity.deep_clone();
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        match snapshots.iter_mut().find(|s| s.target == target && s.id == id) {
            Some(existing) => existing.graph = graph,
            None => snapshots.push(Snapshot { target, id, graph }),
        }
    }
}
