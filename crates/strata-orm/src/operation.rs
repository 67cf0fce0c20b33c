//! The change-set produced by the differ and consumed by the executor.

use strata_core::{JunctionMetadata, Value};

use crate::entity::EntityRef;

/// An entity whose columns changed.
#[derive(Debug, Clone)]
pub struct UpdateOperation {
    /// The entity from the new graph.
    pub entity: EntityRef,
    /// Properties of the changed columns.
    pub columns: Vec<String>,
    /// Owning relations that now point at a different row.
    pub relations: Vec<String>,
}

/// An entity dropped from the graph.
#[derive(Debug, Clone)]
pub struct RemoveOperation {
    /// The entity from the old graph.
    pub entity: EntityRef,
    /// Target of the entity that held it.
    pub parent_target: String,
    /// Primary value of the entity that held it.
    pub parent_id: Option<Value>,
    /// Relation it was held by.
    pub relation: String,
    /// Nesting depth below the root.
    pub depth: usize,
}

/// A link-table row to add or delete, always in owning orientation.
#[derive(Debug, Clone)]
pub struct JunctionOperation {
    /// Link table and its columns.
    pub junction: JunctionMetadata,
    /// Entity on the owning side.
    pub owner: EntityRef,
    /// Entity on the inverse side.
    pub related: EntityRef,
}

/// A foreign key written after the row it points at has been inserted.
#[derive(Debug, Clone)]
pub struct RelationUpdate {
    /// Entity whose row holds the join column.
    pub entity: EntityRef,
    /// Owning relation property on `entity`.
    pub relation: String,
    /// Entity the join column must point at.
    pub target: EntityRef,
}

/// Ordered change-set reconciling an old graph with a new one.
#[derive(Debug, Clone, Default)]
pub struct PersistOperation {
    /// New entities, in insertion order once resolved.
    pub inserts: Vec<EntityRef>,
    /// Changed entities.
    pub updates: Vec<UpdateOperation>,
    /// Entities removed from the graph.
    pub removes: Vec<RemoveOperation>,
    /// Link rows to add.
    pub junction_inserts: Vec<JunctionOperation>,
    /// Link rows to delete.
    pub junction_removes: Vec<JunctionOperation>,
    /// Foreign-key fixups that run after the inserts.
    pub updates_by_relation: Vec<RelationUpdate>,
}

impl PersistOperation {
    /// Whether nothing needs to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.removes.is_empty()
            && self.junction_inserts.is_empty()
            && self.junction_removes.is_empty()
            && self.updates_by_relation.is_empty()
    }

    /// Whether `entity` is one of the inserts.
    #[must_use]
    pub fn is_inserted(&self, entity: &EntityRef) -> bool {
        self.inserts.iter().any(|e| e.ptr_eq(entity))
    }
}
