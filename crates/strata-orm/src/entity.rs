//! In-memory entity graph.
//!
//! An [`EntityRef`] is a shared handle to one entity instance: its column
//! values, aligned with the declared columns, and one relation slot per
//! declared relation. Handles compare by reference, so the same instance
//! reached twice through a cyclic graph is recognized as one node.
//!
//! Relations are reached through a [`RelationHandle`] resolved once from the
//! metadata; traversal code walks slots by position and never looks a
//! relation up by name.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_core::{CoreError, EntityMetadata, RelationKind, Value};

use crate::error::{OrmError, Result};

/// Related entities held by one relation property.
#[derive(Clone, Default)]
pub enum RelationSlot {
    /// Many-to-one and one-to-one relations.
    #[default]
    Empty,
    /// A single related entity.
    One(EntityRef),
    /// One-to-many and many-to-many relations.
    Many(Vec<EntityRef>),
}

impl RelationSlot {
    fn for_kind(kind: RelationKind) -> Self {
        if kind.is_many() {
            Self::Many(Vec::new())
        } else {
            Self::Empty
        }
    }

    /// The related entities, in order.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityRef> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(entity) => vec![entity.clone()],
            Self::Many(entities) => entities.clone(),
        }
    }
}

/// State behind an [`EntityRef`].
pub struct EntityState {
    metadata: Arc<EntityMetadata>,
    values: Vec<Value>,
    relations: Vec<RelationSlot>,
}

/// Typed access to one relation of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHandle {
    index: usize,
    many: bool,
    target: String,
    property: String,
}

impl RelationHandle {
    /// Resolves the relation `property` of `metadata`.
    pub fn resolve(metadata: &EntityMetadata, property: &str) -> Result<Self> {
        let index = metadata
            .relation_index(property)
            .ok_or_else(|| CoreError::UnknownRelation {
                entity: metadata.target.clone(),
                relation: property.to_string(),
            })?;
        let relation = &metadata.relations[index];
        Ok(Self {
            index,
            many: relation.kind.is_many(),
            target: relation.target.clone(),
            property: relation.property.clone(),
        })
    }

    /// Position of the relation in the entity's declaration.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whether the relation holds an array.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        self.many
    }

    fn cardinality_error(&self, entity: &str) -> OrmError {
        OrmError::Cardinality {
            entity: entity.to_string(),
            relation: self.property.clone(),
        }
    }

    fn check_target(&self, related: &EntityRef) -> Result<()> {
        let found = related.target();
        if found == self.target {
            Ok(())
        } else {
            Err(OrmError::WrongTarget {
                relation: self.property.clone(),
                expected: self.target.clone(),
                found,
            })
        }
    }
}

/// Shared handle to an entity instance.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<EntityState>>);

impl EntityRef {
    /// Creates an empty instance: every column NULL, every relation empty.
    #[must_use]
    pub fn new(metadata: Arc<EntityMetadata>) -> Self {
        let values = vec![Value::Null; metadata.columns.len()];
        let relations = metadata
            .relations
            .iter()
            .map(|r| RelationSlot::for_kind(r.kind))
            .collect();
        Self(Arc::new(RwLock::new(EntityState {
            metadata,
            values,
            relations,
        })))
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of this instance, stable while any handle to it is alive.
    #[must_use]
    pub fn node(&self) -> usize {
        Arc::as_ptr(&self.0).addr()
    }

    /// Whether both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The entity's metadata.
    #[must_use]
    pub fn metadata(&self) -> Arc<EntityMetadata> {
        Arc::clone(&self.read().metadata)
    }

    /// Target of the entity's metadata.
    #[must_use]
    pub fn target(&self) -> String {
        self.read().metadata.target.clone()
    }

    /// Primary value, unless still NULL.
    #[must_use]
    pub fn id(&self) -> Option<Value> {
        let state = self.read();
        let index = state.metadata.primary_index()?;
        let value = &state.values[index];
        (!value.is_null()).then(|| value.clone())
    }

    /// Whether `other` is the same persisted row: same target and same
    /// primary value.
    #[must_use]
    pub fn same_row(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b && self.target() == other.target(),
            _ => false,
        }
    }

    /// Value of the column at `index`.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Value {
        self.read().values.get(index).cloned().unwrap_or(Value::Null)
    }

    pub(crate) fn set_value_at(&self, index: usize, value: Value) {
        if let Some(slot) = self.write().values.get_mut(index) {
            *slot = value;
        }
    }

    /// Value of the column declared for `property`.
    pub fn get(&self, property: &str) -> Result<Value> {
        let index = self.column_index(property)?;
        Ok(self.value_at(index))
    }

    /// Sets the column declared for `property`.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.column_index(property)?;
        self.set_value_at(index, value.into());
        Ok(())
    }

    fn column_index(&self, property: &str) -> Result<usize> {
        let state = self.read();
        state
            .metadata
            .column_index(property)
            .ok_or_else(|| {
                CoreError::UnknownColumn {
                    entity: state.metadata.target.clone(),
                    column: property.to_string(),
                }
                .into()
            })
    }

    /// Resolves a relation of this entity's kind.
    pub fn relation(&self, property: &str) -> Result<RelationHandle> {
        RelationHandle::resolve(&self.read().metadata, property)
    }

    /// Related entities in the slot at `index`.
    #[must_use]
    pub fn related_at(&self, index: usize) -> Vec<EntityRef> {
        self.read()
            .relations
            .get(index)
            .map(RelationSlot::entities)
            .unwrap_or_default()
    }

    /// The single related entity of a to-one relation.
    pub fn get_one(&self, handle: &RelationHandle) -> Result<Option<EntityRef>> {
        if handle.many {
            return Err(handle.cardinality_error(&self.target()));
        }
        Ok(self.related_at(handle.index).into_iter().next())
    }

    /// Points a to-one relation at `related`, or clears it.
    pub fn set_one(&self, handle: &RelationHandle, related: Option<&EntityRef>) -> Result<()> {
        if handle.many {
            return Err(handle.cardinality_error(&self.target()));
        }
        if let Some(related) = related {
            handle.check_target(related)?;
        }
        let slot = related.map_or(RelationSlot::Empty, |r| RelationSlot::One(r.clone()));
        self.replace_slot(handle.index, slot);
        Ok(())
    }

    /// Members of an array relation.
    pub fn get_many(&self, handle: &RelationHandle) -> Result<Vec<EntityRef>> {
        if !handle.many {
            return Err(handle.cardinality_error(&self.target()));
        }
        Ok(self.related_at(handle.index))
    }

    /// Replaces the members of an array relation.
    pub fn set_many(&self, handle: &RelationHandle, related: Vec<EntityRef>) -> Result<()> {
        if !handle.many {
            return Err(handle.cardinality_error(&self.target()));
        }
        for entity in &related {
            handle.check_target(entity)?;
        }
        self.replace_slot(handle.index, RelationSlot::Many(related));
        Ok(())
    }

    /// Appends a member to an array relation.
    pub fn push(&self, handle: &RelationHandle, related: &EntityRef) -> Result<()> {
        let mut members = self.get_many(handle)?;
        members.push(related.clone());
        self.set_many(handle, members)
    }

    /// Removes every member of an array relation that is the same row as `related`.
    pub fn remove(&self, handle: &RelationHandle, related: &EntityRef) -> Result<()> {
        let members = self
            .get_many(handle)?
            .into_iter()
            .filter(|m| !m.same_row(related))
            .collect();
        self.set_many(handle, members)
    }

    fn replace_slot(&self, index: usize, slot: RelationSlot) {
        if let Some(existing) = self.write().relations.get_mut(index) {
            *existing = slot;
        }
    }

    /// Sets a to-one relation by property name.
    pub fn link(&self, property: &str, related: &EntityRef) -> Result<()> {
        let handle = self.relation(property)?;
        self.set_one(&handle, Some(related))
    }

    /// Appends to an array relation by property name.
    pub fn add(&self, property: &str, related: &EntityRef) -> Result<()> {
        let handle = self.relation(property)?;
        self.push(&handle, related)
    }

    /// Every distinct instance reachable from this one, this one first.
    #[must_use]
    pub fn flatten(&self) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(entity) = stack.pop() {
            if !seen.insert(entity.node()) {
                continue;
            }
            let relation_count = entity.read().relations.len();
            for index in (0..relation_count).rev() {
                stack.extend(entity.related_at(index).into_iter().rev());
            }
            out.push(entity);
        }
        out
    }

    /// Copies the whole reachable graph, preserving sharing and cycles.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        let mut copies = HashMap::new();
        self.clone_into(&mut copies)
    }

    fn clone_into(&self, copies: &mut HashMap<usize, EntityRef>) -> Self {
        if let Some(copy) = copies.get(&self.node()) {
            return copy.clone();
        }
        let (metadata, values, slots) = {
            let state = self.read();
            (
                Arc::clone(&state.metadata),
                state.values.clone(),
                state.relations.clone(),
            )
        };
        let copy = Self(Arc::new(RwLock::new(EntityState {
            metadata,
            values,
            relations: Vec::new(),
        })));
        copies.insert(self.node(), copy.clone());

        let relations = slots
            .iter()
            .map(|slot| match slot {
                RelationSlot::Empty => RelationSlot::Empty,
                RelationSlot::One(e) => RelationSlot::One(e.clone_into(copies)),
                RelationSlot::Many(es) => {
                    RelationSlot::Many(es.iter().map(|e| e.clone_into(copies)).collect())
                }
            })
            .collect();
        copy.write().relations = relations;
        copy
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Relations are left out; graphs may be cyclic.
        f.debug_struct("EntityRef")
            .field("target", &self.target())
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RelationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::One(e) => f.debug_tuple("One").field(e).finish(),
            Self::Many(es) => f.debug_tuple("Many").field(&es.len()).finish(),
        }
    }
}
