//! Entity graph differ.
//!
//! Compares the graph as it was last persisted with the graph about to be
//! persisted and produces a [`PersistOperation`]. Both graphs are only read.
//!
//! Two instances are the same row when they carry the same target and the
//! same primary value. An instance whose database-generated primary column
//! already holds a value counts as persisted even if the old graph does not
//! contain it.

use std::collections::HashSet;

use strata_core::{JunctionMetadata, MetadataStore, RelationKind, RelationMetadata};
use tracing::debug;

use crate::cascade::{CascadeAuthorizer, CascadeMode, OperationKind};
use crate::entity::EntityRef;
use crate::error::Result;
use crate::operation::{JunctionOperation, PersistOperation, RemoveOperation, UpdateOperation};

/// The relation an entity was reached through: declaring target and relation.
type Via<'r> = Option<(&'r str, &'r RelationMetadata)>;

/// Builds change-sets from two states of an entity graph.
#[derive(Debug, Clone, Copy)]
pub struct SubjectDiffer<'a> {
    store: &'a MetadataStore,
    authorizer: CascadeAuthorizer,
}

impl<'a> SubjectDiffer<'a> {
    /// Creates a differ using `mode` for refused cascades.
    #[must_use]
    pub const fn new(store: &'a MetadataStore, mode: CascadeMode) -> Self {
        Self {
            store,
            authorizer: CascadeAuthorizer::new(mode),
        }
    }

    /// Computes the change-set turning `old` into `new`.
    ///
    /// Without an old graph only inserts and junction inserts are produced.
    pub fn difference(&self, old: Option<&EntityRef>, new: &EntityRef) -> Result<PersistOperation> {
        self.store.get(&new.target())?;
        let old_flat = old.map(EntityRef::flatten).unwrap_or_default();
        let new_flat = new.flatten();
        let mut op = PersistOperation::default();

        self.discover_inserts(new, None, &old_flat, &mut HashSet::new(), &mut op)?;
        if let Some(old) = old {
            if old.same_row(new) {
                self.discover_updates(old, new, None, &mut HashSet::new(), &mut op)?;
            }
            self.discover_removes(old, 0, &new_flat, &mut HashSet::new(), &mut op)?;
        }
        discover_junctions(new, &old_flat, &mut HashSet::new(), &mut op);

        debug!(
            target_entity = %new.target(),
            inserts = op.inserts.len(),
            updates = op.updates.len(),
            removes = op.removes.len(),
            junction_inserts = op.junction_inserts.len(),
            junction_removes = op.junction_removes.len(),
            "Change-set built"
        );
        Ok(op)
    }

    fn permits(&self, kind: OperationKind, via: Via<'_>) -> Result<bool> {
        match via {
            Some((entity, relation)) => self.authorizer.authorize(kind, entity, relation),
            None => Ok(true),
        }
    }

    fn discover_inserts(
        &self,
        entity: &EntityRef,
        via: Via<'_>,
        old_flat: &[EntityRef],
        visited: &mut HashSet<usize>,
        op: &mut PersistOperation,
    ) -> Result<()> {
        if visited.contains(&entity.node()) {
            return Ok(());
        }
        let new = is_new(old_flat, entity);
        // A refused edge drops the whole subtree behind it.
        if new && !self.permits(OperationKind::Insert, via)? {
            return Ok(());
        }
        visited.insert(entity.node());
        if new {
            op.inserts.push(entity.clone());
        }

        let metadata = entity.metadata();
        for (index, relation) in metadata.relations.iter().enumerate() {
            for child in entity.related_at(index) {
                self.discover_inserts(
                    &child,
                    Some((metadata.target.as_str(), relation)),
                    old_flat,
                    visited,
                    op,
                )?;
            }
        }
        Ok(())
    }

    fn discover_updates(
        &self,
        old: &EntityRef,
        new: &EntityRef,
        via: Via<'_>,
        visited: &mut HashSet<usize>,
        op: &mut PersistOperation,
    ) -> Result<()> {
        if !visited.insert(new.node()) {
            return Ok(());
        }
        let metadata = new.metadata();

        let columns: Vec<String> = metadata
            .persisted_columns()
            .filter(|(index, column)| !column.primary && old.value_at(*index) != new.value_at(*index))
            .map(|(_, column)| column.property.clone())
            .collect();
        let relations: Vec<String> = metadata
            .join_relations()
            .filter(|(index, _)| {
                !same_reference(
                    old.related_at(*index).first(),
                    new.related_at(*index).first(),
                )
            })
            .map(|(_, relation)| relation.property.clone())
            .collect();

        if !columns.is_empty() || !relations.is_empty() {
            // A refused edge drops the whole subtree behind it, as for inserts.
            if !self.permits(OperationKind::Update, via)? {
                return Ok(());
            }
            op.updates.push(UpdateOperation {
                entity: new.clone(),
                columns,
                relations,
            });
        }

        for (index, relation) in metadata.relations.iter().enumerate() {
            let old_children = old.related_at(index);
            for child in new.related_at(index) {
                if let Some(old_child) = old_children.iter().find(|o| o.same_row(&child)) {
                    self.discover_updates(
                        old_child,
                        &child,
                        Some((metadata.target.as_str(), relation)),
                        visited,
                        op,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn discover_removes(
        &self,
        entity: &EntityRef,
        depth: usize,
        new_flat: &[EntityRef],
        visited: &mut HashSet<usize>,
        op: &mut PersistOperation,
    ) -> Result<()> {
        if !visited.insert(entity.node()) {
            return Ok(());
        }
        let metadata = entity.metadata();
        for (index, relation) in metadata.relations.iter().enumerate() {
            for child in entity.related_at(index) {
                let dropped = child.id().is_some()
                    && !new_flat.iter().any(|n| n.same_row(&child))
                    && !op.removes.iter().any(|r| r.entity.ptr_eq(&child));
                if dropped && self.permits_remove(&metadata.target, relation)? {
                    op.removes.push(RemoveOperation {
                        entity: child.clone(),
                        parent_target: metadata.target.clone(),
                        parent_id: entity.id(),
                        relation: relation.property.clone(),
                        depth: depth + 1,
                    });
                }
                // Each node is judged on its own relation, whatever its parent's outcome.
                self.discover_removes(&child, depth + 1, new_flat, visited, op)?;
            }
        }
        Ok(())
    }

    /// Children held through one-to-many and one-to-one relations go through
    /// the authorizer. Entities left behind by a many-to-many or many-to-one
    /// relation are only unlinked unless the relation grants removal.
    fn permits_remove(&self, entity: &str, relation: &RelationMetadata) -> Result<bool> {
        match relation.kind {
            RelationKind::OneToMany | RelationKind::OneToOne => {
                self.authorizer
                    .authorize(OperationKind::Remove, entity, relation)
            }
            RelationKind::ManyToMany | RelationKind::ManyToOne => Ok(relation.cascade.remove),
        }
    }
}

fn is_new(old_flat: &[EntityRef], entity: &EntityRef) -> bool {
    if old_flat.iter().any(|o| o.same_row(entity)) {
        return false;
    }
    let generated = entity
        .metadata()
        .primary_column()
        .is_some_and(|c| c.generated);
    !(generated && entity.id().is_some())
}

fn same_reference(old: Option<&EntityRef>, new: Option<&EntityRef>) -> bool {
    match (old, new) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_row(b),
        _ => false,
    }
}

fn will_exist(entity: &EntityRef, old_flat: &[EntityRef], op: &PersistOperation) -> bool {
    op.is_inserted(entity) || !is_new(old_flat, entity)
}

fn discover_junctions(
    entity: &EntityRef,
    old_flat: &[EntityRef],
    visited: &mut HashSet<usize>,
    op: &mut PersistOperation,
) {
    if !visited.insert(entity.node()) {
        return;
    }
    let metadata = entity.metadata();
    let counterpart = old_flat.iter().find(|o| o.same_row(entity)).cloned();

    for (index, relation) in metadata.relations.iter().enumerate() {
        let members = entity.related_at(index);
        if let (RelationKind::ManyToMany, Some(junction)) = (relation.kind, &relation.junction) {
            let old_members = counterpart
                .as_ref()
                .map(|o| o.related_at(index))
                .unwrap_or_default();

            if will_exist(entity, old_flat, op) {
                for member in &members {
                    let linked = old_members.iter().any(|o| o.same_row(member));
                    if !linked && will_exist(member, old_flat, op) {
                        let link = oriented(relation, junction, entity, member);
                        push_unique(&mut op.junction_inserts, link);
                    }
                }
            }
            if let Some(old) = &counterpart {
                for old_member in &old_members {
                    if !members.iter().any(|m| m.same_row(old_member)) {
                        let link = oriented(relation, junction, old, old_member);
                        push_unique(&mut op.junction_removes, link);
                    }
                }
            }
        }
        for member in &members {
            discover_junctions(member, old_flat, visited, op);
        }
    }
}

fn oriented(
    relation: &RelationMetadata,
    junction: &JunctionMetadata,
    entity: &EntityRef,
    member: &EntityRef,
) -> JunctionOperation {
    if relation.owning {
        JunctionOperation {
            junction: junction.clone(),
            owner: entity.clone(),
            related: member.clone(),
        }
    } else {
        JunctionOperation {
            junction: junction.swapped(),
            owner: member.clone(),
            related: entity.clone(),
        }
    }
}

fn push_unique(links: &mut Vec<JunctionOperation>, link: JunctionOperation) {
    let duplicate = links.iter().any(|l| {
        l.junction.table == link.junction.table
            && l.owner.same_row(&link.owner)
            && l.related.same_row(&link.related)
    });
    if !duplicate {
        links.push(link);
    }
}
