//! Relation resolver.
//!
//! Runs over a fresh change-set before execution. Inserts are reordered so
//! that a row is written after the rows its foreign keys point at. Foreign
//! keys that cannot be known at insert time become [`RelationUpdate`]s:
//!
//! - edges closing a reference cycle between new entities
//! - children placed in a parent's one-to-many (or inverse one-to-one)
//!   relation when either side is new and the child does not already point
//!   at that parent

use strata_core::RelationKind;
use tracing::debug;

use crate::entity::EntityRef;
use crate::operation::{PersistOperation, RelationUpdate};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    InProgress,
    Done,
}

/// One dependency of an insert: the insert it must follow, and the owning
/// relation that creates the dependency (`None` for inverse fixups).
type Dependency = (usize, Option<String>);

/// Orders inserts and derives foreign-key fixups.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationResolver;

impl RelationResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Completes `op`, built from the graph rooted at `root`.
    pub fn resolve(&self, root: &EntityRef, op: &mut PersistOperation) {
        inverse_fixups(root, op);
        order_inserts(op);
        debug!(
            inserts = op.inserts.len(),
            fixups = op.updates_by_relation.len(),
            "Relations resolved"
        );
    }
}

fn will_exist(entity: &EntityRef, op: &PersistOperation) -> bool {
    op.is_inserted(entity) || entity.id().is_some()
}

fn push_fixup(op: &mut PersistOperation, fixup: RelationUpdate) {
    let duplicate = op
        .updates_by_relation
        .iter()
        .any(|u| u.entity.ptr_eq(&fixup.entity) && u.relation == fixup.relation);
    if !duplicate {
        op.updates_by_relation.push(fixup);
    }
}

fn inverse_fixups(root: &EntityRef, op: &mut PersistOperation) {
    for parent in root.flatten() {
        let metadata = parent.metadata();
        for (index, relation) in metadata.relations.iter().enumerate() {
            let inverse_side = !relation.owning
                && matches!(relation.kind, RelationKind::OneToMany | RelationKind::OneToOne);
            let Some(inverse) = relation.inverse.as_deref().filter(|_| inverse_side) else {
                continue;
            };
            for child in parent.related_at(index) {
                let either_new = op.is_inserted(&parent) || op.is_inserted(&child);
                if !either_new || !will_exist(&parent, op) || !will_exist(&child, op) {
                    continue;
                }
                let child_metadata = child.metadata();
                let Some(child_index) = child_metadata.relation_index(inverse) else {
                    continue;
                };
                if !child_metadata.relations[child_index].has_join_column() {
                    continue;
                }
                let current = child.related_at(child_index);
                if current.first().is_some_and(|p| p.same_row(&parent)) {
                    continue;
                }
                push_fixup(
                    op,
                    RelationUpdate {
                        entity: child,
                        relation: inverse.to_string(),
                        target: parent.clone(),
                    },
                );
            }
        }
    }
}

fn dependencies(op: &PersistOperation) -> Vec<Vec<Dependency>> {
    let position = |entity: &EntityRef| op.inserts.iter().position(|e| e.ptr_eq(entity));
    op.inserts
        .iter()
        .map(|entity| {
            let metadata = entity.metadata();
            let mut deps: Vec<Dependency> = metadata
                .join_relations()
                .filter_map(|(index, relation)| {
                    let target = entity.related_at(index).into_iter().next()?;
                    Some((position(&target)?, Some(relation.property.clone())))
                })
                .collect();
            deps.extend(
                op.updates_by_relation
                    .iter()
                    .filter(|u| u.entity.ptr_eq(entity))
                    .filter_map(|u| Some((position(&u.target)?, None))),
            );
            deps
        })
        .collect()
}

fn visit(
    index: usize,
    deps: &[Vec<Dependency>],
    state: &mut [Visit],
    order: &mut Vec<usize>,
    cycles: &mut Vec<(usize, String, usize)>,
) {
    state[index] = Visit::InProgress;
    for (dep, relation) in &deps[index] {
        match state[*dep] {
            Visit::Pending => visit(*dep, deps, state, order, cycles),
            Visit::InProgress => {
                if let Some(relation) = relation {
                    cycles.push((index, relation.clone(), *dep));
                }
            }
            Visit::Done => {}
        }
    }
    state[index] = Visit::Done;
    order.push(index);
}

fn order_inserts(op: &mut PersistOperation) {
    let deps = dependencies(op);
    let mut state = vec![Visit::Pending; op.inserts.len()];
    let mut order = Vec::with_capacity(op.inserts.len());
    let mut cycles = Vec::new();
    for index in 0..op.inserts.len() {
        if state[index] == Visit::Pending {
            visit(index, &deps, &mut state, &mut order, &mut cycles);
        }
    }

    for (from, relation, to) in cycles {
        push_fixup(
            op,
            RelationUpdate {
                entity: op.inserts[from].clone(),
                relation,
                target: op.inserts[to].clone(),
            },
        );
    }
    op.inserts = order.into_iter().map(|i| op.inserts[i].clone()).collect();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cascade::CascadeMode;
    use crate::differ::SubjectDiffer;
    use strata_core::{Cascade, ColumnMetadata, ColumnType, EntityMetadata, MetadataStore, RelationMetadata};

    fn store() -> MetadataStore {
        MetadataStore::builder()
            .entity(
                EntityMetadata::new("User", "user")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("name", ColumnType::String))
                    .relation(
                        RelationMetadata::one_to_many("posts", "Post", "author")
                            .cascade(Cascade::all()),
                    )
                    .relation(
                        RelationMetadata::many_to_one("pinned", "Post").cascade(Cascade::all()),
                    ),
            )
            .entity(
                EntityMetadata::new("Post", "post")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("title", ColumnType::String))
                    .relation(
                        RelationMetadata::many_to_one("author", "User")
                            .inverse("posts")
                            .cascade(Cascade::all()),
                    ),
            )
            .build()
            .unwrap()
    }

    fn make(store: &MetadataStore, target: &str) -> EntityRef {
        EntityRef::new(Arc::clone(store.get(target).unwrap()))
    }

    fn resolved(store: &MetadataStore, root: &EntityRef) -> PersistOperation {
        let mut op = SubjectDiffer::new(store, CascadeMode::Permissive)
            .difference(None, root)
            .unwrap();
        RelationResolver::new().resolve(root, &mut op);
        op
    }

    #[test]
    fn test_referenced_rows_are_inserted_first() {
        let store = store();
        let post = make(&store, "Post");
        let user = make(&store, "User");
        post.link("author", &user).unwrap();

        let op = resolved(&store, &post);
        assert!(op.inserts[0].ptr_eq(&user));
        assert!(op.inserts[1].ptr_eq(&post));
        assert!(op.updates_by_relation.is_empty());
    }

    #[test]
    fn test_inverse_children_get_fixups() {
        let store = store();
        let user = make(&store, "User");
        let post = make(&store, "Post");
        user.add("posts", &post).unwrap();

        let op = resolved(&store, &user);
        assert!(op.inserts[0].ptr_eq(&user));
        assert_eq!(op.updates_by_relation.len(), 1);
        let fixup = &op.updates_by_relation[0];
        assert!(fixup.entity.ptr_eq(&post));
        assert_eq!(fixup.relation, "author");
        assert!(fixup.target.ptr_eq(&user));
    }

    #[test]
    fn test_child_already_pointing_at_parent_needs_no_fixup() {
        let store = store();
        let user = make(&store, "User");
        let post = make(&store, "Post");
        user.add("posts", &post).unwrap();
        post.link("author", &user).unwrap();

        let op = resolved(&store, &user);
        assert!(op.updates_by_relation.is_empty());
        assert!(op.inserts[0].ptr_eq(&user));
    }

    #[test]
    fn test_cycle_is_broken_with_a_fixup() {
        let store = store();
        let user = make(&store, "User");
        let post = make(&store, "Post");
        user.link("pinned", &post).unwrap();
        post.link("author", &user).unwrap();

        let op = resolved(&store, &user);
        assert_eq!(op.inserts.len(), 2);
        assert_eq!(op.updates_by_relation.len(), 1);
        let fixup = &op.updates_by_relation[0];
        // The entity inserted first gets its key written afterwards.
        assert!(fixup.entity.ptr_eq(&op.inserts[0]));
        assert!(fixup.target.ptr_eq(&op.inserts[1]));
    }

    #[test]
    fn test_existing_parent_with_new_child() {
        let store = store();
        let user = make(&store, "User");
        user.set("id", 3_i64).unwrap();
        let post = make(&store, "Post");
        user.add("posts", &post).unwrap();

        let op = resolved(&store, &user);
        assert_eq!(op.inserts.len(), 1);
        assert_eq!(op.updates_by_relation.len(), 1);
        assert!(op.updates_by_relation[0].target.ptr_eq(&user));
    }
}
