//! Change-set execution.
//!
//! A [`PersistOperation`] runs inside one transaction on one reserved
//! connection, in this order:
//!
//! 1. inserts, each followed by its closure-table rows for tree entities
//! 2. column and relation updates
//! 3. foreign-key fixups not already satisfied during the inserts
//! 4. junction removals, then junction inserts
//! 5. removes, deepest first
//!
//! Any failure rolls the whole transaction back.

use std::cmp::Reverse;
use std::sync::Arc;

use strata_core::{
    ColumnMetadata, CoreError, EntityMetadata, MetadataStore, QueryRunner, RelationMetadata,
    TreeMetadata, Value, naming,
};
use tracing::{debug, error, info};

use crate::entity::EntityRef;
use crate::error::{OrmError, Result};
use crate::operation::{JunctionOperation, PersistOperation, RelationUpdate, UpdateOperation};

/// Runs change-sets against the database.
#[derive(Debug, Clone, Copy)]
pub struct PersistExecutor<'a> {
    store: &'a MetadataStore,
}

impl<'a> PersistExecutor<'a> {
    /// Creates an executor for entities registered in `store`.
    #[must_use]
    pub const fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Executes `op` in a transaction on `runner`.
    ///
    /// Generated identifiers and tree levels are written back into the
    /// graph as rows are inserted. When the transaction rolls back, those
    /// values are restored, so the same graph can be persisted again.
    pub async fn execute(&self, runner: &mut QueryRunner, op: &PersistOperation) -> Result<()> {
        runner.begin_transaction().await?;
        let mut written = WriteBacks::default();
        match self.run(runner, op, &mut written).await {
            Ok(()) => {
                if let Err(err) = runner.commit().await {
                    written.restore();
                    return Err(err.into());
                }
                info!(
                    inserts = op.inserts.len(),
                    updates = op.updates.len(),
                    removes = op.removes.len(),
                    "Change-set committed"
                );
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Change-set failed, rolling back");
                if let Err(rollback) = runner.rollback().await {
                    error!(error = %rollback, "Rollback failed");
                }
                written.restore();
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        runner: &mut QueryRunner,
        op: &PersistOperation,
        written: &mut WriteBacks,
    ) -> Result<()> {
        let mut satisfied = vec![false; op.updates_by_relation.len()];
        for entity in &op.inserts {
            self.insert(runner, entity, op, &mut satisfied, written)
                .await?;
        }
        for update in &op.updates {
            update_row(runner, update).await?;
        }
        for (fixup, done) in op.updates_by_relation.iter().zip(&satisfied) {
            if !done {
                apply_fixup(runner, fixup).await?;
            }
        }
        for link in &op.junction_removes {
            delete_link(runner, link).await?;
        }
        for link in &op.junction_inserts {
            insert_link(runner, link).await?;
        }

        let mut removes: Vec<_> = op.removes.iter().collect();
        removes.sort_by_key(|r| Reverse(r.depth));
        for remove in removes {
            let entity = &remove.entity;
            let Some(id) = entity.id() else { continue };
            let metadata = entity.metadata();
            let pk = primary(&metadata)?;
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote(&metadata.table),
                quote(&pk.name)
            );
            runner.execute(&sql, &[id]).await?;
            debug!(entity = %metadata.target, relation = %remove.relation, "Removed");
        }
        Ok(())
    }

    async fn insert(
        &self,
        runner: &mut QueryRunner,
        entity: &EntityRef,
        op: &PersistOperation,
        satisfied: &mut [bool],
        written: &mut WriteBacks,
    ) -> Result<()> {
        let metadata = Arc::clone(self.store.get(&entity.target())?);
        let mut columns = Vec::new();
        let mut params = Vec::new();

        for (index, column) in metadata.persisted_columns() {
            let value = entity.value_at(index);
            // Leave NULLs to the database when it has a value of its own.
            if value.is_null() && (column.generated || !column.default.is_none()) {
                continue;
            }
            columns.push(column.name.as_str());
            params.push(value);
        }
        let mut parent_id = None;
        for (index, relation) in metadata.join_relations() {
            let Some(join_column) = relation.join_column.as_deref() else {
                continue;
            };
            let value = join_value(entity, index, relation, op, satisfied);
            let tree_parent = metadata
                .tree
                .as_ref()
                .is_some_and(|t| t.parent == relation.property);
            if tree_parent && !value.is_null() {
                parent_id = Some(value.clone());
            }
            columns.push(join_column);
            params.push(value);
        }

        let result = runner
            .execute(&insert_sql(&metadata.table, &columns), &params)
            .await?;

        let generated = metadata
            .primary_index()
            .filter(|&index| metadata.columns[index].generated && entity.value_at(index).is_null());
        if let Some(index) = generated {
            written.set(entity, index, Value::Int(result.last_insert_id));
        }
        debug!(entity = %metadata.target, id = ?entity.id(), "Inserted");

        if let Some(tree) = &metadata.tree {
            insert_closure(runner, entity, &metadata, tree, parent_id, written).await?;
        }
        Ok(())
    }
}

/// Values written into the graph during a transaction, with what they replaced.
#[derive(Default)]
struct WriteBacks(Vec<(EntityRef, usize, Value)>);

impl WriteBacks {
    fn set(&mut self, entity: &EntityRef, index: usize, value: Value) {
        self.0.push((entity.clone(), index, entity.value_at(index)));
        entity.set_value_at(index, value);
    }

    fn restore(self) {
        for (entity, index, previous) in self.0.into_iter().rev() {
            entity.set_value_at(index, previous);
        }
    }
}

/// Writes the closure rows of a freshly inserted tree node and refreshes
/// its cached level. `parent_id` is the parent key written with the row.
async fn insert_closure(
    runner: &mut QueryRunner,
    entity: &EntityRef,
    metadata: &EntityMetadata,
    tree: &TreeMetadata,
    parent_id: Option<Value>,
    written: &mut WriteBacks,
) -> Result<()> {
    let closure = tree
        .closure_table
        .clone()
        .unwrap_or_else(|| naming::closure_table(&metadata.table));
    let id = entity
        .id()
        .ok_or_else(|| OrmError::NotPersisted(metadata.target.clone()))?;

    match parent_id {
        Some(parent_id) => {
            runner
                .execute(
                    &closure_insert_sql(&closure),
                    &[id.clone(), parent_id, id.clone(), id.clone()],
                )
                .await?;
        }
        None => {
            runner
                .execute(&closure_root_sql(&closure), &[id.clone(), id.clone()])
                .await?;
        }
    }

    let Some(index) = tree
        .level_column
        .as_deref()
        .and_then(|property| metadata.column_index(property))
    else {
        return Ok(());
    };
    let rows = runner
        .query(&closure_level_sql(&closure), std::slice::from_ref(&id))
        .await?;
    let level = match rows.first() {
        Some(row) => Value::from_row(row, 0)?,
        None => Value::Null,
    };
    let pk = primary(metadata)?;
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {} = ?",
        quote(&metadata.table),
        quote(&metadata.columns[index].name),
        quote(&pk.name)
    );
    runner.execute(&sql, &[level.clone(), id]).await?;
    debug!(entity = %metadata.target, level = ?level, "Tree level cached");
    written.set(entity, index, level);
    Ok(())
}

async fn update_row(runner: &mut QueryRunner, update: &UpdateOperation) -> Result<()> {
    let entity = &update.entity;
    let metadata = entity.metadata();
    let mut assignments = Vec::new();
    let mut params = Vec::new();

    for property in &update.columns {
        let index = metadata
            .column_index(property)
            .ok_or_else(|| CoreError::UnknownColumn {
                entity: metadata.target.clone(),
                column: property.clone(),
            })?;
        assignments.push(format!("{} = ?", quote(&metadata.columns[index].name)));
        params.push(entity.value_at(index));
    }
    for property in &update.relations {
        let (index, join_column) = join_column_of(&metadata, property)?;
        let referenced = entity
            .related_at(index)
            .into_iter()
            .next()
            .and_then(|related| related.id())
            .unwrap_or(Value::Null);
        assignments.push(format!("{} = ?", quote(join_column)));
        params.push(referenced);
    }
    if assignments.is_empty() {
        return Ok(());
    }

    let id = entity
        .id()
        .ok_or_else(|| OrmError::NotPersisted(metadata.target.clone()))?;
    params.push(id);
    let pk = primary(&metadata)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote(&metadata.table),
        assignments.join(", "),
        quote(&pk.name)
    );
    runner.execute(&sql, &params).await?;
    debug!(entity = %metadata.target, "Updated");
    Ok(())
}

async fn apply_fixup(runner: &mut QueryRunner, fixup: &RelationUpdate) -> Result<()> {
    let metadata = fixup.entity.metadata();
    let (_, join_column) = join_column_of(&metadata, &fixup.relation)?;
    let target_id = fixup
        .target
        .id()
        .ok_or_else(|| OrmError::NotPersisted(fixup.target.target()))?;
    let id = fixup
        .entity
        .id()
        .ok_or_else(|| OrmError::NotPersisted(metadata.target.clone()))?;
    let pk = primary(&metadata)?;
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {} = ?",
        quote(&metadata.table),
        quote(join_column),
        quote(&pk.name)
    );
    runner.execute(&sql, &[target_id, id]).await?;
    debug!(entity = %metadata.target, relation = %fixup.relation, "Foreign key fixed up");
    Ok(())
}

async fn insert_link(runner: &mut QueryRunner, link: &JunctionOperation) -> Result<()> {
    let (owner, related) = junction_ids(link)?;
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
        quote(&link.junction.table),
        quote(&link.junction.owner_column),
        quote(&link.junction.inverse_column)
    );
    runner.execute(&sql, &[owner, related]).await?;
    Ok(())
}

async fn delete_link(runner: &mut QueryRunner, link: &JunctionOperation) -> Result<()> {
    let (owner, related) = junction_ids(link)?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} = ?",
        quote(&link.junction.table),
        quote(&link.junction.owner_column),
        quote(&link.junction.inverse_column)
    );
    runner.execute(&sql, &[owner, related]).await?;
    Ok(())
}

fn junction_ids(link: &JunctionOperation) -> Result<(Value, Value)> {
    let owner = link
        .owner
        .id()
        .ok_or_else(|| OrmError::NotPersisted(link.owner.target()))?;
    let related = link
        .related
        .id()
        .ok_or_else(|| OrmError::NotPersisted(link.related.target()))?;
    Ok((owner, related))
}

/// The value of an owning relation's join column at insert time.
///
/// A pending fixup whose target already has an identifier is folded into
/// the insert and marked satisfied.
fn join_value(
    entity: &EntityRef,
    index: usize,
    relation: &RelationMetadata,
    op: &PersistOperation,
    satisfied: &mut [bool],
) -> Value {
    let fixup = op
        .updates_by_relation
        .iter()
        .position(|u| u.entity.ptr_eq(entity) && u.relation == relation.property);
    if let Some(position) = fixup {
        return match op.updates_by_relation[position].target.id() {
            Some(id) => {
                satisfied[position] = true;
                id
            }
            None => Value::Null,
        };
    }
    entity
        .related_at(index)
        .into_iter()
        .next()
        .and_then(|related| related.id())
        .unwrap_or(Value::Null)
}

fn join_column_of<'m>(metadata: &'m EntityMetadata, property: &str) -> Result<(usize, &'m str)> {
    let unknown = || CoreError::UnknownRelation {
        entity: metadata.target.clone(),
        relation: property.to_string(),
    };
    let index = metadata.relation_index(property).ok_or_else(unknown)?;
    let join_column = metadata.relations[index]
        .join_column
        .as_deref()
        .ok_or_else(unknown)?;
    Ok((index, join_column))
}

fn primary(metadata: &EntityMetadata) -> Result<&ColumnMetadata> {
    metadata.primary_column().ok_or_else(|| {
        OrmError::Core(CoreError::PrimaryColumnCount {
            target: metadata.target.clone(),
            found: 0,
        })
    })
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(table));
    }
    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote(table),
        names.join(", ")
    )
}

/// Copies the parent's ancestry to the new node one level deeper, plus the
/// node's own row. Binds: node, parent, node, node.
fn closure_insert_sql(closure: &str) -> String {
    let ancestor = quote(naming::CLOSURE_ANCESTOR);
    let descendant = quote(naming::CLOSURE_DESCENDANT);
    let level = quote(naming::CLOSURE_LEVEL);
    format!(
        "INSERT INTO {table} ({ancestor}, {descendant}, {level}) \
         SELECT {ancestor}, ?, {level} + 1 FROM {table} WHERE {descendant} = ? \
         UNION ALL SELECT ?, ?, 1",
        table = quote(closure)
    )
}

fn closure_root_sql(closure: &str) -> String {
    format!(
        "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, 1)",
        quote(closure),
        quote(naming::CLOSURE_ANCESTOR),
        quote(naming::CLOSURE_DESCENDANT),
        quote(naming::CLOSURE_LEVEL)
    )
}

fn closure_level_sql(closure: &str) -> String {
    format!(
        "SELECT MAX({}) FROM {} WHERE {} = ?",
        quote(naming::CLOSURE_LEVEL),
        quote(closure),
        quote(naming::CLOSURE_DESCENDANT)
    )
}
