//! Table differ.
//!
//! Compares a live table with the table its entity expects and returns the
//! changes that turn one into the other. Columns are matched by name;
//! indexes, unique constraints and foreign keys by name-set comparison, a
//! modified one becoming a drop followed by a create.

use std::collections::HashMap;

use crate::operations::SchemaChange;
use crate::schema::TableSchema;

/// Returns the changes that turn `live` into `desired`, in discovery order.
#[must_use]
pub fn diff_table(live: &TableSchema, desired: &TableSchema) -> Vec<SchemaChange> {
    let table = &desired.name;
    let mut changes = Vec::new();

    for column in &desired.columns {
        match live.get_column(&column.name) {
            None => changes.push(SchemaChange::AddColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            Some(old) if !column.differences(old).is_empty() => {
                changes.push(SchemaChange::ChangeColumn {
                    table: table.clone(),
                    old: old.clone(),
                    new: column.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for column in &live.columns {
        if desired.get_column(&column.name).is_none() {
            changes.push(SchemaChange::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    if live.primary_key.columns != desired.primary_key.columns {
        changes.push(SchemaChange::ChangePrimaryKey {
            table: table.clone(),
            old: live.primary_key.clone(),
            new: desired.primary_key.clone(),
        });
    }

    let (dropped, added) = by_name(&live.unique_keys, &desired.unique_keys, |u| &u.name);
    changes.extend(dropped.into_iter().map(|u| SchemaChange::DropUnique {
        table: table.clone(),
        name: u.name.clone(),
    }));
    changes.extend(added.into_iter().map(|u| SchemaChange::AddUnique {
        table: table.clone(),
        unique: u.clone(),
    }));

    let (dropped, added) = by_name(&live.indexes, &desired.indexes, |i| &i.name);
    changes.extend(dropped.into_iter().map(|i| SchemaChange::DropIndex {
        table: table.clone(),
        name: i.name.clone(),
    }));
    changes.extend(added.into_iter().map(|i| SchemaChange::CreateIndex {
        table: table.clone(),
        index: i.clone(),
    }));

    let (dropped, added) = by_name(&live.foreign_keys, &desired.foreign_keys, |f| &f.name);
    changes.extend(dropped.into_iter().map(|f| SchemaChange::DropForeignKey {
        table: table.clone(),
        name: f.name.clone(),
    }));
    changes.extend(added.into_iter().map(|f| SchemaChange::AddForeignKey {
        table: table.clone(),
        foreign_key: f.clone(),
    }));

    changes
}

/// Splits two named sets into the live items to drop and the desired items
/// to add. An item present on both sides but with a different definition
/// lands in both lists.
fn by_name<'a, T, F>(live: &'a [T], desired: &'a [T], name: F) -> (Vec<&'a T>, Vec<&'a T>)
where
    T: PartialEq,
    F: Fn(&T) -> &String,
{
    let live_by_name: HashMap<&String, &T> = live.iter().map(|item| (name(item), item)).collect();
    let desired_by_name: HashMap<&String, &T> =
        desired.iter().map(|item| (name(item), item)).collect();

    let dropped = live
        .iter()
        .filter(|item| desired_by_name.get(name(item)).is_none_or(|d| *d != *item))
        .collect();
    let added = desired
        .iter()
        .filter(|item| live_by_name.get(name(item)).is_none_or(|l| *l != *item))
        .collect();
    (dropped, added)
}

/// Orders tables so that a table comes after the tables it references.
///
/// Self references are ignored; tables caught in a reference cycle keep
/// their input order.
#[must_use]
pub fn creation_order(tables: &[TableSchema]) -> Vec<&TableSchema> {
    let position: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();
    let mut ordered = Vec::with_capacity(tables.len());
    let mut state = vec![Visit::Pending; tables.len()];

    for i in 0..tables.len() {
        visit(i, tables, &position, &mut state, &mut ordered);
    }
    ordered
}

fn visit<'a>(
    i: usize,
    tables: &'a [TableSchema],
    position: &HashMap<&str, usize>,
    state: &mut [Visit],
    ordered: &mut Vec<&'a TableSchema>,
) {
    if state[i] != Visit::Pending {
        return;
    }
    state[i] = Visit::InProgress;
    for referenced in tables[i].referenced_tables() {
        if let Some(&j) = position.get(referenced) {
            visit(j, tables, position, state, ordered);
        }
    }
    state[i] = Visit::Done;
    ordered.push(&tables[i]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    InProgress,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema, SqlType,
        UniqueKeySchema,
    };

    fn live() -> TableSchema {
        TableSchema::new("post")
            .column(ColumnSchema::new("id", SqlType::BigInt).generated())
            .column(ColumnSchema::new("title", SqlType::Varchar(255)).not_null())
            .column(ColumnSchema::new("legacy", SqlType::Text))
            .primary_key(&["id"])
            .index(IndexSchema {
                name: "IDX_post_title".into(),
                columns: vec!["title".into()],
                unique: false,
                condition: None,
            })
    }

    #[test]
    fn test_identical_tables_have_no_changes() {
        assert!(diff_table(&live(), &live()).is_empty());
    }

    #[test]
    fn test_column_changes() {
        let desired = TableSchema::new("post")
            .column(ColumnSchema::new("id", SqlType::BigInt).generated())
            .column(ColumnSchema::new("title", SqlType::Varchar(120)).not_null())
            .column(
                ColumnSchema::new("likes", SqlType::BigInt)
                    .not_null()
                    .default(DefaultValue::Integer(0)),
            )
            .primary_key(&["id"])
            .index(IndexSchema {
                name: "IDX_post_title".into(),
                columns: vec!["title".into()],
                unique: false,
                condition: None,
            });

        let changes = diff_table(&live(), &desired);
        assert_eq!(changes.len(), 3);
        assert!(matches!(
            &changes[0],
            SchemaChange::ChangeColumn { new, .. } if new.sql_type == SqlType::Varchar(120)
        ));
        assert!(matches!(
            &changes[1],
            SchemaChange::AddColumn { column, .. } if column.name == "likes"
        ));
        assert!(matches!(
            &changes[2],
            SchemaChange::DropColumn { column, .. } if column == "legacy"
        ));
    }

    #[test]
    fn test_modified_index_is_dropped_and_recreated() {
        let mut desired = live();
        desired.indexes[0].unique = true;
        let changes = diff_table(&live(), &desired);
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], SchemaChange::DropIndex { name, .. } if name == "IDX_post_title"));
        assert!(matches!(&changes[1], SchemaChange::CreateIndex { index, .. } if index.unique));
    }

    #[test]
    fn test_constraint_changes() {
        let desired = live()
            .column(ColumnSchema::new("author_id", SqlType::BigInt))
            .unique_key(UniqueKeySchema {
                name: "UQ_post_title".into(),
                columns: vec!["title".into()],
            })
            .foreign_key(ForeignKeySchema {
                name: "FK_post_author_id".into(),
                columns: vec!["author_id".into()],
                references_table: "user".into(),
                references_columns: vec!["id".into()],
                on_delete: ForeignKeyAction::SetNull,
                on_update: ForeignKeyAction::NoAction,
            });
        let changes = diff_table(&live(), &desired);
        assert!(changes.iter().any(|c| matches!(c, SchemaChange::AddUnique { .. })));
        assert!(changes.iter().any(|c| matches!(c, SchemaChange::AddForeignKey { .. })));
        assert!(changes.iter().any(|c| matches!(c, SchemaChange::AddColumn { .. })));
    }

    #[test]
    fn test_primary_key_change() {
        let desired = live().primary_key(&["id", "title"]);
        let changes = diff_table(&live(), &desired);
        assert!(matches!(
            &changes[0],
            SchemaChange::ChangePrimaryKey { new, .. } if new.columns.len() == 2
        ));
    }

    #[test]
    fn test_creation_order_follows_references() {
        let fk = |name: &str, target: &str| ForeignKeySchema {
            name: name.into(),
            columns: vec!["x".into()],
            references_table: target.into(),
            references_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        };
        let tables = vec![
            TableSchema::new("comment").foreign_key(fk("FK_c", "post")),
            TableSchema::new("post")
                .foreign_key(fk("FK_p", "user"))
                .foreign_key(fk("FK_parent", "post")),
            TableSchema::new("user"),
        ];
        let order: Vec<&str> = creation_order(&tables)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(order, vec!["user", "post", "comment"]);
    }
}
