//! Schema changes.
//!
//! A [`SchemaChange`] is one reconciliation step for one table. Changes are
//! rendered to SQL by a [`MigrationDialect`](crate::dialect::MigrationDialect)
//! and can be replayed onto a [`TableSchema`] to compute the table a plan
//! ends with, which is what table recreation builds.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::schema::{
    ColumnSchema, ForeignKeySchema, IndexSchema, PrimaryKeySchema, TableSchema, UniqueKeySchema,
};

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaChange {
    /// Create a table with its columns, primary key and foreign keys.
    CreateTable(TableSchema),

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },

    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Change the definition of an existing column.
    ChangeColumn {
        /// Table name.
        table: String,
        /// Live definition.
        old: ColumnSchema,
        /// Desired definition.
        new: ColumnSchema,
    },

    /// Replace the primary key.
    ChangePrimaryKey {
        /// Table name.
        table: String,
        /// Live primary key.
        old: PrimaryKeySchema,
        /// Desired primary key.
        new: PrimaryKeySchema,
    },

    /// Create an index.
    CreateIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexSchema,
    },

    /// Drop an index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        name: String,
    },

    /// Add a unique constraint.
    AddUnique {
        /// Table name.
        table: String,
        /// Constraint definition.
        unique: UniqueKeySchema,
    },

    /// Drop a unique constraint.
    DropUnique {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },

    /// Add a foreign key.
    AddForeignKey {
        /// Table name.
        table: String,
        /// Foreign key definition.
        foreign_key: ForeignKeySchema,
    },

    /// Drop a foreign key.
    DropForeignKey {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
}

impl SchemaChange {
    /// The table this change applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(table) => &table.name,
            Self::DropTable { name } => name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::ChangeColumn { table, .. }
            | Self::ChangePrimaryKey { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddUnique { table, .. }
            | Self::DropUnique { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. } => table,
        }
    }

    /// Returns a human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable(table) => format!("Create table {}", table.name),
            Self::DropTable { name } => format!("Drop table {name}"),
            Self::AddColumn { table, column } => {
                format!("Add column {} to {table}", column.name)
            }
            Self::DropColumn { table, column } => format!("Drop column {column} from {table}"),
            Self::ChangeColumn { table, old, new } => format!(
                "Change column {}.{} ({})",
                table,
                old.name,
                new.differences(old).join(", ")
            ),
            Self::ChangePrimaryKey { table, new, .. } => format!(
                "Change primary key of {table} to ({})",
                new.columns.join(", ")
            ),
            Self::CreateIndex { table, index } => {
                format!("Create index {} on {table}", index.name)
            }
            Self::DropIndex { name, .. } => format!("Drop index {name}"),
            Self::AddUnique { table, unique } => {
                format!("Add unique constraint {} on {table}", unique.name)
            }
            Self::DropUnique { table, name } => {
                format!("Drop unique constraint {name} from {table}")
            }
            Self::AddForeignKey { table, foreign_key } => {
                format!("Add foreign key {} on {table}", foreign_key.name)
            }
            Self::DropForeignKey { table, name } => {
                format!("Drop foreign key {name} from {table}")
            }
        }
    }

    /// Position of this change when a table's changes are applied natively.
    ///
    /// Constraints that reference columns are dropped before the columns and
    /// added after them.
    #[must_use]
    pub const fn apply_order(&self) -> u8 {
        match self {
            Self::DropForeignKey { .. } => 0,
            Self::DropIndex { .. } | Self::DropUnique { .. } => 1,
            Self::DropColumn { .. } => 2,
            Self::DropTable { .. } | Self::CreateTable(_) => 3,
            Self::AddColumn { .. } => 4,
            Self::ChangeColumn { .. } => 5,
            Self::ChangePrimaryKey { .. } => 6,
            Self::AddUnique { .. } | Self::CreateIndex { .. } => 7,
            Self::AddForeignKey { .. } => 8,
        }
    }

    /// Replays this change onto `table`.
    pub fn apply_to(&self, table: &mut TableSchema) -> Result<()> {
        match self {
            Self::CreateTable(_) | Self::DropTable { .. } => {
                return Err(SyncError::InvalidState(format!(
                    "'{}' cannot be replayed onto table '{}'",
                    self.description(),
                    table.name
                )));
            }
            Self::AddColumn { column, .. } => {
                if table.get_column(&column.name).is_some() {
                    return Err(SyncError::InvalidState(format!(
                        "column '{}' already exists in table '{}'",
                        column.name, table.name
                    )));
                }
                table.columns.push(column.clone());
            }
            Self::DropColumn { column, .. } => {
                let before = table.columns.len();
                table.columns.retain(|c| &c.name != column);
                if table.columns.len() == before {
                    return Err(missing("column", column, &table.name));
                }
            }
            Self::ChangeColumn { old, new, .. } => {
                let slot = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name == old.name)
                    .ok_or_else(|| missing("column", &old.name, &table.name))?;
                *slot = new.clone();
            }
            Self::ChangePrimaryKey { new, .. } => table.primary_key = new.clone(),
            Self::CreateIndex { index, .. } => table.indexes.push(index.clone()),
            Self::DropIndex { name, .. } => {
                let before = table.indexes.len();
                table.indexes.retain(|i| &i.name != name);
                if table.indexes.len() == before {
                    return Err(missing("index", name, &table.name));
                }
            }
            Self::AddUnique { unique, .. } => table.unique_keys.push(unique.clone()),
            Self::DropUnique { name, .. } => {
                let before = table.unique_keys.len();
                table.unique_keys.retain(|u| &u.name != name);
                if table.unique_keys.len() == before {
                    return Err(missing("unique constraint", name, &table.name));
                }
            }
            Self::AddForeignKey { foreign_key, .. } => {
                table.foreign_keys.push(foreign_key.clone());
            }
            Self::DropForeignKey { name, .. } => {
                let before = table.foreign_keys.len();
                table.foreign_keys.retain(|f| &f.name != name);
                if table.foreign_keys.len() == before {
                    return Err(missing("foreign key", name, &table.name));
                }
            }
        }
        Ok(())
    }
}

fn missing(what: &str, name: &str, table: &str) -> SyncError {
    SyncError::InvalidState(format!("{what} '{name}' does not exist in table '{table}'"))
}

/// Computes the table `changes` end with when replayed onto `live`.
pub fn final_table(live: &TableSchema, changes: &[SchemaChange]) -> Result<TableSchema> {
    let mut table = live.clone();
    for change in changes {
        change.apply_to(&mut table)?;
    }
    Ok(table)
}
