//! Database dialect implementations.
//!
//! Each dialect knows how to render schema changes as SQL for its engine and
//! reports which changes the engine can apply in place. Changes it cannot
//! apply are routed to [`TableRecreation`](crate::recreate::TableRecreation).

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::error::Result;
use crate::operations::SchemaChange;
use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema, SqlType, TableSchema};

/// Trait for database-specific SQL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the SQL type name for the given type.
    fn type_name(&self, sql_type: &SqlType) -> Result<String>;

    /// Generates SQL for a schema change.
    ///
    /// Fails with [`SyncError::RequiresRecreation`](crate::SyncError::RequiresRecreation)
    /// for changes the engine cannot apply in place.
    fn generate_sql(&self, change: &SchemaChange) -> Result<Vec<String>>;

    /// Returns whether this dialect supports ALTER COLUMN.
    fn supports_alter_column(&self) -> bool;

    /// Returns whether this dialect supports DROP COLUMN.
    fn supports_drop_column(&self) -> bool;

    /// Returns whether this dialect supports adding constraints after table creation.
    fn supports_add_constraint(&self) -> bool;

    /// Returns whether `column` can be added to an existing table in place.
    fn supports_add_column(&self, column: &ColumnSchema) -> bool {
        let _ = column;
        true
    }

    /// Returns whether `change` can be applied without recreating the table.
    fn supports_natively(&self, change: &SchemaChange) -> bool {
        match change {
            SchemaChange::CreateTable(_)
            | SchemaChange::DropTable { .. }
            | SchemaChange::CreateIndex { .. }
            | SchemaChange::DropIndex { .. }
            | SchemaChange::AddUnique { .. }
            | SchemaChange::DropUnique { .. } => true,
            SchemaChange::AddColumn { column, .. } => self.supports_add_column(column),
            SchemaChange::DropColumn { .. } => self.supports_drop_column(),
            SchemaChange::ChangeColumn { .. } | SchemaChange::ChangePrimaryKey { .. } => {
                self.supports_alter_column()
            }
            SchemaChange::AddForeignKey { .. } | SchemaChange::DropForeignKey { .. } => {
                self.supports_add_constraint()
            }
        }
    }

    /// Returns the auto-increment keyword for this dialect.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generates column definition SQL.
    ///
    /// `inline_primary` renders the column as the table's sole primary key.
    fn column_definition(&self, column: &ColumnSchema, inline_primary: bool) -> Result<String> {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.sql_type)?,
        ];

        if inline_primary {
            parts.push("PRIMARY KEY".to_string());
            if column.generated && !self.auto_increment_keyword().is_empty() {
                parts.push(self.auto_increment_keyword().to_string());
            }
        } else if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        Ok(parts.join(" "))
    }

    /// Generates the `FOREIGN KEY` clause of a constraint.
    fn foreign_key_clause(&self, fk: &ForeignKeySchema) -> String {
        let quote_all = |columns: &[String]| {
            columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_all(&fk.columns),
            self.quote_identifier(&fk.references_table),
            quote_all(&fk.references_columns),
            fk.on_delete.to_sql(),
            fk.on_update.to_sql()
        )
    }

    /// Generates `CREATE TABLE` with columns, primary key and inline foreign
    /// keys. Unique constraints and indexes are separate changes.
    fn create_table_sql(&self, table: &TableSchema) -> Result<String> {
        let inline = inline_primary(table);
        let mut definitions = Vec::with_capacity(table.columns.len() + 1);
        for column in &table.columns {
            let is_inline = inline == Some(column.name.as_str());
            definitions.push(self.column_definition(column, is_inline)?);
        }

        if inline.is_none() && !table.primary_key.columns.is_empty() {
            let name = table
                .primary_key
                .name
                .clone()
                .unwrap_or_else(|| format!("PK_{}", table.name));
            let quoted: Vec<String> = table
                .primary_key
                .columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect();
            definitions.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote_identifier(&name),
                quoted.join(", ")
            ));
        }

        for fk in &table.foreign_keys {
            definitions.push(format!(
                "CONSTRAINT {} {}",
                self.quote_identifier(&fk.name),
                self.foreign_key_clause(fk)
            ));
        }

        Ok(format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            definitions.join(",\n  ")
        ))
    }

    /// Generates SQL for renaming a table.
    fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    /// Generates SQL for dropping a table.
    fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(name))
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &str, index: &IndexSchema) -> String {
        let quoted: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        let mut sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            quoted.join(", ")
        );
        if let Some(condition) = &index.condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        sql
    }

    /// Generates SQL for dropping an index.
    fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(name))
    }

    /// Statement switching foreign-key enforcement off, where the engine has one.
    fn disable_foreign_keys(&self) -> Option<&'static str> {
        None
    }

    /// Statement switching foreign-key enforcement back on.
    fn enable_foreign_keys(&self) -> Option<&'static str> {
        None
    }
}

/// The column rendered inline as `PRIMARY KEY`: the sole key column, when it
/// is generated.
#[must_use]
pub fn inline_primary(table: &TableSchema) -> Option<&str> {
    match table.primary_key.columns.as_slice() {
        [only] if table.get_column(only).is_some_and(|c| c.generated) => Some(only.as_str()),
        _ => None,
    }
}
