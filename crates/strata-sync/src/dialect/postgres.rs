//! PostgreSQL dialect.
//!
//! PostgreSQL alters columns and constraints in place, so every change is
//! rendered natively and table recreation is never needed.

use super::MigrationDialect;
use crate::error::Result;
use crate::operations::SchemaChange;
use crate::schema::{ColumnSchema, DefaultValue, SqlType};

/// PostgreSQL dialect for migration SQL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn alter_table(self, table: &str, action: &str) -> String {
        format!("ALTER TABLE {} {action}", self.quote_identifier(table))
    }

    fn change_column_sql(
        self,
        table: &str,
        old: &ColumnSchema,
        new: &ColumnSchema,
    ) -> Result<Vec<String>> {
        let column = self.quote_identifier(&new.name);
        let mut statements = Vec::new();

        if old.sql_type != new.sql_type {
            let ty = self.type_name(&new.sql_type)?;
            statements.push(self.alter_table(
                table,
                &format!("ALTER COLUMN {column} TYPE {ty} USING {column}::{ty}"),
            ));
        }
        if old.nullable != new.nullable {
            let action = if new.nullable { "DROP" } else { "SET" };
            statements.push(self.alter_table(
                table,
                &format!("ALTER COLUMN {column} {action} NOT NULL"),
            ));
        }
        if old.default.to_sql() != new.default.to_sql() {
            let action = match self.render_default(&new.default) {
                Some(sql) => format!("ALTER COLUMN {column} SET DEFAULT {sql}"),
                None => format!("ALTER COLUMN {column} DROP DEFAULT"),
            };
            statements.push(self.alter_table(table, &action));
        }
        if old.generated != new.generated {
            let action = if new.generated {
                format!("ALTER COLUMN {column} ADD GENERATED BY DEFAULT AS IDENTITY")
            } else {
                format!("ALTER COLUMN {column} DROP IDENTITY IF EXISTS")
            };
            statements.push(self.alter_table(table, &action));
        }
        Ok(statements)
    }

    fn render_default(self, default: &DefaultValue) -> Option<String> {
        match default {
            DefaultValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            other => other.to_sql(),
        }
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn type_name(&self, sql_type: &SqlType) -> Result<String> {
        Ok(match sql_type {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(n) => format!("VARCHAR({n})"),
            SqlType::Char(n) => format!("CHAR({n})"),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::DateTime | SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::TimestampTz => "TIMESTAMPTZ".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
            SqlType::Numeric(p, s) => format!("NUMERIC({p}, {s})"),
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Json => "JSONB".to_string(),
            SqlType::Custom(name) => name.clone(),
        })
    }

    fn generate_sql(&self, change: &SchemaChange) -> Result<Vec<String>> {
        let sql = match change {
            SchemaChange::CreateTable(table) => self.create_table_sql(table)?,
            SchemaChange::DropTable { name } => self.drop_table_sql(name),
            SchemaChange::AddColumn { table, column } => self.alter_table(
                table,
                &format!("ADD COLUMN {}", self.column_definition(column, false)?),
            ),
            SchemaChange::DropColumn { table, column } => self.alter_table(
                table,
                &format!("DROP COLUMN {}", self.quote_identifier(column)),
            ),
            SchemaChange::ChangeColumn { table, old, new } => {
                return self.change_column_sql(table, old, new);
            }
            SchemaChange::ChangePrimaryKey { table, old, new } => {
                let mut statements = Vec::new();
                if !old.columns.is_empty() {
                    let name = old.name.clone().unwrap_or_else(|| format!("{table}_pkey"));
                    statements.push(self.alter_table(
                        table,
                        &format!("DROP CONSTRAINT {}", self.quote_identifier(&name)),
                    ));
                }
                if !new.columns.is_empty() {
                    let name = new.name.clone().unwrap_or_else(|| format!("PK_{table}"));
                    let columns: Vec<String> =
                        new.columns.iter().map(|c| self.quote_identifier(c)).collect();
                    statements.push(self.alter_table(
                        table,
                        &format!(
                            "ADD CONSTRAINT {} PRIMARY KEY ({})",
                            self.quote_identifier(&name),
                            columns.join(", ")
                        ),
                    ));
                }
                return Ok(statements);
            }
            SchemaChange::CreateIndex { table, index } => self.create_index_sql(table, index),
            SchemaChange::DropIndex { name, .. } => self.drop_index_sql(name),
            SchemaChange::AddUnique { table, unique } => {
                let columns: Vec<String> = unique
                    .columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .collect();
                self.alter_table(
                    table,
                    &format!(
                        "ADD CONSTRAINT {} UNIQUE ({})",
                        self.quote_identifier(&unique.name),
                        columns.join(", ")
                    ),
                )
            }
            SchemaChange::AddForeignKey { table, foreign_key } => self.alter_table(
                table,
                &format!(
                    "ADD CONSTRAINT {} {}",
                    self.quote_identifier(&foreign_key.name),
                    self.foreign_key_clause(foreign_key)
                ),
            ),
            SchemaChange::DropUnique { table, name }
            | SchemaChange::DropForeignKey { table, name } => self.alter_table(
                table,
                &format!("DROP CONSTRAINT {}", self.quote_identifier(name)),
            ),
        };
        Ok(vec![sql])
    }

    fn supports_alter_column(&self) -> bool {
        true
    }

    fn supports_drop_column(&self) -> bool {
        true
    }

    fn supports_add_constraint(&self) -> bool {
        true
    }

    fn auto_increment_keyword(&self) -> &'static str {
        // Generated keys use SERIAL types instead.
        ""
    }

    fn column_definition(&self, column: &ColumnSchema, inline_primary: bool) -> Result<String> {
        let data_type = match (&column.sql_type, column.generated) {
            (SqlType::Integer | SqlType::SmallInt, true) => "SERIAL".to_string(),
            (SqlType::BigInt, true) => "BIGSERIAL".to_string(),
            (ty, _) => self.type_name(ty)?,
        };
        let mut sql = format!("{} {data_type}", self.quote_identifier(&column.name));
        if inline_primary {
            sql.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.render_default(&column.default) {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default);
        }
        Ok(sql)
    }
}
