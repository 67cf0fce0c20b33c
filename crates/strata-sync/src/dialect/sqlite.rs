//! SQLite dialect.
//!
//! SQLite has limited ALTER TABLE support: it can add a plain column, but it
//! cannot change or drop a column that other schema objects depend on, and it
//! cannot add or drop constraints. Those changes fail here with
//! [`SyncError::RequiresRecreation`] and are applied by the table
//! recreation protocol instead. Unique constraints are kept as unique
//! indexes named `UQ_*`.

use crate::error::{Result, SyncError};
use crate::operations::SchemaChange;
use crate::schema::{ColumnSchema, DefaultValue, IndexSchema, SqlType};

use super::MigrationDialect;

/// SQLite migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn recreation_required(self, change: &SchemaChange) -> SyncError {
        SyncError::RequiresRecreation {
            dialect: self.name(),
            table: change.table().to_string(),
            change: change.description(),
        }
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, sql_type: &SqlType) -> Result<String> {
        // Declared names are kept so that introspection reads back the same type.
        let name = match sql_type {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(n) => format!("VARCHAR({n})"),
            SqlType::Char(n) => format!("CHAR({n})"),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::DateTime => "DATETIME".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
            SqlType::Numeric(p, s) => format!("NUMERIC({p},{s})"),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(name) => name.clone(),
            SqlType::TimestampTz => {
                return Err(SyncError::UnsupportedDataType {
                    dialect: self.name(),
                    sql_type: "TIMESTAMPTZ".to_string(),
                });
            }
        };
        Ok(name)
    }

    fn generate_sql(&self, change: &SchemaChange) -> Result<Vec<String>> {
        if !self.supports_natively(change) {
            return Err(self.recreation_required(change));
        }
        let sql = match change {
            SchemaChange::CreateTable(table) => self.create_table_sql(table)?,
            SchemaChange::DropTable { name } => self.drop_table_sql(name),
            SchemaChange::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_identifier(table),
                self.column_definition(column, false)?
            ),
            SchemaChange::CreateIndex { table, index } => self.create_index_sql(table, index),
            SchemaChange::DropIndex { name, .. } | SchemaChange::DropUnique { name, .. } => {
                self.drop_index_sql(name)
            }
            SchemaChange::AddUnique { table, unique } => self.create_index_sql(
                table,
                &IndexSchema {
                    name: unique.name.clone(),
                    columns: unique.columns.clone(),
                    unique: true,
                    condition: None,
                },
            ),
            SchemaChange::DropColumn { .. }
            | SchemaChange::ChangeColumn { .. }
            | SchemaChange::ChangePrimaryKey { .. }
            | SchemaChange::AddForeignKey { .. }
            | SchemaChange::DropForeignKey { .. } => return Err(self.recreation_required(change)),
        };
        Ok(vec![sql])
    }

    fn supports_alter_column(&self) -> bool {
        false
    }

    fn supports_drop_column(&self) -> bool {
        // DROP COLUMN refuses columns used by indexes and keys.
        false
    }

    fn supports_add_constraint(&self) -> bool {
        false
    }

    fn supports_add_column(&self, column: &ColumnSchema) -> bool {
        let needs_value = !column.nullable && column.default.is_none();
        !(column.generated
            || needs_value
            || matches!(column.default, DefaultValue::Expression(_)))
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn column_definition(&self, column: &ColumnSchema, inline_primary: bool) -> Result<String> {
        if inline_primary && column.generated {
            // AUTOINCREMENT is only accepted on a rowid alias.
            return Ok(format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                self.quote_identifier(&column.name)
            ));
        }
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.sql_type)?,
        ];
        if inline_primary {
            parts.push("PRIMARY KEY".to_string());
        } else if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {default_sql}"));
        }
        Ok(parts.join(" "))
    }

    fn disable_foreign_keys(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_keys = OFF")
    }

    fn enable_foreign_keys(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_keys = ON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKeyAction, ForeignKeySchema, TableSchema, UniqueKeySchema};

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column(ColumnSchema::new("id", SqlType::BigInt).generated())
            .column(ColumnSchema::new("name", SqlType::Varchar(255)).not_null())
            .primary_key(&["id"])
    }

    #[test]
    fn test_create_table_with_generated_key() {
        let sql = dialect()
            .generate_sql(&SchemaChange::CreateTable(users()))
            .unwrap();
        assert_eq!(sql.len(), 1);
        assert_eq!(
            sql[0],
            "CREATE TABLE \"users\" (\n  \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \"name\" VARCHAR(255) NOT NULL\n)"
        );
    }

    #[test]
    fn test_create_table_with_composite_key_and_foreign_keys() {
        let fk = |column: &str, target: &str| ForeignKeySchema {
            name: format!("FK_post_tags_{column}"),
            columns: vec![column.to_string()],
            references_table: target.to_string(),
            references_columns: vec!["id".to_string()],
            on_delete: ForeignKeyAction::Cascade,
            on_update: ForeignKeyAction::NoAction,
        };
        let table = TableSchema::new("post_tags")
            .column(ColumnSchema::new("post_id", SqlType::BigInt).not_null())
            .column(ColumnSchema::new("tag_id", SqlType::BigInt).not_null())
            .primary_key(&["post_id", "tag_id"])
            .foreign_key(fk("post_id", "post"))
            .foreign_key(fk("tag_id", "tag"));
        let sql = dialect().create_table_sql(&table).unwrap();
        assert!(sql.contains("CONSTRAINT \"PK_post_tags\" PRIMARY KEY (\"post_id\", \"tag_id\")"));
        assert!(sql.contains(
            "CONSTRAINT \"FK_post_tags_post_id\" FOREIGN KEY (\"post_id\") REFERENCES \"post\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"
        ));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_add_column() {
        let change = SchemaChange::AddColumn {
            table: "users".to_string(),
            column: ColumnSchema::new("active", SqlType::Boolean)
                .not_null()
                .default(DefaultValue::Bool(true)),
        };
        let sql = dialect().generate_sql(&change).unwrap();
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" ADD COLUMN \"active\" BOOLEAN NOT NULL DEFAULT 1"
        );
    }

    #[test]
    fn test_add_column_requiring_recreation() {
        let d = dialect();
        let not_null = ColumnSchema::new("age", SqlType::BigInt).not_null();
        let expression = ColumnSchema::new("created", SqlType::DateTime)
            .default(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string()));
        assert!(!d.supports_add_column(&not_null));
        assert!(!d.supports_add_column(&expression));
        assert!(!d.supports_add_column(&ColumnSchema::new("id", SqlType::BigInt).generated()));

        let change = SchemaChange::AddColumn {
            table: "users".to_string(),
            column: not_null,
        };
        assert!(matches!(
            d.generate_sql(&change),
            Err(SyncError::RequiresRecreation { table, .. }) if table == "users"
        ));
    }

    #[test]
    fn test_alterations_require_recreation() {
        let d = dialect();
        let changes = [
            SchemaChange::DropColumn {
                table: "users".to_string(),
                column: "name".to_string(),
            },
            SchemaChange::ChangeColumn {
                table: "users".to_string(),
                old: ColumnSchema::new("name", SqlType::Text),
                new: ColumnSchema::new("name", SqlType::Text).not_null(),
            },
            SchemaChange::DropForeignKey {
                table: "users".to_string(),
                name: "FK_users_team_id".to_string(),
            },
        ];
        for change in &changes {
            assert!(!d.supports_natively(change));
            assert!(matches!(
                d.generate_sql(change),
                Err(SyncError::RequiresRecreation { .. })
            ));
        }
    }

    #[test]
    fn test_unique_constraint_as_index() {
        let change = SchemaChange::AddUnique {
            table: "users".to_string(),
            unique: UniqueKeySchema {
                name: "UQ_users_name".to_string(),
                columns: vec!["name".to_string()],
            },
        };
        let sql = dialect().generate_sql(&change).unwrap();
        assert_eq!(
            sql[0],
            "CREATE UNIQUE INDEX \"UQ_users_name\" ON \"users\" (\"name\")"
        );

        let drop = SchemaChange::DropUnique {
            table: "users".to_string(),
            name: "UQ_users_name".to_string(),
        };
        assert_eq!(
            dialect().generate_sql(&drop).unwrap()[0],
            "DROP INDEX \"UQ_users_name\""
        );
    }

    #[test]
    fn test_type_names() {
        let d = dialect();
        assert_eq!(d.type_name(&SqlType::BigInt).unwrap(), "BIGINT");
        assert_eq!(d.type_name(&SqlType::Varchar(40)).unwrap(), "VARCHAR(40)");
        assert_eq!(d.type_name(&SqlType::Decimal(10, 2)).unwrap(), "DECIMAL(10,2)");
        assert!(matches!(
            d.type_name(&SqlType::TimestampTz),
            Err(SyncError::UnsupportedDataType { dialect: "sqlite", .. })
        ));
    }

    #[test]
    fn test_declared_types_parse_back() {
        let d = dialect();
        for ty in [
            SqlType::BigInt,
            SqlType::Varchar(255),
            SqlType::Decimal(12, 3),
            SqlType::DateTime,
            SqlType::Boolean,
            SqlType::Double,
            SqlType::Json,
        ] {
            assert_eq!(SqlType::parse(&d.type_name(&ty).unwrap()), ty);
        }
    }
}
