//! Schema representation types.
//!
//! A [`TableSchema`] describes one table. The same type holds both sides of a
//! synchronization: the shape derived from entity metadata (what the code
//! expects) and the shape read back from the database (what exists).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strata_core::{ColumnMetadata, ColumnType, EntityMetadata, MetadataStore, naming};

pub use strata_core::{DefaultValue, ForeignKeyAction};

use crate::error::{Result, SyncError};

/// SQL data types supported by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    BigInt,
    /// Small integer (16-bit).
    SmallInt,
    /// Unbounded text.
    Text,
    /// Variable-length character string.
    Varchar(u32),
    /// Fixed-length character string.
    Char(u32),
    /// Boolean.
    Boolean,
    /// Date and time.
    DateTime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp without zone.
    Timestamp,
    /// Timestamp with zone.
    TimestampTz,
    /// Floating point (single precision).
    Real,
    /// Floating point (double precision).
    Double,
    /// Decimal with precision and scale.
    Decimal(u8, u8),
    /// Numeric (alias for Decimal).
    Numeric(u8, u8),
    /// Binary large object.
    Blob,
    /// JSON data.
    Json,
    /// A declared type this crate does not model; compared verbatim.
    Custom(String),
}

static DECLARED_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
        .expect("declared type pattern is valid")
});

impl SqlType {
    /// Maps a logical column type to the SQL type the synchronizer expects.
    #[must_use]
    pub fn from_column(column: &ColumnMetadata) -> Self {
        match column.ty {
            ColumnType::String => Self::Varchar(column.length.unwrap_or(255)),
            ColumnType::Int => Self::BigInt,
            ColumnType::Float => Self::Double,
            ColumnType::Decimal => {
                Self::Decimal(column.precision.unwrap_or(10), column.scale.unwrap_or(0))
            }
            ColumnType::Date => Self::Date,
            ColumnType::DateTime if column.timezone => Self::TimestampTz,
            ColumnType::DateTime => Self::DateTime,
            ColumnType::Time => Self::Time,
            ColumnType::Boolean => Self::Boolean,
            ColumnType::Json => Self::Json,
            ColumnType::Text | ColumnType::SimpleArray => Self::Text,
        }
    }

    /// Parses a declared type as reported by the catalog, e.g. `VARCHAR(255)`.
    #[must_use]
    pub fn parse(declared: &str) -> Self {
        let Some(caps) = DECLARED_TYPE.captures(declared) else {
            return Self::Custom(declared.trim().to_string());
        };
        let base = caps[1].to_ascii_uppercase();
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u8>().ok());
        let precision = first.and_then(|p| u8::try_from(p).ok());

        match (base.as_str(), first) {
            ("INTEGER" | "INT", None) => Self::Integer,
            ("BIGINT" | "INT8", None) => Self::BigInt,
            ("SMALLINT" | "INT2", None) => Self::SmallInt,
            ("TEXT", None) => Self::Text,
            ("VARCHAR" | "CHARACTER VARYING", Some(n)) => Self::Varchar(n),
            ("CHAR" | "CHARACTER", Some(n)) => Self::Char(n),
            ("BOOLEAN" | "BOOL", None) => Self::Boolean,
            ("DATETIME", None) => Self::DateTime,
            ("DATE", None) => Self::Date,
            ("TIME", None) => Self::Time,
            ("TIMESTAMP", None) => Self::Timestamp,
            ("TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE", None) => Self::TimestampTz,
            ("REAL", None) => Self::Real,
            ("DOUBLE" | "DOUBLE PRECISION", None) => Self::Double,
            ("DECIMAL", Some(_)) if precision.is_some() => {
                Self::Decimal(precision.unwrap_or(10), second.unwrap_or(0))
            }
            ("NUMERIC", Some(_)) if precision.is_some() => {
                Self::Numeric(precision.unwrap_or(10), second.unwrap_or(0))
            }
            ("BLOB", None) => Self::Blob,
            ("JSON" | "JSONB", None) => Self::Json,
            _ => Self::Custom(declared.trim().to_string()),
        }
    }
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// SQL data type, carrying length, precision, scale and zone.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value.
    pub default: DefaultValue,
    /// Whether the database assigns the value.
    pub generated: bool,
}

impl ColumnSchema {
    /// Creates a new nullable column schema.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default: DefaultValue::None,
            generated: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Marks the column as database-generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self.nullable = false;
        self
    }

    /// Lists what differs from `other`, empty when the columns match.
    ///
    /// Defaults are compared by their SQL rendering so that `Bool(true)` and
    /// an introspected `Integer(1)` are equal.
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.sql_type != other.sql_type {
            changed.push("type");
        }
        if self.nullable != other.nullable {
            changed.push("nullable");
        }
        if self.default.to_sql() != other.default.to_sql() {
            changed.push("default");
        }
        if self.generated != other.generated {
            changed.push("generated");
        }
        changed
    }
}

/// Schema definition for a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PrimaryKeySchema {
    /// Constraint name, where the engine keeps one.
    pub name: Option<String>,
    /// Key columns in order.
    pub columns: Vec<String>,
}

/// Schema definition for a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the referencing table.
    pub columns: Vec<String>,
    /// Referenced table name.
    pub references_table: String,
    /// Referenced column(s).
    pub references_columns: Vec<String>,
    /// Action on delete.
    pub on_delete: ForeignKeyAction,
    /// Action on update.
    pub on_update: ForeignKeyAction,
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Columns included in the index.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Partial index condition (WHERE clause).
    pub condition: Option<String>,
}

/// Schema definition for a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKeySchema {
    /// Constraint name.
    pub name: String,
    /// Columns that form the unique constraint.
    pub columns: Vec<String>,
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Column definitions.
    pub columns: Vec<ColumnSchema>,
    /// Primary key.
    pub primary_key: PrimaryKeySchema,
    /// Unique constraint definitions.
    pub unique_keys: Vec<UniqueKeySchema>,
    /// Index definitions.
    pub indexes: Vec<IndexSchema>,
    /// Foreign key definitions.
    pub foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: PrimaryKeySchema::default(),
            unique_keys: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeySchema) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique_key(mut self, key: UniqueKeySchema) -> Self {
        self.unique_keys.push(key);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is the table's only primary key column.
    #[must_use]
    pub fn is_sole_primary(&self, name: &str) -> bool {
        self.primary_key.columns.len() == 1 && self.primary_key.columns[0] == name
    }

    /// Tables this table references through foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references_table.as_str())
            .filter(move |t| *t != self.name)
    }

    /// Derives the table an entity expects, including join columns and
    /// their foreign keys.
    pub fn from_entity(entity: &EntityMetadata, store: &MetadataStore) -> Result<Self> {
        let mut table = Self::new(entity.table.clone());

        for (_, column) in entity.persisted_columns() {
            let mut schema = ColumnSchema::new(column.name.clone(), SqlType::from_column(column))
                .default(column.default.clone());
            schema.nullable = column.nullable;
            if column.generated {
                schema = schema.generated();
            }
            table.columns.push(schema);
            if column.primary {
                table.primary_key.columns.push(column.name.clone());
            }
            if column.unique && !column.primary {
                let columns = vec![column.name.clone()];
                table.unique_keys.push(UniqueKeySchema {
                    name: naming::unique(&entity.table, &columns),
                    columns,
                });
            }
        }
        table.primary_key.name = Some(format!("PK_{}", entity.table));

        for (_, relation) in entity.join_relations() {
            let related = store.related(relation)?;
            let referenced = related.primary_column().ok_or_else(|| {
                SyncError::InvalidState(format!("entity '{}' has no primary column", related.target))
            })?;
            let join_column = relation.join_column.clone().ok_or_else(|| {
                SyncError::InvalidState(format!(
                    "relation '{}.{}' has no join column",
                    entity.target, relation.property
                ))
            })?;

            if table.get_column(&join_column).is_none() {
                let mut column = ColumnSchema::new(join_column.clone(), SqlType::from_column(referenced));
                column.nullable = relation.nullable;
                table.columns.push(column);
            }

            let columns = vec![join_column];
            table.foreign_keys.push(ForeignKeySchema {
                name: naming::foreign_key(&entity.table, &columns),
                columns,
                references_table: related.table.clone(),
                references_columns: vec![referenced.name.clone()],
                on_delete: relation.on_delete,
                on_update: ForeignKeyAction::NoAction,
            });
        }

        for unique in &entity.uniques {
            table.unique_keys.push(UniqueKeySchema {
                name: unique
                    .name
                    .clone()
                    .unwrap_or_else(|| naming::unique(&entity.table, &unique.columns)),
                columns: unique.columns.clone(),
            });
        }

        for index in &entity.indices {
            table.indexes.push(IndexSchema {
                name: index
                    .name
                    .clone()
                    .unwrap_or_else(|| naming::index(&entity.table, &index.columns)),
                columns: index.columns.clone(),
                unique: index.unique,
                condition: None,
            });
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Cascade, RelationMetadata};

    fn store() -> MetadataStore {
        MetadataStore::builder()
            .entity(
                EntityMetadata::new("User", "user")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(
                        ColumnMetadata::new("email", ColumnType::String)
                            .length(120)
                            .unique(),
                    ),
            )
            .entity(
                EntityMetadata::new("Post", "post")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("title", ColumnType::String))
                    .column(
                        ColumnMetadata::new("likes", ColumnType::Int)
                            .default(DefaultValue::Integer(0)),
                    )
                    .column(ColumnMetadata::new("cached", ColumnType::Int).virtual_column())
                    .relation(
                        RelationMetadata::many_to_one("author", "User")
                            .cascade(Cascade::insert_update())
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .index(&["title"], false),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_declared_types() {
        assert_eq!(SqlType::parse("INTEGER"), SqlType::Integer);
        assert_eq!(SqlType::parse("bigint"), SqlType::BigInt);
        assert_eq!(SqlType::parse("VARCHAR(255)"), SqlType::Varchar(255));
        assert_eq!(SqlType::parse("varchar( 40 )"), SqlType::Varchar(40));
        assert_eq!(SqlType::parse("DECIMAL(10,2)"), SqlType::Decimal(10, 2));
        assert_eq!(SqlType::parse("double precision"), SqlType::Double);
        assert_eq!(
            SqlType::parse("timestamp with time zone"),
            SqlType::TimestampTz
        );
        assert_eq!(SqlType::parse("GEOMETRY"), SqlType::Custom("GEOMETRY".into()));
        assert_eq!(SqlType::parse(""), SqlType::Custom(String::new()));
    }

    #[test]
    fn test_from_column() {
        let decimal = ColumnMetadata::new("price", ColumnType::Decimal).precision(12, 2);
        assert_eq!(SqlType::from_column(&decimal), SqlType::Decimal(12, 2));
        let tz = ColumnMetadata::new("at", ColumnType::DateTime).with_timezone();
        assert_eq!(SqlType::from_column(&tz), SqlType::TimestampTz);
        let tags = ColumnMetadata::new("tags", ColumnType::SimpleArray);
        assert_eq!(SqlType::from_column(&tags), SqlType::Text);
    }

    #[test]
    fn test_column_differences_normalize_defaults() {
        let desired = ColumnSchema::new("flag", SqlType::Boolean).default(DefaultValue::Bool(true));
        let live = ColumnSchema::new("flag", SqlType::Boolean).default(DefaultValue::Integer(1));
        assert!(desired.differences(&live).is_empty());

        let live = ColumnSchema::new("flag", SqlType::Integer).not_null();
        assert_eq!(
            desired.differences(&live),
            vec!["type", "nullable", "default"]
        );
    }

    #[test]
    fn test_table_from_entity() {
        let store = store();
        let post = store.get("Post").unwrap();
        let table = TableSchema::from_entity(post, &store).unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "likes", "author_id"]);
        assert_eq!(table.primary_key.columns, vec!["id"]);
        assert!(table.get_column("id").unwrap().generated);
        assert!(table.get_column("author_id").unwrap().nullable);
        assert_eq!(table.get_column("author_id").unwrap().sql_type, SqlType::BigInt);

        assert_eq!(table.foreign_keys.len(), 1);
        let fk = &table.foreign_keys[0];
        assert_eq!(fk.name, "FK_post_author_id");
        assert_eq!(fk.references_table, "user");
        assert_eq!(fk.references_columns, vec!["id"]);
        assert_eq!(fk.on_delete, ForeignKeyAction::SetNull);

        assert_eq!(table.indexes[0].name, "IDX_post_title");
        assert_eq!(table.referenced_tables().collect::<Vec<_>>(), vec!["user"]);
    }

    #[test]
    fn test_unique_column_becomes_unique_key() {
        let store = store();
        let user = store.get("User").unwrap();
        let table = TableSchema::from_entity(user, &store).unwrap();
        assert_eq!(table.unique_keys.len(), 1);
        assert_eq!(table.unique_keys[0].name, "UQ_user_email");
        assert_eq!(
            table.get_column("email").unwrap().sql_type,
            SqlType::Varchar(120)
        );
    }
}
