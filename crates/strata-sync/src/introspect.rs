//! SQLite schema introspection.
//!
//! Reads the live shape of tables through `sqlite_master` and the
//! table-valued pragma functions, and parses declared types and defaults
//! back into the same [`TableSchema`] model the entities derive, so that a
//! freshly synchronized table compares equal to its entity.
//!
//! A sole `INTEGER` primary key is a rowid alias and is reported as a
//! generated `BIGINT`. The `AUTOINCREMENT` scan of the stored `CREATE TABLE`
//! text is only a fallback for that rule.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::Row;
use strata_core::{QueryRunner, Value, naming};
use tracing::debug;

use crate::error::Result;
use crate::schema::{
    ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema, SqlType,
    TableSchema, UniqueKeySchema,
};

static PARTIAL_CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\)\s*WHERE\s+(.+?)\s*;?\s*$").expect("partial index pattern is valid")
});

/// Reads table definitions from a SQLite database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIntrospector;

impl SqliteIntrospector {
    /// Creates a new introspector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Names of all user tables, sorted.
    pub async fn list_tables(self, runner: &mut QueryRunner) -> Result<Vec<String>> {
        let rows = runner
            .query(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    /// Loads the named tables. Names that do not exist are skipped.
    pub async fn load_tables(
        self,
        runner: &mut QueryRunner,
        names: &[String],
    ) -> Result<Vec<TableSchema>> {
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            if let Some(table) = self.load_table(runner, name).await? {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Loads every user table.
    pub async fn load_all(self, runner: &mut QueryRunner) -> Result<Vec<TableSchema>> {
        let names = self.list_tables(runner).await?;
        self.load_tables(runner, &names).await
    }

    /// Whether a table exists.
    pub async fn table_exists(self, runner: &mut QueryRunner, name: &str) -> Result<bool> {
        let rows = runner
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(name)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Loads one table, or `None` if it does not exist.
    pub async fn load_table(
        self,
        runner: &mut QueryRunner,
        name: &str,
    ) -> Result<Option<TableSchema>> {
        let rows = runner
            .query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(name)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let create_sql: Option<String> = row.try_get("sql")?;
        debug!(table = %name, "introspecting table");

        let mut table = TableSchema::new(name);
        self.load_columns(runner, &mut table, create_sql.as_deref())
            .await?;
        self.load_indexes(runner, &mut table).await?;
        self.load_foreign_keys(runner, &mut table).await?;
        Ok(Some(table))
    }

    async fn load_columns(
        self,
        runner: &mut QueryRunner,
        table: &mut TableSchema,
        create_sql: Option<&str>,
    ) -> Result<()> {
        let rows = runner
            .query(
                "SELECT name, type, \"notnull\", dflt_value, pk \
                 FROM pragma_table_info(?) ORDER BY cid",
                &[Value::from(table.name.as_str())],
            )
            .await?;

        let mut primary: Vec<(i64, String, String)> = Vec::new();
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            let mut column = ColumnSchema::new(name.clone(), SqlType::parse(&declared))
                .default(parse_default(default.as_deref()));
            column.nullable = not_null == 0 && pk == 0;
            if pk > 0 {
                primary.push((pk, name, declared));
            }
            table.columns.push(column);
        }

        primary.sort_by_key(|(position, _, _)| *position);
        table.primary_key.columns = primary.iter().map(|(_, name, _)| name.clone()).collect();

        let rowid_alias = match primary.as_slice() {
            [(_, name, declared)] if declared.trim().eq_ignore_ascii_case("INTEGER") => {
                Some(name.clone())
            }
            _ => None,
        };
        let generated = rowid_alias.or_else(|| create_sql.and_then(autoincrement_column));
        let column = generated
            .and_then(|generated| table.columns.iter_mut().find(|c| c.name == generated));
        if let Some(column) = column {
            column.sql_type = SqlType::BigInt;
            column.generated = true;
            column.nullable = false;
        }
        Ok(())
    }

    async fn load_indexes(self, runner: &mut QueryRunner, table: &mut TableSchema) -> Result<()> {
        let rows = runner
            .query(
                "SELECT l.name, l.\"unique\", l.origin, l.partial, m.sql \
                 FROM pragma_index_list(?) AS l \
                 LEFT JOIN sqlite_master AS m ON m.type = 'index' AND m.name = l.name \
                 ORDER BY l.name",
                &[Value::from(table.name.as_str())],
            )
            .await?;

        for row in &rows {
            let name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;
            let origin: String = row.try_get("origin")?;
            let partial: i64 = row.try_get("partial")?;
            let sql: Option<String> = row.try_get("sql")?;

            if origin == "pk" {
                continue;
            }
            let columns = self.index_columns(runner, &name).await?;

            match origin.as_str() {
                "u" => table.unique_keys.push(UniqueKeySchema {
                    name: naming::unique(&table.name, &columns),
                    columns,
                }),
                _ if unique != 0 && name.starts_with("UQ_") && partial == 0 => {
                    table.unique_keys.push(UniqueKeySchema { name, columns });
                }
                _ => {
                    let condition = if partial == 0 {
                        None
                    } else {
                        sql.as_deref().and_then(partial_condition)
                    };
                    table.indexes.push(IndexSchema {
                        name,
                        columns,
                        unique: unique != 0,
                        condition,
                    });
                }
            }
        }
        Ok(())
    }

    async fn index_columns(self, runner: &mut QueryRunner, index: &str) -> Result<Vec<String>> {
        let rows = runner
            .query(
                "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
                &[Value::from(index)],
            )
            .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            // Expression index columns have no name.
            if let Some(name) = row.try_get::<Option<String>, _>("name")? {
                columns.push(name);
            }
        }
        Ok(columns)
    }

    async fn load_foreign_keys(
        self,
        runner: &mut QueryRunner,
        table: &mut TableSchema,
    ) -> Result<()> {
        let rows = runner
            .query(
                "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                &[Value::from(table.name.as_str())],
            )
            .await?;

        let mut grouped: BTreeMap<i64, ForeignKeySchema> = BTreeMap::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let references: String = row.try_get("table")?;
            let from: String = row.try_get("from")?;
            let to: Option<String> = row.try_get("to")?;
            let on_update: String = row.try_get("on_update")?;
            let on_delete: String = row.try_get("on_delete")?;

            let fk = grouped.entry(id).or_insert_with(|| ForeignKeySchema {
                name: String::new(),
                columns: Vec::new(),
                references_table: references,
                references_columns: Vec::new(),
                on_delete: ForeignKeyAction::from_sql(&on_delete),
                on_update: ForeignKeyAction::from_sql(&on_update),
            });
            fk.columns.push(from);
            fk.references_columns.extend(to);
        }

        for mut fk in grouped.into_values() {
            fk.name = naming::foreign_key(&table.name, &fk.columns);
            table.foreign_keys.push(fk);
        }
        Ok(())
    }
}

/// Parses a default as reported by `pragma_table_info`.
#[must_use]
pub fn parse_default(raw: Option<&str>) -> DefaultValue {
    let Some(raw) = raw.map(str::trim) else {
        return DefaultValue::None;
    };
    if raw.eq_ignore_ascii_case("NULL") {
        return DefaultValue::Null;
    }
    if raw.eq_ignore_ascii_case("TRUE") {
        return DefaultValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("FALSE") {
        return DefaultValue::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return DefaultValue::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return DefaultValue::Float(f);
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return DefaultValue::String(raw[1..raw.len() - 1].replace("''", "'"));
    }
    if enclosed_in_parens(raw) {
        return DefaultValue::Expression(raw[1..raw.len() - 1].trim().to_string());
    }
    DefaultValue::Expression(raw.to_string())
}

/// Whether the opening parenthesis at the start closes at the very end.
fn enclosed_in_parens(text: &str) -> bool {
    if !text.starts_with('(') || !text.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn partial_condition(index_sql: &str) -> Option<String> {
    PARTIAL_CONDITION
        .captures(index_sql)
        .map(|caps| caps[1].to_string())
}

/// Finds the column declared `AUTOINCREMENT` in a `CREATE TABLE` statement.
///
/// Column definitions are split on top-level commas with quoted identifiers
/// and string literals skipped, so names containing commas, parentheses or
/// the keyword itself are handled.
#[must_use]
pub fn autoincrement_column(create_sql: &str) -> Option<String> {
    split_definitions(create_sql)
        .iter()
        .find(|definition| has_keyword(definition, "AUTOINCREMENT"))
        .and_then(|definition| leading_identifier(definition))
}

fn split_definitions(create_sql: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut started = false;
    let mut quote: Option<char> = None;
    let mut chars = create_sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if started {
                current.push(c);
            }
            if c == q {
                if q != ']' && chars.peek() == Some(&q) {
                    chars.next();
                    if started {
                        current.push(q);
                    }
                } else {
                    quote = None;
                }
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => {
                depth += 1;
                if depth == 1 && !started {
                    started = true;
                    continue;
                }
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && started {
                    parts.push(current);
                    return parts;
                }
            }
            ',' if depth == 1 && started => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        if started {
            current.push(c);
        }
    }
    parts
}

/// Whether `keyword` appears as a word outside quotes.
fn has_keyword(definition: &str, keyword: &str) -> bool {
    let mut bare = String::with_capacity(definition.len());
    let mut quote: Option<char> = None;
    for c in definition.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    bare.push(' ');
                }
                '[' => {
                    quote = Some(']');
                    bare.push(' ');
                }
                _ => bare.push(c),
            },
        }
    }
    bare.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(keyword))
}

fn leading_identifier(definition: &str) -> Option<String> {
    let definition = definition.trim_start();
    let mut chars = definition.chars();
    let first = chars.next()?;
    let close = match first {
        '"' | '`' => first,
        '[' => ']',
        _ => {
            let name: String = definition
                .chars()
                .take_while(|c| !c.is_whitespace() && *c != '(')
                .collect();
            return (!name.is_empty()).then_some(name);
        }
    };

    let mut name = String::new();
    let mut rest = chars.peekable();
    while let Some(c) = rest.next() {
        if c == close {
            if close != ']' && rest.peek() == Some(&close) {
                rest.next();
                name.push(close);
                continue;
            }
            return Some(name);
        }
        name.push(c);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    #[test]
    fn test_parse_default() {
        assert_eq!(parse_default(None), DefaultValue::None);
        assert_eq!(parse_default(Some("NULL")), DefaultValue::Null);
        assert_eq!(parse_default(Some("-3")), DefaultValue::Integer(-3));
        assert_eq!(parse_default(Some("1.5")), DefaultValue::Float(1.5));
        assert_eq!(
            parse_default(Some("'it''s'")),
            DefaultValue::String("it's".into())
        );
        assert_eq!(
            parse_default(Some("(datetime('now'))")),
            DefaultValue::Expression("datetime('now')".into())
        );
        assert_eq!(
            parse_default(Some("CURRENT_TIMESTAMP")),
            DefaultValue::Expression("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(
            parse_default(Some("(1) + (2)")),
            DefaultValue::Expression("(1) + (2)".into())
        );
    }

    #[test]
    fn test_autoincrement_scan_is_quote_aware() {
        let sql = r#"CREATE TABLE "we,ird" (
            "note" TEXT DEFAULT 'AUTOINCREMENT, maybe',
            "a,b" INTEGER PRIMARY KEY AUTOINCREMENT,
            "c" TEXT
        )"#;
        assert_eq!(autoincrement_column(sql), Some("a,b".to_string()));

        let sql = r#"CREATE TABLE t ([odd "name"] INTEGER PRIMARY KEY AUTOINCREMENT)"#;
        assert_eq!(autoincrement_column(sql), Some(r#"odd "name""#.to_string()));

        let sql = r#"CREATE TABLE t ("x""y" INTEGER PRIMARY KEY AUTOINCREMENT)"#;
        assert_eq!(autoincrement_column(sql), Some(r#"x"y"#.to_string()));

        assert_eq!(autoincrement_column("CREATE TABLE t (id INTEGER PRIMARY KEY)"), None);
    }

    #[tokio::test]
    async fn test_load_table() {
        let pool = create_test_pool().await;
        let mut runner = QueryRunner::connect(&pool).await.unwrap();
        runner
            .execute(
                "CREATE TABLE \"user\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT)",
                &[],
            )
            .await
            .unwrap();
        runner
            .execute(
                "CREATE TABLE \"post\" (\n  \
                 \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
                 \"title\" VARCHAR(255) NOT NULL,\n  \
                 \"likes\" BIGINT NOT NULL DEFAULT 0,\n  \
                 \"price\" DECIMAL(10,2),\n  \
                 \"author_id\" BIGINT,\n  \
                 CONSTRAINT \"FK_post_author_id\" FOREIGN KEY (\"author_id\") \
                 REFERENCES \"user\" (\"id\") ON DELETE SET NULL ON UPDATE NO ACTION\n)",
                &[],
            )
            .await
            .unwrap();
        runner
            .execute("CREATE UNIQUE INDEX \"UQ_post_title\" ON \"post\" (\"title\")", &[])
            .await
            .unwrap();
        runner
            .execute(
                "CREATE INDEX \"IDX_post_likes\" ON \"post\" (\"likes\") WHERE likes > 0",
                &[],
            )
            .await
            .unwrap();

        let introspector = SqliteIntrospector::new();
        let tables = introspector.list_tables(&mut runner).await.unwrap();
        assert_eq!(tables, vec!["post".to_string(), "user".to_string()]);

        let post = introspector
            .load_table(&mut runner, "post")
            .await
            .unwrap()
            .unwrap();
        let id = post.get_column("id").unwrap();
        assert!(id.generated);
        assert!(!id.nullable);
        assert_eq!(id.sql_type, SqlType::BigInt);
        assert_eq!(post.primary_key.columns, vec!["id"]);

        let title = post.get_column("title").unwrap();
        assert_eq!(title.sql_type, SqlType::Varchar(255));
        assert!(!title.nullable);
        assert_eq!(
            post.get_column("likes").unwrap().default,
            DefaultValue::Integer(0)
        );
        assert_eq!(
            post.get_column("price").unwrap().sql_type,
            SqlType::Decimal(10, 2)
        );

        assert_eq!(post.unique_keys.len(), 1);
        assert_eq!(post.unique_keys[0].name, "UQ_post_title");
        assert_eq!(post.indexes.len(), 1);
        assert_eq!(post.indexes[0].condition.as_deref(), Some("likes > 0"));

        assert_eq!(post.foreign_keys.len(), 1);
        let fk = &post.foreign_keys[0];
        assert_eq!(fk.name, "FK_post_author_id");
        assert_eq!(fk.references_table, "user");
        assert_eq!(fk.references_columns, vec!["id"]);
        assert_eq!(fk.on_delete, ForeignKeyAction::SetNull);

        assert!(
            introspector
                .load_table(&mut runner, "missing")
                .await
                .unwrap()
                .is_none()
        );
        runner.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_composite_key_is_not_generated() {
        let pool = create_test_pool().await;
        let mut runner = QueryRunner::connect(&pool).await.unwrap();
        runner
            .execute(
                "CREATE TABLE link (a INTEGER NOT NULL, b INTEGER NOT NULL, \
                 CONSTRAINT \"PK_link\" PRIMARY KEY (a, b))",
                &[],
            )
            .await
            .unwrap();
        let link = SqliteIntrospector::new()
            .load_table(&mut runner, "link")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.primary_key.columns, vec!["a", "b"]);
        assert!(link.columns.iter().all(|c| !c.generated && !c.nullable));
        assert_eq!(link.columns[0].sql_type, SqlType::Integer);
        assert!(link.indexes.is_empty());
        assert!(link.unique_keys.is_empty());
        runner.release().await.unwrap();
    }
}
