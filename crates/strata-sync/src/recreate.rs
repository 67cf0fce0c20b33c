//! Table recreation.
//!
//! Applies changes an engine cannot make in place by rebuilding the table:
//!
//! 1. `CREATE TABLE <temp>` with the final columns, foreign keys and primary key
//! 2. `INSERT INTO <temp> (...) SELECT ... FROM <original>` for the columns
//!    the live and final tables share, in final order
//! 3. `DROP TABLE <original>`
//! 4. `ALTER TABLE <temp> RENAME TO <original>`
//! 5. re-create the final indexes and unique indexes
//!
//! All steps run in one transaction. Foreign-key enforcement is switched off
//! around that transaction, since the engine ignores the switch inside one.
//! If the engine does not roll DDL back, a failure can leave `<temp>` behind;
//! [`SchemaSynchronizer::cleanup_orphans`](crate::SchemaSynchronizer::cleanup_orphans)
//! removes it on the next run.

use strata_core::{QueryRunner, naming};
use tracing::{debug, info, warn};

use crate::dialect::MigrationDialect;
use crate::error::Result;
use crate::operations::SchemaChange;
use crate::schema::TableSchema;

/// A planned rebuild of one table.
#[derive(Debug)]
pub struct TableRecreation<'a, D: MigrationDialect> {
    dialect: &'a D,
    live: &'a TableSchema,
    target: &'a TableSchema,
    temp_name: String,
}

impl<'a, D: MigrationDialect> TableRecreation<'a, D> {
    /// Plans the rebuild of `live` into `target`.
    #[must_use]
    pub fn new(
        dialect: &'a D,
        live: &'a TableSchema,
        target: &'a TableSchema,
        temp_prefix: &str,
    ) -> Self {
        Self {
            dialect,
            live,
            target,
            temp_name: naming::temporary_table(temp_prefix, &target.name),
        }
    }

    /// Name of the scratch table.
    #[must_use]
    pub fn temp_name(&self) -> &str {
        &self.temp_name
    }

    /// Columns carried over from the live table, in final order.
    #[must_use]
    pub fn copied_columns(&self) -> Vec<&str> {
        self.target
            .columns
            .iter()
            .filter(|c| self.live.get_column(&c.name).is_some())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// The statements of the rebuild, in execution order.
    pub fn statements(&self) -> Result<Vec<String>> {
        let d = self.dialect;
        let original = &self.target.name;
        let scratch = TableSchema {
            name: self.temp_name.clone(),
            ..self.target.clone()
        };

        let mut statements = vec![d.create_table_sql(&scratch)?];

        let copied = self
            .copied_columns()
            .into_iter()
            .map(|c| d.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        if !copied.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({copied}) SELECT {copied} FROM {}",
                d.quote_identifier(&self.temp_name),
                d.quote_identifier(original)
            ));
        }

        statements.push(d.drop_table_sql(original));
        statements.push(d.rename_table_sql(&self.temp_name, original));

        for unique in &self.target.unique_keys {
            statements.extend(d.generate_sql(&SchemaChange::AddUnique {
                table: original.clone(),
                unique: unique.clone(),
            })?);
        }
        for index in &self.target.indexes {
            statements.extend(d.generate_sql(&SchemaChange::CreateIndex {
                table: original.clone(),
                index: index.clone(),
            })?);
        }
        Ok(statements)
    }

    /// Runs the rebuild in one transaction on `runner`.
    pub async fn execute(&self, runner: &mut QueryRunner) -> Result<()> {
        let statements = self.statements()?;
        info!(
            table = %self.target.name,
            temp = %self.temp_name,
            columns = self.copied_columns().len(),
            "Recreating table"
        );

        if let Some(pragma) = self.dialect.disable_foreign_keys() {
            runner.execute(pragma, &[]).await?;
        }

        let result = self.run_in_transaction(runner, &statements).await;

        if let Some(pragma) = self.dialect.enable_foreign_keys() {
            if let Err(err) = runner.execute(pragma, &[]).await {
                warn!(error = %err, "Could not re-enable foreign keys");
                if result.is_ok() {
                    return Err(err.into());
                }
            }
        }
        result
    }

    async fn run_in_transaction(
        &self,
        runner: &mut QueryRunner,
        statements: &[String],
    ) -> Result<()> {
        runner.begin_transaction().await?;
        for sql in statements {
            debug!(table = %self.target.name, sql = %sql, "Recreation step");
            if let Err(err) = runner.execute(sql, &[]).await {
                warn!(table = %self.target.name, "Recreation failed, rolling back");
                if let Err(rollback) = runner.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(err.into());
            }
        }
        runner.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::introspect::SqliteIntrospector;
    use crate::schema::{ColumnSchema, DefaultValue, IndexSchema, SqlType};
    use sqlx::Row;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn live() -> TableSchema {
        TableSchema::new("t")
            .column(ColumnSchema::new("a", SqlType::BigInt))
            .column(ColumnSchema::new("b", SqlType::Text))
    }

    fn target() -> TableSchema {
        TableSchema::new("t")
            .column(ColumnSchema::new("a", SqlType::BigInt))
            .column(
                ColumnSchema::new("c", SqlType::BigInt)
                    .not_null()
                    .default(DefaultValue::Integer(0)),
            )
            .index(IndexSchema {
                name: "IDX_t_c".into(),
                columns: vec!["c".into()],
                unique: false,
                condition: None,
            })
    }

    #[test]
    fn test_statements() {
        let dialect = SqliteDialect::new();
        let (live, target) = (live(), target());
        let recreation = TableRecreation::new(&dialect, &live, &target, "temporary_");
        assert_eq!(recreation.temp_name(), "temporary_t");
        assert_eq!(recreation.copied_columns(), vec!["a"]);

        let statements = recreation.statements().unwrap();
        assert_eq!(statements.len(), 5);
        assert!(statements[0].starts_with("CREATE TABLE \"temporary_t\""));
        assert_eq!(
            statements[1],
            "INSERT INTO \"temporary_t\" (\"a\") SELECT \"a\" FROM \"t\""
        );
        assert_eq!(statements[2], "DROP TABLE \"t\"");
        assert_eq!(statements[3], "ALTER TABLE \"temporary_t\" RENAME TO \"t\"");
        assert_eq!(statements[4], "CREATE INDEX \"IDX_t_c\" ON \"t\" (\"c\")");
    }

    #[tokio::test]
    async fn test_execute_preserves_rows() {
        let pool = create_test_pool().await;
        let mut runner = QueryRunner::connect(&pool).await.unwrap();
        runner
            .execute("CREATE TABLE \"t\" (\"a\" BIGINT, \"b\" TEXT)", &[])
            .await
            .unwrap();
        runner
            .execute("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')", &[])
            .await
            .unwrap();

        let dialect = SqliteDialect::new();
        let (live, target) = (live(), target());
        TableRecreation::new(&dialect, &live, &target, "temporary_")
            .execute(&mut runner)
            .await
            .unwrap();

        let rows = runner
            .query("SELECT a, c FROM t ORDER BY a", &[])
            .await
            .unwrap();
        let values: Vec<(i64, i64)> = rows.iter().map(|r| (r.get(0), r.get(1))).collect();
        assert_eq!(values, vec![(1, 0), (2, 0)]);

        let table = SqliteIntrospector::new()
            .load_table(&mut runner, "t")
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(table.indexes[0].name, "IDX_t_c");
        assert!(!runner.is_transaction_active());
        runner.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let pool = create_test_pool().await;
        let mut runner = QueryRunner::connect(&pool).await.unwrap();
        runner
            .execute("CREATE TABLE \"t\" (\"a\" BIGINT, \"b\" TEXT)", &[])
            .await
            .unwrap();
        runner
            .execute("INSERT INTO t (a, b) VALUES (NULL, 'x')", &[])
            .await
            .unwrap();

        let dialect = SqliteDialect::new();
        let live = live();
        let target = TableSchema::new("t").column(ColumnSchema::new("a", SqlType::BigInt).not_null());
        let result = TableRecreation::new(&dialect, &live, &target, "temporary_")
            .execute(&mut runner)
            .await;
        assert!(result.is_err());
        assert!(!runner.is_transaction_active());

        let tables = SqliteIntrospector::new()
            .list_tables(&mut runner)
            .await
            .unwrap();
        assert_eq!(tables, vec!["t".to_string()]);
        let rows = runner.query("SELECT b FROM t", &[]).await.unwrap();
        let b: String = rows[0].get(0);
        assert_eq!(b, "x");
        runner.release().await.unwrap();
    }
}
