//! Schema synchronizer.
//!
//! Compares the tables every registered entity expects with the tables the
//! database holds and reconciles them. Each table gets one [`TablePlan`]:
//! created, dropped, altered in place, or rebuilt through
//! [`TableRecreation`] when the dialect cannot apply one of its changes
//! natively. Each table is applied in its own transaction.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use strata_core::{MetadataStore, QueryRunner};
use tracing::{debug, info, warn};

use crate::diff::{creation_order, diff_table};
use crate::dialect::MigrationDialect;
use crate::error::{Result, SyncError};
use crate::introspect::SqliteIntrospector;
use crate::operations::{SchemaChange, final_table};
use crate::recreate::TableRecreation;
use crate::schema::TableSchema;

/// Default prefix of the scratch tables used by table recreation.
pub const DEFAULT_TEMP_TABLE_PREFIX: &str = "temporary_";

/// Options for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Prefix reserved for recreation scratch tables.
    pub temp_table_prefix: String,
    /// Whether live tables without metadata are dropped.
    pub drop_unknown_tables: bool,
    /// Whether to stop after planning.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            temp_table_prefix: DEFAULT_TEMP_TABLE_PREFIX.to_string(),
            drop_unknown_tables: false,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scratch table prefix.
    #[must_use]
    pub fn temp_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_table_prefix = prefix.into();
        self
    }

    /// Drops live tables that no entity maps to.
    #[must_use]
    pub const fn drop_unknown_tables(mut self) -> Self {
        self.drop_unknown_tables = true;
        self
    }

    /// Plans without executing.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// How a table is reconciled.
#[derive(Debug, Clone, PartialEq)]
pub enum TableAction {
    /// The table does not exist yet.
    Create,
    /// The table has no entity and is dropped.
    Drop,
    /// Every change is applied in place.
    Alter,
    /// At least one change needs the table rebuilt.
    Recreate {
        /// The table as it exists.
        live: TableSchema,
        /// The table the changes end with.
        target: TableSchema,
    },
}

/// The reconciliation of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    /// Table name.
    pub table: String,
    /// How the changes are applied.
    pub action: TableAction,
    /// The changes, in application order.
    pub changes: Vec<SchemaChange>,
}

impl TablePlan {
    /// SQL statements this plan executes.
    pub fn statements<D: MigrationDialect>(
        &self,
        dialect: &D,
        temp_prefix: &str,
    ) -> Result<Vec<String>> {
        match &self.action {
            TableAction::Recreate { live, target } => {
                let mut statements = Vec::new();
                statements.extend(dialect.disable_foreign_keys().map(str::to_string));
                let recreation = TableRecreation::new(dialect, live, target, temp_prefix);
                statements.extend(recreation.statements()?);
                statements.extend(dialect.enable_foreign_keys().map(str::to_string));
                Ok(statements)
            }
            _ => {
                let mut statements = Vec::new();
                for change in &self.changes {
                    statements.extend(dialect.generate_sql(change)?);
                }
                Ok(statements)
            }
        }
    }
}

/// An ordered set of table plans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Table plans in execution order.
    pub tables: Vec<TablePlan>,
}

impl SyncPlan {
    /// Returns true when the database already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Looks up the plan of a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Every statement of the plan, in execution order.
    pub fn statements<D: MigrationDialect>(
        &self,
        dialect: &D,
        temp_prefix: &str,
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for table in &self.tables {
            statements.extend(table.statements(dialect, temp_prefix)?);
        }
        Ok(statements)
    }
}

/// Keeps a database schema synchronized with entity metadata.
#[derive(Debug)]
pub struct SchemaSynchronizer<D: MigrationDialect> {
    pool: SqlitePool,
    dialect: D,
    metadata: Arc<MetadataStore>,
    options: SyncOptions,
    introspector: SqliteIntrospector,
}

impl<D: MigrationDialect> SchemaSynchronizer<D> {
    /// Creates a synchronizer with default options.
    #[must_use]
    pub fn new(pool: SqlitePool, dialect: D, metadata: Arc<MetadataStore>) -> Self {
        Self {
            pool,
            dialect,
            metadata,
            options: SyncOptions::default(),
            introspector: SqliteIntrospector::new(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Returns the dialect.
    #[must_use]
    pub const fn dialect(&self) -> &D {
        &self.dialect
    }

    /// The tables the registered entities expect.
    ///
    /// Fails when a table name starts with the scratch-table prefix, since
    /// such a table would be hidden from introspection and taken for an
    /// orphan.
    pub fn desired_tables(&self) -> Result<Vec<TableSchema>> {
        self.check_reserved_names()?;
        self.metadata
            .entities()
            .map(|entity| TableSchema::from_entity(entity, &self.metadata))
            .collect()
    }

    fn check_reserved_names(&self) -> Result<()> {
        let prefix = &self.options.temp_table_prefix;
        match self.metadata.entities().find(|e| e.table.starts_with(prefix.as_str())) {
            Some(entity) => Err(SyncError::InvalidState(format!(
                "table '{}' of entity '{}' uses the reserved prefix '{prefix}'",
                entity.table, entity.target
            ))),
            None => Ok(()),
        }
    }

    /// Computes the plan that turns `live` into the desired tables.
    pub fn plan(&self, live: &[TableSchema]) -> Result<SyncPlan> {
        let desired = self.desired_tables()?;
        let live_by_name: HashMap<&str, &TableSchema> =
            live.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut plan = SyncPlan::default();

        for table in creation_order(&desired) {
            let Some(existing) = live_by_name.get(table.name.as_str()) else {
                plan.tables.push(create_plan(table));
                continue;
            };
            let mut changes = diff_table(existing, table);
            if changes.is_empty() {
                continue;
            }
            changes.sort_by_key(SchemaChange::apply_order);

            let action = if changes.iter().all(|c| self.dialect.supports_natively(c)) {
                TableAction::Alter
            } else {
                TableAction::Recreate {
                    live: (*existing).clone(),
                    target: final_table(existing, &changes)?,
                }
            };
            plan.tables.push(TablePlan {
                table: table.name.clone(),
                action,
                changes,
            });
        }

        if self.options.drop_unknown_tables {
            for table in live.iter().rev() {
                let known = desired.iter().any(|d| d.name == table.name);
                if !known && !table.name.starts_with(&self.options.temp_table_prefix) {
                    plan.tables.push(TablePlan {
                        table: table.name.clone(),
                        action: TableAction::Drop,
                        changes: vec![SchemaChange::DropTable {
                            name: table.name.clone(),
                        }],
                    });
                }
            }
        }

        for table in &plan.tables {
            for change in &table.changes {
                info!(table = %table.table, change = %change.description(), "Planned change");
            }
        }
        Ok(plan)
    }

    /// Reads the live tables, skipping recreation scratch tables.
    pub async fn introspect(&self, runner: &mut QueryRunner) -> Result<Vec<TableSchema>> {
        let names: Vec<String> = self
            .introspector
            .list_tables(runner)
            .await?
            .into_iter()
            .filter(|name| !name.starts_with(&self.options.temp_table_prefix))
            .collect();
        self.introspector.load_tables(runner, &names).await
    }

    /// Removes scratch tables left behind by an interrupted recreation.
    ///
    /// A scratch table whose original still exists is dropped. One whose
    /// original is gone is renamed back, since the drop had committed and
    /// the rename had not. Returns the scratch tables handled.
    pub async fn cleanup_orphans(&self, runner: &mut QueryRunner) -> Result<Vec<String>> {
        let prefix = &self.options.temp_table_prefix;
        let mut cleaned = Vec::new();
        for name in self.introspector.list_tables(runner).await? {
            let Some(original) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if original.is_empty() {
                continue;
            }
            if self.introspector.table_exists(runner, original).await? {
                warn!(table = %name, original = %original, "Dropping orphaned temporary table");
                runner
                    .execute(&self.dialect.drop_table_sql(&name), &[])
                    .await?;
            } else {
                warn!(table = %name, original = %original, "Restoring orphaned temporary table");
                runner
                    .execute(&self.dialect.rename_table_sql(&name, original), &[])
                    .await?;
            }
            cleaned.push(name);
        }
        Ok(cleaned)
    }

    /// Cleans up orphans, introspects, plans and applies the plan.
    ///
    /// Returns the plan that was applied, or only computed on a dry run.
    pub async fn synchronize(&self) -> Result<SyncPlan> {
        let mut runner = QueryRunner::connect(&self.pool).await?;
        let result = self.synchronize_with(&mut runner).await;
        let released = runner.release().await;
        let plan = result?;
        released?;
        Ok(plan)
    }

    async fn synchronize_with(&self, runner: &mut QueryRunner) -> Result<SyncPlan> {
        self.check_reserved_names()?;
        if !self.options.dry_run {
            self.cleanup_orphans(runner).await?;
        }
        let live = self.introspect(runner).await?;
        let plan = self.plan(&live)?;

        if plan.is_empty() {
            info!("Schema is up to date");
            return Ok(plan);
        }
        if self.options.dry_run {
            info!(tables = plan.tables.len(), "Dry run, nothing applied");
            return Ok(plan);
        }

        for table in &plan.tables {
            self.apply(runner, table).await?;
        }
        info!(tables = plan.tables.len(), "Schema synchronized");
        Ok(plan)
    }

    async fn apply(&self, runner: &mut QueryRunner, table: &TablePlan) -> Result<()> {
        if let TableAction::Recreate { live, target } = &table.action {
            return TableRecreation::new(
                &self.dialect,
                live,
                target,
                &self.options.temp_table_prefix,
            )
            .execute(runner)
            .await;
        }

        let statements = table.statements(&self.dialect, &self.options.temp_table_prefix)?;
        runner.begin_transaction().await?;
        for sql in &statements {
            debug!(table = %table.table, sql = %sql, "Executing SQL");
            if let Err(err) = runner.execute(sql, &[]).await {
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

fn create_plan(table: &TableSchema) -> TablePlan {
    let mut changes = vec![SchemaChange::CreateTable(table.clone())];
    changes.extend(table.unique_keys.iter().map(|unique| SchemaChange::AddUnique {
        table: table.name.clone(),
        unique: unique.clone(),
    }));
    changes.extend(table.indexes.iter().map(|index| SchemaChange::CreateIndex {
        table: table.name.clone(),
        index: index.clone(),
    }));
    TablePlan {
        table: table.name.clone(),
        action: TableAction::Create,
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::schema::{ColumnSchema, SqlType};
    use sqlx::sqlite::SqlitePoolOptions;
    use strata_core::{
        Cascade, ColumnMetadata, ColumnType, DefaultValue, EntityMetadata, RelationMetadata,
    };

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn blog() -> Arc<MetadataStore> {
        let store = MetadataStore::builder()
            .entity(
                EntityMetadata::new("User", "user")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("name", ColumnType::String).length(100)),
            )
            .entity(
                EntityMetadata::new("Post", "post")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("title", ColumnType::String))
                    .column(
                        ColumnMetadata::new("likes", ColumnType::Int)
                            .default(DefaultValue::Integer(0)),
                    )
                    .relation(
                        RelationMetadata::many_to_one("author", "User")
                            .cascade(Cascade::insert_update()),
                    )
                    .relation(RelationMetadata::many_to_many("tags", "Tag").owner())
                    .index(&["title"], false),
            )
            .entity(
                EntityMetadata::new("Tag", "tag")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("label", ColumnType::String).unique()),
            )
            .build()
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_plan_creates_in_reference_order() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool, SqliteDialect::new(), blog());
        let plan = sync.plan(&[]).unwrap();
        let order: Vec<&str> = plan.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(order, vec!["user", "post", "tag", "post_tags_tag"]);
        assert!(plan.tables.iter().all(|t| t.action == TableAction::Create));

        let post = plan.table("post").unwrap();
        assert!(matches!(post.changes[1], SchemaChange::CreateIndex { .. }));
        let tag = plan.table("tag").unwrap();
        assert!(matches!(tag.changes[1], SchemaChange::AddUnique { .. }));
    }

    #[tokio::test]
    async fn test_synchronize_is_idempotent() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), blog());
        let first = sync.synchronize().await.unwrap();
        assert_eq!(first.tables.len(), 4);

        let second = sync.synchronize().await.unwrap();
        assert!(second.is_empty(), "unexpected plan: {second:?}");
    }

    #[tokio::test]
    async fn test_unsupported_change_routes_to_recreation() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool, SqliteDialect::new(), blog());
        let mut live = sync.desired_tables().unwrap();
        let user = live.iter_mut().find(|t| t.name == "user").unwrap();
        user.columns[1] = ColumnSchema::new("name", SqlType::Text);
        user.columns.push(ColumnSchema::new("legacy", SqlType::Text));

        let plan = sync.plan(&live).unwrap();
        assert_eq!(plan.tables.len(), 1);
        let TableAction::Recreate { target, .. } = &plan.tables[0].action else {
            panic!("expected recreation, got {:?}", plan.tables[0].action);
        };
        let names: Vec<&str> = target.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(target.columns[1].sql_type, SqlType::Varchar(100));
    }

    #[tokio::test]
    async fn test_native_dialect_alters_in_place() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool, PostgresDialect::new(), blog());
        let mut live = sync.desired_tables().unwrap();
        let user = live.iter_mut().find(|t| t.name == "user").unwrap();
        user.columns.push(ColumnSchema::new("legacy", SqlType::Text));

        let plan = sync.plan(&live).unwrap();
        assert_eq!(plan.tables[0].action, TableAction::Alter);
        let statements = plan.statements(sync.dialect(), "temporary_").unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE \"user\" DROP COLUMN \"legacy\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_foreign_key_forces_recreation() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool, SqliteDialect::new(), blog());
        let mut live = sync.desired_tables().unwrap();
        let post = live.iter_mut().find(|t| t.name == "post").unwrap();
        post.columns.retain(|c| c.name != "author_id");
        post.foreign_keys.clear();

        let plan = sync.plan(&live).unwrap();
        // The column alone could be added, the foreign key cannot.
        assert!(matches!(plan.tables[0].action, TableAction::Recreate { .. }));
        assert_eq!(plan.tables[0].changes.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tables_are_kept_unless_requested() {
        let pool = create_test_pool().await;
        let live = vec![TableSchema::new("audit").column(ColumnSchema::new("x", SqlType::Text))];

        let sync = SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), blog());
        let mut desired = sync.desired_tables().unwrap();
        desired.extend(live.clone());
        assert!(sync.plan(&desired).unwrap().is_empty());

        let sync = SchemaSynchronizer::new(pool, SqliteDialect::new(), blog())
            .with_options(SyncOptions::new().drop_unknown_tables());
        let plan = sync.plan(&desired).unwrap();
        assert_eq!(plan.tables.len(), 1);
        assert_eq!(plan.tables[0].action, TableAction::Drop);
    }

    #[tokio::test]
    async fn test_dry_run_applies_nothing() {
        let pool = create_test_pool().await;
        let sync = SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), blog())
            .with_options(SyncOptions::new().dry_run());
        let plan = sync.synchronize().await.unwrap();
        assert_eq!(plan.tables.len(), 4);

        let mut runner = QueryRunner::connect(&pool).await.unwrap();
        let tables = SqliteIntrospector::new()
            .list_tables(&mut runner)
            .await
            .unwrap();
        assert!(tables.is_empty());
        runner.release().await.unwrap();
    }
}
