//! End-to-end synchronization tests against a file-backed SQLite database.
//!
//! Each test builds entity metadata, synchronizes, changes the metadata and
//! synchronizes again, then checks both the rows and the introspected schema.

use std::sync::Arc;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use strata_core::{
    ColumnMetadata, ColumnType, DefaultValue, EntityMetadata, MetadataStore, QueryRunner,
    RelationMetadata,
};
use strata_sync::prelude::*;
use tempfile::TempDir;

async fn create_file_pool(dir: &TempDir) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("sync.sqlite3"))
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .expect("Failed to create SQLite pool")
}

fn synchronizer(pool: &SqlitePool, metadata: MetadataStore) -> SchemaSynchronizer<SqliteDialect> {
    SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), Arc::new(metadata))
}

fn item_v1() -> MetadataStore {
    MetadataStore::builder()
        .entity(
            EntityMetadata::new("Item", "item")
                .column(ColumnMetadata::generated_id("id"))
                .column(ColumnMetadata::new("a", ColumnType::Int))
                .column(ColumnMetadata::new("b", ColumnType::Text).nullable()),
        )
        .build()
        .unwrap()
}

fn item_v2() -> MetadataStore {
    MetadataStore::builder()
        .entity(
            EntityMetadata::new("Item", "item")
                .column(ColumnMetadata::generated_id("id"))
                .column(ColumnMetadata::new("a", ColumnType::Int))
                .column(ColumnMetadata::new("c", ColumnType::Int).default(DefaultValue::Integer(0))),
        )
        .build()
        .unwrap()
}

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    let mut runner = QueryRunner::connect(pool).await.unwrap();
    let names = SqliteIntrospector::new()
        .list_tables(&mut runner)
        .await
        .unwrap();
    runner.release().await.unwrap();
    names
}

#[tokio::test]
async fn test_recreation_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;

    synchronizer(&pool, item_v1()).synchronize().await.unwrap();
    sqlx::query("INSERT INTO item (a, b) VALUES (10, 'x'), (20, 'y')")
        .execute(&pool)
        .await
        .unwrap();

    let plan = synchronizer(&pool, item_v2()).synchronize().await.unwrap();
    let item = plan.table("item").unwrap();
    assert!(matches!(item.action, TableAction::Recreate { .. }));

    let rows = sqlx::query("SELECT id, a, c FROM item ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    let values: Vec<(i64, i64, i64)> = rows
        .iter()
        .map(|r| (r.get(0), r.get(1), r.get(2)))
        .collect();
    assert_eq!(values, vec![(1, 10, 0), (2, 20, 0)]);

    let mut runner = QueryRunner::connect(&pool).await.unwrap();
    let table = SqliteIntrospector::new()
        .load_table(&mut runner, "item")
        .await
        .unwrap()
        .unwrap();
    runner.release().await.unwrap();
    let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "a", "c"]);
    assert!(table.get_column("id").unwrap().generated);
    assert_eq!(table_names(&pool).await, vec!["item".to_string()]);

    // The identifier sequence survives the rebuild.
    sqlx::query("INSERT INTO item (a) VALUES (30)")
        .execute(&pool)
        .await
        .unwrap();
    let id: i64 = sqlx::query("SELECT MAX(id) FROM item")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(id, 3);

    let again = synchronizer(&pool, item_v2()).synchronize().await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_tree_and_junction_tables_are_stable() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;
    let metadata = || {
        MetadataStore::builder()
            .entity(
                EntityMetadata::new("Category", "category")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("name", ColumnType::String).unique())
                    .column(
                        ColumnMetadata::new("level", ColumnType::Int)
                            .default(DefaultValue::Integer(0)),
                    )
                    .relation(RelationMetadata::many_to_one("parent", "Category"))
                    .closure_tree("parent", Some("level")),
            )
            .entity(
                EntityMetadata::new("Post", "post")
                    .column(ColumnMetadata::generated_id("id"))
                    .column(ColumnMetadata::new("title", ColumnType::String))
                    .relation(RelationMetadata::many_to_many("categories", "Category").owner())
                    .index(&["title"], false),
            )
            .build()
            .unwrap()
    };

    let first = synchronizer(&pool, metadata()).synchronize().await.unwrap();
    let created: Vec<&str> = first.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(
        created,
        vec!["category", "post", "post_categories_category", "category_closure"]
    );

    let mut names = table_names(&pool).await;
    names.sort();
    assert_eq!(
        names,
        vec![
            "category".to_string(),
            "category_closure".to_string(),
            "post".to_string(),
            "post_categories_category".to_string(),
        ]
    );

    let second = synchronizer(&pool, metadata()).synchronize().await.unwrap();
    assert!(second.is_empty(), "unexpected plan: {second:?}");
}

#[tokio::test]
async fn test_orphan_with_original_is_dropped() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;
    for sql in [
        "CREATE TABLE \"user\" (\"id\" INTEGER PRIMARY KEY)",
        "CREATE TABLE \"temporary_user\" (\"id\" INTEGER PRIMARY KEY)",
        "INSERT INTO \"user\" (\"id\") VALUES (7)",
    ] {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }

    let sync = synchronizer(&pool, MetadataStore::default());
    let mut runner = QueryRunner::connect(&pool).await.unwrap();
    let cleaned = sync.cleanup_orphans(&mut runner).await.unwrap();
    runner.release().await.unwrap();

    assert_eq!(cleaned, vec!["temporary_user".to_string()]);
    assert_eq!(table_names(&pool).await, vec!["user".to_string()]);
    let id: i64 = sqlx::query("SELECT id FROM \"user\"")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(id, 7);
}

#[tokio::test]
async fn test_orphan_without_original_is_restored() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;
    for sql in [
        "CREATE TABLE \"temporary_audit\" (\"id\" INTEGER PRIMARY KEY, \"note\" TEXT)",
        "INSERT INTO \"temporary_audit\" (\"id\", \"note\") VALUES (1, 'kept')",
    ] {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }

    let sync = synchronizer(&pool, MetadataStore::default());
    let mut runner = QueryRunner::connect(&pool).await.unwrap();
    let cleaned = sync.cleanup_orphans(&mut runner).await.unwrap();
    runner.release().await.unwrap();

    assert_eq!(cleaned, vec!["temporary_audit".to_string()]);
    assert_eq!(table_names(&pool).await, vec!["audit".to_string()]);
    let note: String = sqlx::query("SELECT note FROM audit")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(note, "kept");
}

#[tokio::test]
async fn test_synchronize_cleans_orphans_first() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;

    synchronizer(&pool, item_v1()).synchronize().await.unwrap();
    sqlx::query("CREATE TABLE \"temporary_item\" (\"id\" INTEGER PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();

    let plan = synchronizer(&pool, item_v1()).synchronize().await.unwrap();
    assert!(plan.is_empty());
    assert_eq!(table_names(&pool).await, vec!["item".to_string()]);
}

#[tokio::test]
async fn test_custom_temp_prefix() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;
    synchronizer(&pool, item_v1()).synchronize().await.unwrap();

    let sync = synchronizer(&pool, item_v2())
        .with_options(SyncOptions::new().temp_table_prefix("_rebuild_"));
    let plan = sync.synchronize().await.unwrap();
    let statements = plan
        .statements(sync.dialect(), &sync.options().temp_table_prefix)
        .unwrap();
    assert!(statements.iter().any(|s| s.contains("\"_rebuild_item\"")));
    assert_eq!(table_names(&pool).await, vec!["item".to_string()]);
}

#[tokio::test]
async fn test_table_with_reserved_prefix_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pool = create_file_pool(&dir).await;
    for sql in [
        "CREATE TABLE \"sessions\" (\"id\" INTEGER PRIMARY KEY)",
        "CREATE TABLE \"temporary_sessions\" (\"id\" INTEGER PRIMARY KEY)",
        "INSERT INTO \"temporary_sessions\" (\"id\") VALUES (3)",
    ] {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    let metadata = || {
        MetadataStore::builder()
            .entity(
                EntityMetadata::new("Session", "temporary_sessions")
                    .column(ColumnMetadata::generated_id("id")),
            )
            .build()
            .unwrap()
    };

    let err = synchronizer(&pool, metadata()).synchronize().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)), "unexpected error: {err}");
    assert!(synchronizer(&pool, metadata()).desired_tables().is_err());

    // The mapped table was neither dropped nor taken for an orphan.
    assert_eq!(
        table_names(&pool).await,
        vec!["sessions".to_string(), "temporary_sessions".to_string()]
    );
    let id: i64 = sqlx::query("SELECT id FROM \"temporary_sessions\"")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(id, 3);

    // Under another prefix the same table is an ordinary one.
    synchronizer(&pool, metadata())
        .with_options(SyncOptions::new().temp_table_prefix("_rebuild_"))
        .synchronize()
        .await
        .unwrap();
    let rows: i64 = sqlx::query("SELECT COUNT(*) FROM \"temporary_sessions\" WHERE id = 3")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(rows, 1);
}
