//! strata-sync CLI
//!
//! Command-line tool for synchronizing a SQLite schema with entity metadata.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use strata_core::{EntityMetadata, MetadataStore, QueryRunner};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use strata_sync::DEFAULT_TEMP_TABLE_PREFIX;
use strata_sync::prelude::*;

/// Keeps a database schema synchronized with entity metadata.
#[derive(Parser)]
#[command(name = "strata-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// JSON file holding the list of entity declarations.
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Prefix of the scratch tables used by table recreation.
    #[arg(long, default_value = DEFAULT_TEMP_TABLE_PREFIX)]
    temp_prefix: String,

    /// Drop live tables that no entity maps to.
    #[arg(long)]
    drop_unknown: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database schema in line with the entities.
    Sync {
        /// Plan without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the SQL a sync would run.
    Plan,

    /// Remove scratch tables left by an interrupted recreation.
    Cleanup,
}

fn load_metadata(path: Option<&PathBuf>) -> anyhow::Result<MetadataStore> {
    let Some(path) = path else {
        return Ok(MetadataStore::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let entities: Vec<EntityMetadata> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(MetadataStore::builder().entities(entities).build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let metadata = Arc::new(load_metadata(cli.schema.as_ref())?);

    // Connect to database
    let connect = SqliteConnectOptions::from_str(&cli.database)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect)
        .await?;

    let mut options = SyncOptions::new().temp_table_prefix(cli.temp_prefix.clone());
    if cli.drop_unknown {
        options = options.drop_unknown_tables();
    }

    match cli.command {
        Commands::Sync { dry_run } => {
            if dry_run {
                options = options.dry_run();
                info!("Dry run mode - SQL will be printed but not executed.");
            }
            let synchronizer =
                SchemaSynchronizer::new(pool, SqliteDialect::new(), metadata).with_options(options);
            let plan = synchronizer.synchronize().await?;
            if dry_run {
                print_plan(&plan, synchronizer.dialect(), &cli.temp_prefix)?;
            }
        }

        Commands::Plan => {
            let synchronizer =
                SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), metadata)
                    .with_options(options);
            let mut runner = QueryRunner::connect(&pool).await?;
            let live = synchronizer.introspect(&mut runner).await;
            runner.release().await?;
            let plan = synchronizer.plan(&live?)?;
            print_plan(&plan, synchronizer.dialect(), &cli.temp_prefix)?;
        }

        Commands::Cleanup => {
            let synchronizer =
                SchemaSynchronizer::new(pool.clone(), SqliteDialect::new(), metadata)
                    .with_options(options);
            let mut runner = QueryRunner::connect(&pool).await?;
            let cleaned = synchronizer.cleanup_orphans(&mut runner).await;
            runner.release().await?;
            let cleaned = cleaned?;
            if cleaned.is_empty() {
                info!("No orphaned temporary tables found.");
            } else {
                info!(tables = cleaned.len(), "Orphaned temporary tables cleaned up.");
            }
        }
    }

    Ok(())
}

fn print_plan(plan: &SyncPlan, dialect: &SqliteDialect, temp_prefix: &str) -> anyhow::Result<()> {
    if plan.is_empty() {
        println!("Schema is up to date.");
        return Ok(());
    }
    for table in &plan.tables {
        let action = match table.action {
            TableAction::Create => "create",
            TableAction::Drop => "drop",
            TableAction::Alter => "alter",
            TableAction::Recreate { .. } => "recreate",
        };
        println!("\n-- {} ({action})", table.table);
        for change in &table.changes {
            println!("--   {}", change.description());
        }
        for sql in table.statements(dialect, temp_prefix)? {
            println!("{sql};");
        }
    }
    println!();
    Ok(())
}
