//! Docsaga CLI - Atomic multi-record changes over a per-document store

mod plan;
mod record;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsaga_core::application::constants::DEFAULT_MAX_SAVE_ATTEMPTS;
use docsaga_core::port::id_provider::UuidProvider;
use docsaga_core::port::time_provider::SystemTimeProvider;
use docsaga_core::{Document, Repository, RepositoryConfig, StepFailure, Transaction, VERSION};
use docsaga_infra_sqlite::{create_pool, run_migrations, SqliteDocumentStore};
use plan::Plan;
use record::Record;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DB_PATH: &str = "~/.docsaga/documents.db";

#[derive(Parser)]
#[command(name = "docsaga")]
#[command(about = "Compensating transactions over a JSON document store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, env = "DOCSAGA_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Save attempts per document before giving up on a version conflict
    #[arg(long, env = "DOCSAGA_MAX_SAVE_ATTEMPTS", default_value_t = DEFAULT_MAX_SAVE_ATTEMPTS)]
    max_save_attempts: u32,

    /// Log output format: pretty or json
    #[arg(long, env = "DOCSAGA_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a record as JSON
    Get {
        /// Record ID
        id: String,
    },

    /// Create a record
    Put {
        /// Record ID
        id: String,

        /// Record body as a JSON object
        body: String,
    },

    /// Apply a plan file as one transaction
    Apply {
        /// Path to the plan JSON
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_format)?;
    debug!("Docsaga v{} starting...", VERSION);

    let repo = open_repository(&cli).await?;

    match cli.command {
        Commands::Get { id } => {
            let record = repo
                .find_by_id::<Record>(&id)
                .await
                .context("Failed to load record")?
                .with_context(|| format!("Record not found: {}", id))?;

            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Put { id, body } => {
            let body: Value = serde_json::from_str(&body).context("Invalid JSON body")?;
            let Value::Object(fields) = body else {
                anyhow::bail!("Record body must be a JSON object");
            };

            let mut tx = Transaction::<StepFailure>::new(repo);
            let taken = id.clone();
            tx.add_create(id.clone(), Record::new(fields), move || {
                StepFailure::already_exists(Record::COLLECTION, taken)
            });
            tx.run().await.context("Put failed")?;

            println!("Created record {}", id);
        }

        Commands::Apply { plan: path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read plan {}", path.display()))?;
            let plan = Plan::from_json(&text).context("Invalid plan file")?;
            let operations = plan.len();
            if plan.is_empty() {
                warn!(plan = %path.display(), "Plan has no operations");
            }

            info!(operations = operations, "Applying plan");
            plan.build(repo, &UuidProvider)
                .context("Invalid plan file")?
                .execute_delete_join::<Record, _>(|| Ok(()), Err)
                .await
                .context("Plan rolled back")?;

            println!("Plan committed ({} operations)", operations);
        }
    }

    Ok(())
}

/// Install the global tracing subscriber
fn init_logging(format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("docsaga=info"))
        .context("Failed to create env filter")?;

    match format {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

async fn open_repository(cli: &Cli) -> Result<Repository> {
    let db_path = shellexpand::tilde(&cli.db_path).into_owned();
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    info!(db_path = %db_path, "Initializing database...");

    let pool = create_pool(&db_path)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    let store = Arc::new(SqliteDocumentStore::new(pool, Arc::new(SystemTimeProvider)));
    let config = RepositoryConfig {
        max_save_attempts: cli.max_save_attempts,
        ..RepositoryConfig::default()
    };

    Ok(Repository::with_config(store, config))
}
