//! sdn-journal: replays journaled network intents to an SDN controller
//!
//! `sdn-journal run` starts the sync worker and maintenance scheduler; the
//! other subcommands inspect or edit the journal database directly.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use sdn_journal::db::RowState;
use sdn_journal::{Config, JournalDb, JournalService, ObjectType, Operation};

#[derive(Parser)]
#[command(name = "sdn-journal")]
#[command(about = "Durable journal that mirrors network and port intents to an SDN controller")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sdn-journal.toml")]
    config: PathBuf,

    /// Journal database path (overrides config file)
    #[arg(short, long, env = "SDN_JOURNAL_DB")]
    database: Option<PathBuf>,

    /// Controller base URL (overrides config file)
    #[arg(long, env = "SDN_CONTROLLER_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the sync worker and maintenance scheduler until Ctrl-C
    Run,

    /// Record one intent and exit
    Record {
        /// Object type tag (network, port, ...)
        #[arg(short = 't', long)]
        object_type: String,

        /// Identifier of the resource on the controller
        #[arg(short, long)]
        uuid: String,

        /// create, update or delete
        #[arg(short, long)]
        operation: String,

        /// Resource snapshot as JSON
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Show row counts per state and the maintenance lock
    Status,

    /// List failed rows
    Failed,

    /// Move a failed row back to pending with a fresh retry budget
    Requeue {
        /// Row id
        row_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sdn_journal=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(database) = cli.database {
        config.journal.database_path = database;
    }
    if let Some(url) = cli.url {
        config.controller.url = url;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Record {
            object_type,
            uuid,
            operation,
            data,
        } => {
            let operation: Operation = operation.parse()?;
            let data: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            let db = open_db(&config)?;
            let id = db.create_pending(&ObjectType::new(object_type), &uuid, operation, &data)?;
            println!("{}", id);
            Ok(())
        }
        Command::Status => {
            let db = open_db(&config)?;
            for (state, count) in db.count_by_state()? {
                println!("{:<12} {}", state, count);
            }
            let lock = db.maintenance_lock()?;
            println!(
                "maintenance  {} (operation: {}, updated: {})",
                lock.state.as_str(),
                lock.processing_operation.as_deref().unwrap_or("-"),
                lock.lock_updated.to_rfc3339()
            );
            Ok(())
        }
        Command::Failed => {
            let db = open_db(&config)?;
            for row in db.list_by_state(RowState::Failed)? {
                println!(
                    "{}  {} {} {}  retries={}  last_retried={}",
                    row.id,
                    row.operation,
                    row.object_type,
                    row.object_uuid,
                    row.retry_count,
                    row.last_retried.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Requeue { row_id } => {
            let db = open_db(&config)?;
            if !db.requeue_failed(row_id)? {
                anyhow::bail!("Row {} does not exist or is not failed", row_id);
            }
            println!("Requeued {}", row_id);
            Ok(())
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting sdn-journal");
    info!("Controller: {}", config.controller.url);
    info!("Database: {}", config.journal.database_path.display());

    let service = JournalService::start(&config)?;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    service.shutdown().await;
    Ok(())
}

fn open_db(config: &Config) -> anyhow::Result<JournalDb> {
    JournalDb::open(&config.journal.database_path, config.busy_timeout())
        .with_context(|| format!("Failed to open {}", config.journal.database_path.display()))
}
