mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matchwatch_notify::Notifier;
use matchwatch_storage::RecordStore;
use matchwatch_sync::{build_notifier, open_store, pipeline_from_config, shutdown_signal, SyncConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "matchwatch")]
#[command(about = "Watch a ticketing catalogue for newly listed matches and announce them")]
struct Cli {
    /// Override the log level (trace, debug, info, warn, error, off).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile forever until Ctrl-C / SIGTERM.
    Run,
    /// Run a single reconciliation cycle and print its summary.
    Once,
    /// Create the match table if it does not exist.
    Migrate,
    /// Print every stored match.
    List,
    /// Send a health-check message through the configured notifier.
    HealthCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;

    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = pipeline_from_config(&config)?;
            info!(
                db = %config.db_path.display(),
                interval_secs = pipeline.interval().as_secs(),
                "starting reconciliation loop"
            );
            let stats = pipeline.run_until(shutdown_signal()).await;
            info!(completed = stats.completed, aborted = stats.aborted, "reconciliation loop stopped");
        }
        Commands::Once => {
            let pipeline = pipeline_from_config(&config)?;
            let summary = pipeline.run_once().await.context("reconciliation cycle failed")?;
            println!(
                "cycle complete: run_id={} fetched={} new={} inserted={} notified={} notify_failures={}",
                summary.run_id,
                summary.fetched,
                summary.new_matches.len(),
                summary.inserted,
                summary.notified,
                summary.notify_failures
            );
            for record in &summary.new_matches {
                println!("  + {record}");
            }
        }
        Commands::Migrate => {
            let store = open_store(&config);
            store.ensure_schema().await.context("creating match table")?;
            println!("schema ready: {}", store.path().display());
        }
        Commands::List => {
            let store = open_store(&config);
            store.ensure_schema().await.context("creating match table")?;
            let records = store.read_all().await.context("reading stored matches")?;
            for record in &records {
                println!("{record}");
            }
            let total = store.count().await.context("counting stored matches")?;
            println!("{total} stored matches");
        }
        Commands::HealthCheck => {
            let notifier = build_notifier(&config)?;
            notifier
                .health_check()
                .await
                .context("sending health check")?;
            println!("health check sent");
        }
    }

    Ok(())
}
