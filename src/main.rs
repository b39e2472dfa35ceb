//! Command-line interface for mongo-tail
//!
//! # Usage Examples
//!
//! ## Tail collections
//! ```bash
//! # Follow every collection whose name starts with "events_"
//! mongo-tail run \
//!   --uri mongodb://localhost:27017/logs \
//!   --collection '^events_' \
//!   --parse-method flatten
//!
//! # Same, with settings from a file and verbose logging
//! mongo-tail run --config mongo-tail.toml --log-level debug
//! ```
//!
//! ## Inspect checkpoints
//! ```bash
//! mongo-tail checkpoints --placeholder-db-dir /var/lib/mongo-tail
//! ```
//!
//! Events are written to stdout as JSON lines; logs go to stderr.

use anyhow::Context;
use checkpoint::{CheckpointConfig, CheckpointManager};
use clap::{Parser, Subcommand};
use mongo_tail::{write_events, RunArgs};
use mongodb_tail_source::{Cursor, MongoSource, TailLoop};
use tail_core::ChannelSink;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongo-tail")]
#[command(about = "Follow MongoDB collections and emit new documents as JSON lines")]
#[command(long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail matching collections until interrupted
    Run(RunArgs),

    /// Print the stored checkpoint of every collection
    Checkpoints {
        /// Directory of the checkpoint file
        #[arg(long, default_value = checkpoint::DEFAULT_DIR)]
        placeholder_db_dir: std::path::PathBuf,

        /// File name of the checkpoint file
        #[arg(long, default_value = checkpoint::DEFAULT_FILE_NAME)]
        placeholder_db_name: String,

        /// Namespace of the stored checkpoints
        #[arg(long, default_value = checkpoint::DEFAULT_NAMESPACE)]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("Invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run_tail(args).await,
        Commands::Checkpoints {
            placeholder_db_dir,
            placeholder_db_name,
            namespace,
        } => {
            let config =
                CheckpointConfig::new(placeholder_db_dir, placeholder_db_name).with_namespace(namespace);
            list_checkpoints(&config).await
        }
    }
}

async fn run_tail(args: RunArgs) -> anyhow::Result<()> {
    let settings = args.resolve()?;

    let source = MongoSource::connect(&settings.source).await?;
    source
        .ping()
        .await
        .with_context(|| format!("Failed to reach MongoDB database '{}'", source.database_name()))?;
    info!("Connected to MongoDB database '{}'", source.database_name());

    let checkpoints = CheckpointManager::open_sqlite(&settings.checkpoint)
        .await
        .with_context(|| {
            format!(
                "Failed to open checkpoint file {}",
                settings.checkpoint.path().display()
            )
        })?;
    info!(
        "Using checkpoint file {} (namespace '{}')",
        settings.checkpoint.path().display(),
        settings.checkpoint.namespace
    );

    let (sink, rx) = ChannelSink::bounded(settings.channel_capacity);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        write_events(rx, &mut stdout).await
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping after the current document");
            shutdown.cancel();
        }
    });

    let tail = TailLoop::new(source, checkpoints, sink, settings.tail)?;
    info!("Tailing as host '{}'", tail.host());
    // The loop owns the sink; the writer finishes once the loop is dropped.
    let result = tail.run(cancel).await;

    let written = writer.await.context("Output writer task panicked")??;
    let stats = result?;
    info!(
        "Stopped after {} passes: {} events emitted, {} documents skipped, {} failed fetches ({} lines written)",
        stats.passes, stats.emitted, stats.skipped, stats.fetch_failures, written
    );
    Ok(())
}

async fn list_checkpoints(config: &CheckpointConfig) -> anyhow::Result<()> {
    let path = config.path();
    if !path.exists() {
        warn!("Checkpoint file {} does not exist", path.display());
        return Ok(());
    }

    let manager = CheckpointManager::open_sqlite(config).await?;
    let checkpoints = manager.list_checkpoints::<Cursor>().await?;
    if checkpoints.is_empty() {
        println!("No checkpoints in namespace '{}'", config.namespace);
        return Ok(());
    }
    for (collection, cursor) in checkpoints {
        println!(
            "{collection}\t{cursor}\t{}",
            cursor.generation_time_rfc3339()
        );
    }
    Ok(())
}
