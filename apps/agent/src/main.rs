//! Chunkstage agent entry point.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Context;
use chunkstage_transfer::{DEFAULT_CHUNK_SIZE, UploadEngine};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkstage-agent", version, about = "Chunked upload staging agent")]
struct Cli {
    /// Configuration file (defaults to ~/.config/chunkstage/agent.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List uploads with staged chunks that have not been assembled yet.
    Status,

    /// Split a local file into chunks and push them through the engine.
    Ingest {
        file: PathBuf,

        /// Session key (defaults to today's date bucket).
        #[arg(long)]
        session: Option<String>,

        /// Directory below the session, `.` for the session root.
        #[arg(long, default_value = ".")]
        relative_path: String,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Chunks in flight at once.
        #[arg(long, default_value_t = 4)]
        parallel: usize,
    },

    /// Print the effective configuration.
    ShowConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting chunkstage agent"
    );

    if let Command::ShowConfig = cli.command {
        return commands::show_config(&config);
    }

    let engine = UploadEngine::with_clock(config.engine_config(), config.session_clock()?)
        .context("initializing upload engine")?;

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Status => commands::status(&engine).await,
            Command::Ingest {
                file,
                session,
                relative_path,
                chunk_size,
                parallel,
            } => {
                let args = commands::IngestArgs {
                    file,
                    session,
                    relative_path,
                    chunk_size,
                    parallel,
                };
                commands::ingest(&engine, args).await
            }
            Command::ShowConfig => Ok(()),
        }
    })
}
