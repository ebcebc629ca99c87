//! Cairn - session memory for coding assistants
//!
//! Main entry point for the Cairn CLI. The `hook` subcommand is what an
//! assistant runtime invokes once per event; the rest are maintenance tools.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

mod commands;

use commands::{context, hook, reconcile, search, stats};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Cairn - session memory for coding assistants
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (logs to stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Store directory (default: from config)
    #[arg(long, global = true, env = "CAIRN_STORE_PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record one assistant event read as JSON from stdin
    Hook(hook::HookArgs),

    /// Bring the vector index back in line with the record files
    Reconcile(reconcile::ReconcileArgs),

    /// Show record counts, token totals and index health
    Stats(stats::StatsArgs),

    /// Semantic search over stored records
    Search(search::SearchArgs),

    /// Assemble a token-budgeted context bundle
    Context(context::ContextArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_tracing(cli.verbose);

    let ctx = commands::Context::load(cli.json, cli.verbose, cli.store);

    match cli.command {
        Commands::Hook(args) => hook::run(args, &ctx).await,
        Commands::Reconcile(args) => reconcile::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
        Commands::Search(args) => search::run(args, &ctx).await,
        Commands::Context(args) => context::run(args, &ctx).await,
    }
}

/// Install the tracing subscriber.
///
/// Stdout carries the hook protocol, so logs go to a daily JSON file and,
/// with `--verbose`, to stderr. A log directory that cannot be created
/// disables the file layer instead of failing the process.
fn init_tracing(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let log_dir = cairn_config::xdg_config_dir()
        .or_else(|| dirs::cache_dir().map(|d| d.join("cairn")))
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("cairn")
        .filename_suffix("log")
        .build(&log_dir)
        .ok();

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(
                    "cairn=debug,cairn_memory=debug,cairn_embed=debug,cairn_config=debug,warn",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                    EnvFilter::new(
                        "cairn=debug,cairn_memory=debug,cairn_embed=debug,cairn_config=debug,info",
                    )
                }),
            )
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    guard
}
