//! # tessera CLI
//!
//! Runs, simulates and checks handler snippets against an application
//! definition file.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::HandlerArgs;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "tessera.yml", env = "TESSERA_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet with the live backend
    Run {
        #[command(flatten)]
        handler: HandlerArgs,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Execute a snippet with mutations recorded instead of applied
    Simulate {
        #[command(flatten)]
        handler: HandlerArgs,

        /// Execution deadline (defaults to the configured value)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate a snippet and report its complexity and classification
    Check {
        /// Snippet text
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,

        /// File containing the snippet
        #[arg(long)]
        file: Option<PathBuf>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { handler, json } => commands::run_handler(&cli.config, &handler, json).await,
        Commands::Simulate {
            handler,
            timeout_ms,
            json,
        } => commands::simulate_handler(&cli.config, &handler, timeout_ms, json),
        Commands::Check { code, file, json } => {
            let source = commands::read_snippet(code.as_deref(), file.as_deref())?;
            commands::check_snippet(&cli.config, &source, json)
        }
    }
}
