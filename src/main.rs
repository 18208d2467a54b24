//! # CorpGuide CLI (`corpguide`)
//!
//! ## Usage
//!
//! ```bash
//! corpguide --config ./config/corpguide.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpguide serve` | Start the HTTP server; the index is checked/rebuilt in the background |
//! | `corpguide ingest` | Wipe the index and rebuild it from the data directory |
//! | `corpguide ask "<question>"` | Answer one question and exit |
//! | `corpguide status` | Show index contents and health |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `corpguide=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corpguide::{ask, config, ingest, server, status};

/// CorpGuide: answers policy questions from your PDF documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults. The language model key is
/// read from `GROQ_API_KEY`.
#[derive(Parser)]
#[command(
    name = "corpguide",
    about = "CorpGuide: a retrieval-augmented policy assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/corpguide.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves `/`, `/chat`, `/reset` and `/health` on `[server].bind`.
    /// Questions get 503 until the startup index check (and any rebuild)
    /// has finished.
    Serve,

    /// Rebuild the index from the data directory.
    ///
    /// Deletes the persist directory, then processes every PDF in
    /// `[data].dir`. Files that fail to parse are skipped.
    Ingest,

    /// Answer a single question and exit.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Show what is indexed and whether the index answers queries.
    Status,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("corpguide=info,tower_http=info")),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::Ask { question } => {
            ask::run_ask(&cfg, &question).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
