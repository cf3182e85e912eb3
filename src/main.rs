//! # AusLaw CLI (`auslaw`)
//!
//! ## Usage
//!
//! ```bash
//! auslaw --config ./config/auslaw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `auslaw init` | Create the SQLite database and run schema migrations |
//! | `auslaw ingest <file.jsonl>` | Load legislation documents |
//! | `auslaw embed pending` | Embed chunks with missing or stale vectors |
//! | `auslaw search "<query>"` | Hybrid legislation search |
//! | `auslaw ask "<message>"` | Run one turn through the orchestrator |
//! | `auslaw serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use auslaw::config;
use auslaw::orchestrator::{Attachment, Orchestrator, SessionMode, TurnRequest};
use auslaw::{db, embed_cmd, ingest, migrate, search, server};

/// AusLaw: Australian legal question answering over local legislation.
#[derive(Parser)]
#[command(
    name = "auslaw",
    about = "AusLaw: hybrid legislation retrieval and adaptive legal reasoning",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/auslaw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest legislation from a JSONL file.
    ///
    /// Each line: `{external_id, citation, jurisdiction, source_url, text,
    /// effective_date?}`. Re-ingesting an id replaces the document.
    Ingest {
        path: PathBuf,

        /// Parse and chunk without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search legislation (vector + keyword, fused, optionally reranked).
    Search {
        query: String,

        /// State or territory code (NSW, QLD, FEDERAL, ...).
        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question; one conversational turn.
    Ask {
        message: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Declared state or territory.
        #[arg(long)]
        state: Option<String>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Attach a text document (lease, contract, notice).
        #[arg(long)]
        attach: Option<PathBuf>,

        /// Print the full turn outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Conversational,
    Adaptive,
}

impl From<ModeArg> for SessionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Conversational => SessionMode::Conversational,
            ModeArg::Adaptive => SessionMode::Adaptive,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, dry_run } => {
            ingest::run_ingest(&cfg, &path, dry_run).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Search {
            query,
            state,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, state, limit, json).await?;
        }
        Commands::Ask {
            message,
            session,
            state,
            mode,
            attach,
            json,
        } => {
            let attachments = match attach {
                Some(path) => vec![Attachment {
                    name: path.file_name().map(|n| n.to_string_lossy().to_string()),
                    text: std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read attachment: {}", path.display()))?,
                }],
                None => Vec::new(),
            };

            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let orchestrator = Arc::new(Orchestrator::from_config(&cfg, pool.clone())?);
            let outcome = orchestrator
                .handle_turn(TurnRequest {
                    session_id: session,
                    message,
                    attachments,
                    declared_jurisdiction: state,
                    mode: mode.map(SessionMode::from),
                })
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.reply);
                if !outcome.flags.is_empty() {
                    eprintln!("flags: {:?}", outcome.flags);
                }
                eprintln!("session: {}", outcome.session_id);
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
