//! # Hybrid RAG CLI (`hrag`)
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the SQLite database and run schema migrations |
//! | `hrag index <path>` | Index a file or directory (`source` for the configured one) |
//! | `hrag reindex --all` | Rebuild every document's chunks and embeddings |
//! | `hrag search "<query>"` | Hybrid retrieval with score breakdown |
//! | `hrag context "<query>"` | Budgeted context with citations (`--scores` for relevance headers) |
//! | `hrag approve "<text>"` | Index approved output as feedback (`--parent` for replies) |
//! | `hrag backfill <file.json>` | Index recorded approvals that are not indexed yet |
//! | `hrag remove <id>` | Remove a document |
//! | `hrag stats` | Index statistics |
//! | `hrag log` | Recent retrieval log entries |
//! | `hrag serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hybrid_rag::{config, db, ingest, migrate, search, server, stats};

/// Hybrid RAG: lexical + vector retrieval with budgeted context assembly.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Hybrid lexical + vector retrieval with budgeted context assembly",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Index a file, a directory, or `source` for `[sources.filesystem]`.
    ///
    /// Documents whose content hash is unchanged are skipped.
    Index {
        /// Path to index, or the literal `source`.
        target: String,
    },

    /// Re-chunk and re-embed indexed documents, ignoring content hashes.
    ///
    /// Run after changing `[chunking]` or the embedding model.
    Reindex {
        /// Rebuild every document. Required.
        #[arg(long)]
        all: bool,
    },

    /// Search the index.
    Search {
        query: String,

        /// Override `retrieval.top_k`.
        #[arg(long)]
        limit: Option<usize>,

        /// Override `retrieval.score_threshold`.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Build the context a generator would receive for a query.
    Context {
        query: String,

        /// Head each span with its relevance score.
        #[arg(long)]
        scores: bool,
    },

    /// Index approved output as a feedback document.
    Approve {
        text: String,

        /// Provenance tag, e.g. `approved_post`. Defaults to `approved`,
        /// or `approved_reply` for replies.
        #[arg(long)]
        tag: Option<String>,

        /// Store the text as a reply.
        #[arg(long)]
        reply: bool,

        /// Text of the post being replied to. Implies `--reply`.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Index approvals recorded in a JSON file that are not indexed yet.
    ///
    /// The file holds an array of `{"id", "text", "parent_text"?, "tag"?}`.
    Backfill { file: PathBuf },

    /// Remove a document and all of its chunks.
    Remove { id: String },

    /// Show index statistics.
    Stats,

    /// Show recent retrieval log entries, newest first.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { target } => {
            ingest::run_index(&cfg, &target).await?;
        }
        Commands::Reindex { all } => {
            if !all {
                anyhow::bail!("reindex rebuilds the whole index; pass --all to confirm");
            }
            ingest::run_reindex(&cfg).await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            search::run_search(&cfg, &query, limit, threshold).await?;
        }
        Commands::Context { query, scores } => {
            search::run_context(&cfg, &query, scores).await?;
        }
        Commands::Approve {
            text,
            tag,
            reply,
            parent,
        } => {
            ingest::run_approve(&cfg, &text, tag.as_deref(), reply, parent.as_deref()).await?;
        }
        Commands::Backfill { file } => {
            ingest::run_backfill(&cfg, &file).await?;
        }
        Commands::Remove { id } => {
            ingest::run_remove(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Log { limit } => {
            search::run_log(&cfg, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
