//! # Lectern CLI
//!
//! The `lectern` binary is the primary interface for the curriculum
//! knowledge base. It provides commands for database initialization,
//! batch PDF ingestion, hybrid search, chunk/document retrieval, and
//! coverage stats.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the SQLite database and run schema migrations |
//! | `lectern ingest <ROOT>` | Ingest `ROOT/<subject>/*.pdf` into the knowledge base |
//! | `lectern search "<query>" --subject <s>` | Hybrid (RRF) search within a subject |
//! | `lectern get <id>` | Retrieve a chunk or document by id |
//! | `lectern stats` | Per-subject coverage summary |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lectern init --config ./config/lectern.toml
//!
//! # Ingest the physics textbooks only
//! lectern ingest ./data --subject physics
//!
//! # Hybrid search
//! lectern search "Ohm's Law" --subject physics --top-k 5
//!
//! # Lexical-only search (no embeddings required)
//! lectern search "قانون أوم" --subject physics --mode sparse
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lectern::{config, get, ingest, migrate, search, stats};

/// Lectern CLI — a hybrid-retrieval knowledge base for curriculum PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — a hybrid-retrieval knowledge base for curriculum PDFs",
    version,
    long_about = "Lectern ingests curriculum PDFs organized by subject — native-text and \
    scanned alike — into hierarchy-aware chunks indexed both densely (embeddings) and \
    sparsely (BM25), and answers queries by fusing the two rankings with Reciprocal Rank \
    Fusion."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lectern.toml`. All extraction, cleaning,
    /// chunking, retrieval, and embedding settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, pages, chunks, chunks_fts, chunk_vectors).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest curriculum PDFs from a subject-organized directory tree.
    ///
    /// Expects `ROOT/<subject>/*.pdf` for the subjects listed in config.
    /// Each document runs through extraction (text layer or OCR), cleaning,
    /// structure-aware chunking, and dual-index writing. Re-running skips
    /// unchanged files; a changed file is replaced wholesale.
    Ingest {
        /// Root directory containing one subdirectory per subject.
        root: PathBuf,

        /// Only ingest this subject's directory.
        #[arg(long)]
        subject: Option<String>,

        /// Reingest all documents, ignoring dedup hashes.
        #[arg(long)]
        full: bool,

        /// Show document counts without processing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search a subject's chunks.
    ///
    /// Runs dense and sparse searches against the subject partition and
    /// fuses the rankings with Reciprocal Rank Fusion. If one side is
    /// unavailable the query degrades to single-method ranking with a
    /// warning.
    Search {
        /// The search query string.
        query: String,

        /// Subject partition to search (must be a configured subject).
        #[arg(long)]
        subject: String,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Search mode: `hybrid` (RRF), `dense`, or `sparse`.
        /// Dense and hybrid modes use the configured embedding provider.
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// Retrieve a chunk or document by id.
    ///
    /// Prints a chunk's text with its hierarchy citation, or a document's
    /// metadata with per-page extraction methods.
    Get {
        /// Chunk or document UUID.
        id: String,
    },

    /// Print per-subject coverage statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lectern=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            root,
            subject,
            full,
            dry_run,
            limit,
        } => {
            ingest::run_ingest(&cfg, &root, subject, full, dry_run, limit).await?;
        }
        Commands::Search {
            query,
            subject,
            top_k,
            mode,
        } => {
            search::run_search(&cfg, &query, &subject, top_k, &mode).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
