//! # OSINT Harness CLI (`osint`)
//!
//! ## Usage
//!
//! ```bash
//! osint --config ./config/osint.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osint init` | Create the knowledge store directories |
//! | `osint ingest <path>` | Load, chunk, embed, and store files |
//! | `osint search "<query>"` | Search stored documents |
//! | `osint get <id>` | Print a document, optionally with its chunks |
//! | `osint delete <id>` | Remove a document and its chunks |
//! | `osint stats` | Summarise what is stored |
//! | `osint ask "<question>"` | Answer a question with the analyst agent |
//! | `osint rag "<question>"` | Answer from retrieved context in one model call |
//!
//! Logging goes to stderr. `RUST_LOG` overrides `[logging].level`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use osint_harness::{ask, config, get, ingest, manager, rag, search, stats};

/// OSINT Harness CLI: a local-first OSINT knowledge store and analyst agent.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/osint.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "osint",
    about = "OSINT Harness: a local-first OSINT knowledge store and analyst agent",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osint.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directories and index logs. Safe to run repeatedly.
    Init,

    /// Ingest a file or directory.
    ///
    /// JSON objects, JSON arrays, NVD CVE feeds, STIX bundles, text, and
    /// Markdown are supported.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Source type recorded on every document (e.g. `vulnerability`).
        #[arg(long, default_value = "unknown")]
        source_type: String,

        /// Source name recorded on every document. Defaults to the file name.
        #[arg(long)]
        source_name: Option<String>,

        /// Glob of files to include when ingesting a directory (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Glob of files to skip when ingesting a directory (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Show file and document counts without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search stored documents.
    Search {
        query: String,

        /// `semantic` (chunks by cosine similarity), `keyword`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Only return results of this source type.
        #[arg(long)]
        source_type: Option<String>,
    },

    /// Print a document by ID.
    Get {
        id: String,

        /// Also print every chunk.
        #[arg(long)]
        chunks: bool,
    },

    /// Delete a document and every chunk derived from it.
    Delete { id: String },

    /// Show document, chunk, and embedding counts.
    Stats,

    /// Ask the analyst agent a question.
    Ask {
        question: String,

        /// Let the model pick tools in a single round instead of the ReAct loop.
        #[arg(long)]
        tool_calling: bool,

        /// Print the full result, including transcript, as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer from the top retrieved chunks with a single model call.
    Rag {
        question: String,

        /// Only retrieve chunks of this source type.
        #[arg(long)]
        source_type: Option<String>,

        /// Print the prompt instead of calling the model.
        #[arg(long)]
        prompt_only: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            manager::KnowledgeStore::open(&cfg)?;
            println!(
                "Knowledge store initialized at {}.",
                cfg.store.path.display()
            );
        }
        Commands::Ingest {
            path,
            source_type,
            source_name,
            include,
            exclude,
            dry_run,
        } => {
            ingest::run_ingest(
                &cfg,
                &path,
                &source_type,
                source_name.as_deref(),
                &include,
                &exclude,
                dry_run,
            )?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            source_type,
        } => {
            search::run_search(&cfg, &query, &mode, limit, source_type.as_deref())?;
        }
        Commands::Get { id, chunks } => {
            get::run_get(&cfg, &id, chunks)?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, &id)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Ask {
            question,
            tool_calling,
            json,
        } => {
            ask::run_ask(&cfg, &question, tool_calling, json)?;
        }
        Commands::Rag {
            question,
            source_type,
            prompt_only,
            json,
        } => {
            rag::run_rag(&cfg, &question, source_type.as_deref(), prompt_only, json)?;
        }
    }

    Ok(())
}
