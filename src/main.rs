//! # Ragline CLI (`rgl`)
//!
//! The `rgl` binary is the primary interface for Ragline. It provides
//! commands for database initialization, document ingestion, retrieval,
//! grounded question answering, and document deletion.
//!
//! ## Usage
//!
//! ```bash
//! rgl --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgl init` | Create the SQLite database and run schema migrations |
//! | `rgl ingest <path>` | Extract, chunk, embed, and store a document |
//! | `rgl query "<text>"` | Retrieve the most similar chunks |
//! | `rgl ask "<question>"` | Retrieve and generate a grounded answer |
//! | `rgl delete <id>` | Delete a document and all of its chunks |
//! | `rgl status` | Show document/chunk counts and database size |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use ragline::answer::{answer, ChatMessage, HttpCompletionClient};
use ragline::config::{load_config, Config};
use ragline::embedding::HttpEmbeddingClient;
use ragline::extract::{MIME_HTML, MIME_MARKDOWN, MIME_PDF, MIME_TEXT};
use ragline::ingest::{ingest_document, IngestPayload, IngestRequest, IngestStatus};
use ragline::progress::ProgressMode;
use ragline::retrieve::run_retrieval;
use ragline::{db, migrate, store};

/// Ragline CLI — a document ingestion and grounded-retrieval pipeline
/// for AI assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; when the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "rgl",
    about = "Ragline — a document ingestion and grounded-retrieval pipeline",
    version,
    long_about = "Ragline ingests uploaded documents (extract, sanitize, chunk, embed, store) \
    and answers queries by thresholded similarity search over the stored chunks, grounding \
    generated answers in the retrieved content."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent; running it multiple times is safe.
    Init,

    /// Ingest a document: extract, sanitize, chunk, embed, store.
    ///
    /// The media type is inferred from the file extension (.txt, .md,
    /// .html, .pdf). Re-ingesting with the same --id replaces the previous
    /// chunks instead of duplicating them.
    Ingest {
        /// Path to the document file.
        path: PathBuf,
        /// Collection to file the document under (retrieval scope).
        #[arg(long)]
        collection: Option<String>,
        /// Stable document id; generated when omitted.
        #[arg(long)]
        id: Option<String>,
        /// Progress output mode.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Retrieve the chunks most similar to a query.
    Query {
        /// Query text.
        query: String,
        /// Restrict the search to one collection.
        #[arg(long)]
        collection: Option<String>,
        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum similarity in [0, 1].
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Retrieve and generate an answer grounded in the stored documents.
    Ask {
        /// The question to answer.
        question: String,
        /// Restrict retrieval to one collection.
        #[arg(long)]
        collection: Option<String>,
    },

    /// Delete a document and all of its chunks.
    Delete {
        /// Document id.
        id: String,
    },

    /// Show document/chunk counts and database size.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest {
            path,
            collection,
            id,
            progress,
        } => run_ingest(&config, &path, collection, id, progress).await,
        Commands::Query {
            query,
            collection,
            limit,
            threshold,
        } => run_query(&config, &query, collection, limit, threshold).await,
        Commands::Ask {
            question,
            collection,
        } => run_ask(&config, &question, collection).await,
        Commands::Delete { id } => run_delete(&config, &id).await,
        Commands::Status => run_status(&config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    println!("initialized {}", config.db.path.display());
    pool.close().await;
    Ok(())
}

async fn run_ingest(
    config: &Config,
    path: &Path,
    collection: Option<String>,
    id: Option<String>,
    progress: ProgressArg,
) -> Result<()> {
    let media_type = match media_type_for(path) {
        Some(mt) => mt,
        None => bail!(
            "cannot infer media type of {} (supported: .txt, .md, .html, .pdf)",
            path.display()
        ),
    };

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let bytes = std::fs::read(path)?;

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let backend = Arc::new(HttpEmbeddingClient::new(&config.embedding)?);

    let mode = match progress {
        ProgressArg::Auto => ProgressMode::default_for_tty(),
        ProgressArg::Off => ProgressMode::Off,
        ProgressArg::Human => ProgressMode::Human,
        ProgressArg::Json => ProgressMode::Json,
    };
    let reporter = mode.reporter();

    let report = ingest_document(
        &pool,
        config,
        backend,
        IngestRequest {
            document_id: id,
            name: name.clone(),
            media_type: media_type.to_string(),
            collection_id: collection,
            payload: IngestPayload::Bytes(bytes),
        },
        reporter.as_ref(),
    )
    .await?;

    println!("ingest {}", name);
    println!("  document id: {}", report.document_id);
    println!(
        "  chunks: {} total, {} embedded, {} skipped, {} failed",
        report.chunks_total, report.chunks_embedded, report.chunks_skipped, report.chunks_failed
    );
    if report.units_skipped > 0 {
        println!("  extraction units skipped: {}", report.units_skipped);
    }
    if report.replaced_existing {
        println!("  replaced previous ingestion");
    }
    match report.status {
        IngestStatus::Complete => println!("ok"),
        IngestStatus::Partial => println!("partial"),
    }

    pool.close().await;
    Ok(())
}

async fn run_query(
    config: &Config,
    query: &str,
    collection: Option<String>,
    limit: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let backend = HttpEmbeddingClient::new(&config.embedding)?;

    let response =
        run_retrieval(&pool, config, &backend, query, collection, limit, threshold).await?;

    if response.results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            result.similarity,
            result.file_name,
            format_bytes(result.file_size as u64)
        );
        println!("    excerpt: \"{}\"", excerpt(&result.content));
        println!(
            "    chunk: {}  document: {}",
            result.chunk_id, result.document_id
        );
        println!();
    }
    println!("{} result(s) for \"{}\"", response.count, response.query);

    pool.close().await;
    Ok(())
}

async fn run_ask(config: &Config, question: &str, collection: Option<String>) -> Result<()> {
    let pool = db::connect(config).await?;
    let embedder = HttpEmbeddingClient::new(&config.embedding)?;
    let completer = HttpCompletionClient::new(&config.completion)?;

    let response =
        run_retrieval(&pool, config, &embedder, question, collection, None, None).await?;

    let conversation = vec![ChatMessage::user(question)];
    let reply = answer(
        &completer,
        &config.completion,
        &conversation,
        &response.results,
    )
    .await?;

    println!("{}", reply);
    if !response.results.is_empty() {
        println!();
        println!("Sources:");
        for result in &response.results {
            println!("  [{:.2}] {}", result.similarity, result.file_name);
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    if store::delete_document(&pool, id).await? {
        println!("deleted {}", id);
    } else {
        println!("no document with id {}", id);
    }
    pool.close().await;
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ragline — Status");
    println!("================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Documents:  {}", total_docs);
    println!("  Chunks:     {}", total_chunks);

    pool.close().await;
    Ok(())
}

fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "txt" | "text" | "log" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "html" | "htm" => Some(MIME_HTML),
        "pdf" => Some(MIME_PDF),
        _ => None,
    }
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.len() <= 160 {
        trimmed.to_string()
    } else {
        let mut cut = 160;
        while cut > 0 && !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
