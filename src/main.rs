//! # DocChat CLI
//!
//! The `docchat` binary drives the document chat service: database
//! initialization, the HTTP API server, and direct pipeline access for
//! scripting and administration.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat serve` | Start the HTTP API server |
//! | `docchat ingest <file>` | Ingest a file through the full pipeline |
//! | `docchat ask "<query>"` | Ask a question against ingested documents |
//! | `docchat docs` | List documents, newest first |
//! | `docchat get <id>` | Show one document and its chunks |
//! | `docchat delete <id>` | Delete a document and all its chunks |
//! | `docchat cleanup` | Remove chunks whose parent document is gone |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docchat::chat::{ChatParams, ChatPipeline};
use docchat::completion::HttpCompletionProvider;
use docchat::config::{self, Config};
use docchat::db;
use docchat::extraction::HttpExtractor;
use docchat::ingest::{IngestPipeline, UploadRequest};
use docchat::migrate;
use docchat::models::SourceType;
use docchat::server;
use docchat::store::sqlite::SqliteStore;
use docchat::store::{self, ChunkStore, DocumentStore};
use docchat::vector_index::HttpVectorIndex;

/// DocChat, a retrieval-augmented document chat service.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Retrieval-augmented document chat: upload documents, ask questions grounded in their content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents/chunks tables.
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Ingest a file through the full pipeline and wait for the outcome.
    ///
    /// The document record is created immediately; the final status
    /// (`ready` or `error`) reflects extraction and indexing.
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Document title; defaults to the filename.
        #[arg(long)]
        title: Option<String>,

        /// Source type (`pdf`, `docx`, `text`, `transcript`, `url`);
        /// derived from the filename extension when omitted.
        #[arg(long)]
        source_type: Option<String>,

        /// Owner id to attribute the document to.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Ask a question against the ingested documents.
    Ask {
        /// The question to answer.
        query: String,

        /// Model API key for this request; falls back to the configured
        /// server key when omitted.
        #[arg(long)]
        api_key: Option<String>,
    },

    /// List documents, newest first.
    Docs {
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Show one document and its chunks.
    Get {
        /// Document id.
        id: String,
    },

    /// Delete a document and all chunks referencing it.
    Delete {
        /// Document id.
        id: String,
    },

    /// Remove chunks whose parent document no longer exists.
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest {
            file,
            title,
            source_type,
            owner,
        } => {
            run_ingest(&cfg, file, title, source_type, owner).await?;
        }
        Commands::Ask { query, api_key } => {
            run_ask(&cfg, &query, api_key.as_deref()).await?;
        }
        Commands::Docs { owner } => {
            let docstore = open_store(&cfg).await?;
            let docs = docstore.list(&owner).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for (i, doc) in docs.iter().enumerate() {
                println!(
                    "{}. [{}] {} ({})",
                    i + 1,
                    doc.status,
                    doc.title,
                    doc.source_type
                );
                println!("    uploaded: {}", format_ts_iso(doc.uploaded_at));
                println!("    id: {}", doc.id);
            }
        }
        Commands::Get { id } => {
            run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            let (ingest, _) = build_pipelines(&cfg).await?;
            if ingest.delete_document(&id).await? {
                println!("Document removed.");
            } else {
                eprintln!("Error: document not found: {}", id);
                std::process::exit(1);
            }
        }
        Commands::Cleanup => {
            let docstore = open_store(&cfg).await?;
            let removed = store::sweep_orphaned_chunks(docstore.as_ref()).await?;
            println!("Cleanup complete. Deleted {} orphaned chunks.", removed);
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let pool = db::connect(&cfg.db).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Wire the real stores and HTTP clients into both pipelines.
async fn build_pipelines(cfg: &Config) -> anyhow::Result<(IngestPipeline, ChatPipeline)> {
    let docstore = open_store(cfg).await?;

    let extractor = Arc::new(HttpExtractor::new(&cfg.services)?);
    let index = Arc::new(HttpVectorIndex::new(&cfg.services)?);
    let completion = Arc::new(HttpCompletionProvider::new(&cfg.services)?);

    let ingest = IngestPipeline::new(docstore.clone(), docstore.clone(), extractor, index.clone());
    let chat = ChatPipeline::new(docstore, index, completion, ChatParams::from_config(cfg));

    Ok((ingest, chat))
}

async fn run_ingest(
    cfg: &Config,
    file: PathBuf,
    title: Option<String>,
    source_type: Option<String>,
    owner: String,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file)?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let source_type = match source_type {
        Some(raw) => Some(
            SourceType::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("unknown source type: {}", raw))?,
        ),
        None => None,
    };

    let (ingest, _) = build_pipelines(cfg).await?;

    let req = UploadRequest {
        owner_id: owner,
        file: bytes,
        filename,
        title,
        source_type,
    };

    let (doc, status) = ingest.run(req).await?;

    println!("document: {}", doc.id);
    println!("title:    {}", doc.title);
    println!("status:   {}", status);
    Ok(())
}

async fn run_ask(cfg: &Config, query: &str, api_key: Option<&str>) -> anyhow::Result<()> {
    let (_, chat) = build_pipelines(cfg).await?;

    let result = chat.answer(query, api_key).await?;

    println!("{}", result.answer);
    if result.degraded {
        println!();
        println!("(generation failed; showing retrieved context)");
    }
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &result.sources {
            println!("  - {} ({})", source.title, source.id);
            println!("    \"{}\"", source.text.replace('\n', " "));
        }
    }
    Ok(())
}

async fn run_get(cfg: &Config, id: &str) -> anyhow::Result<()> {
    let docstore = open_store(cfg).await?;

    let doc = match docstore.get(id).await? {
        Some(doc) => doc,
        None => {
            eprintln!("Error: document not found: {}", id);
            std::process::exit(1);
        }
    };

    println!("--- Document ---");
    println!("id:          {}", doc.id);
    println!("title:       {}", doc.title);
    println!("filename:    {}", doc.original_filename);
    println!("source_type: {}", doc.source_type);
    println!("status:      {}", doc.status);
    println!("uploaded_at: {}", format_ts_iso(doc.uploaded_at));
    if doc.page_count > 0 {
        println!("pages:       {}", doc.page_count);
    }
    if !doc.tags.is_empty() {
        println!("tags:        {}", doc.tags.join(", "));
    }

    let chunks = docstore.for_document(id).await?;
    println!();
    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!("[chunk {}] {}", chunk.chunk_index, chunk.id);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
