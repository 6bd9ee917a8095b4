//! # StudyStack CLI (`studystack`)
//!
//! The `studystack` binary drives the document study backend: database
//! initialization, PDF ingestion, retrieval queries, summaries, topic
//! classification, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! studystack --config ./config/studystack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `studystack init` | Create the SQLite database and run schema migrations |
//! | `studystack ingest <file>` | Upload and index a PDF |
//! | `studystack query "<q>"` | Retrieve matching chunks |
//! | `studystack summarize <id>` | Summarize a document |
//! | `studystack classify <id>` | Assign topic tags to a document |
//! | `studystack serve api` | Start the HTTP API server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use studystack::answer::ChatEngine;
use studystack::artifacts::ArtifactGenerator;
use studystack::blob::{BlobStore, LocalBlobStore};
use studystack::config::{self, Config};
use studystack::db;
use studystack::embedding::{Embedder, OpenAiEmbedder};
use studystack::ingest::IngestCoordinator;
use studystack::llm::{ChatModel, OpenAiChat};
use studystack::migrate;
use studystack::retrieval::RetrievalEngine;
use studystack::server::{self, AppState};
use studystack::store::Store;
use studystack::summarize::Summarizer;
use studystack::topics::{LabelCache, TopicClassifier};
use studystack::vector_index::{HttpVectorIndex, SqliteVectorIndex, VectorIndex};

/// StudyStack CLI: a document study backend with retrieval-augmented
/// question answering.
#[derive(Parser)]
#[command(
    name = "studystack",
    about = "StudyStack: ingest PDFs and answer questions about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/studystack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Upload and index a PDF document.
    ///
    /// Copies the file into blob storage, registers the document, runs the
    /// full ingestion pipeline, and classifies topics when indexing
    /// succeeds.
    Ingest {
        /// Path to the PDF file.
        file: PathBuf,

        /// Owner's email. The user is created on first use.
        #[arg(long)]
        user: String,

        /// Document title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },

    /// Retrieve matching chunks for a query.
    Query {
        /// The query string.
        query: String,

        /// Owner's email.
        #[arg(long)]
        user: String,

        /// Documents to search (repeatable). At least one is required.
        #[arg(long = "doc")]
        documents: Vec<String>,
    },

    /// Summarize a document.
    Summarize {
        /// Document id.
        id: String,

        /// Owner's email.
        #[arg(long)]
        user: String,
    },

    /// Assign topic tags to a document.
    Classify {
        /// Document id.
        id: String,

        /// Owner's email.
        #[arg(long)]
        user: String,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// JSON HTTP API for chats, retrieval, and document operations.
    Api,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.db.path.display());
            Ok(())
        }
        Commands::Ingest { file, user, title } => cmd_ingest(&config, &file, &user, title).await,
        Commands::Query {
            query,
            user,
            documents,
        } => cmd_query(&config, &query, &user, &documents).await,
        Commands::Summarize { id, user } => {
            let state = build_state(&config).await?;
            let user_id = resolve_user(&state.store, &user).await?;
            let summary = state.summarizer.summarize(&user_id, &id).await?;
            println!("{}", summary);
            Ok(())
        }
        Commands::Classify { id, user } => {
            let state = build_state(&config).await?;
            let user_id = resolve_user(&state.store, &user).await?;
            let tags = state.classifier.classify_document(&user_id, &id).await?;
            println!("Tags: {}", tags.join(", "));
            Ok(())
        }
        Commands::Serve {
            service: ServeService::Api,
        } => {
            let state = build_state(&config).await?;
            server::run_server(state).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wire up every component from configuration. All commands that touch the
/// pipeline share this state with the HTTP server.
async fn build_state(config: &Config) -> Result<AppState> {
    let pool = db::connect(config).await?;
    let store = Store::new(pool.clone());

    let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.blob.root));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
    let index: Arc<dyn VectorIndex> = match config.vector_index.backend.as_str() {
        "sqlite" => Arc::new(SqliteVectorIndex::new(pool.clone())),
        "http" => Arc::new(HttpVectorIndex::new(&config.vector_index)?),
        other => bail!("unknown vector index backend: {}", other),
    };
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(&config.llm)?);

    let coordinator = Arc::new(IngestCoordinator::new(
        store.clone(),
        Arc::clone(&blob),
        Arc::clone(&embedder),
        Arc::clone(&index),
        config.chunking.clone(),
        config.ingest.clone(),
    ));
    let retrieval = Arc::new(RetrievalEngine::new(
        Arc::clone(&embedder),
        Arc::clone(&index),
        config.retrieval.clone(),
    ));
    let chat = Arc::new(ChatEngine::new(
        store.clone(),
        Arc::clone(&model),
        RetrievalEngine::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            config.retrieval.clone(),
        ),
        config.llm.clone(),
    ));
    let summarizer = Arc::new(Summarizer::new(
        store.clone(),
        Arc::clone(&index),
        Arc::clone(&model),
        config.summarize.clone(),
    ));
    let classifier = Arc::new(TopicClassifier::new(
        store.clone(),
        Arc::clone(&embedder),
        Arc::new(LabelCache::new()),
        config.topics.clone(),
    ));
    let artifacts = Arc::new(ArtifactGenerator::new(
        store.clone(),
        Arc::clone(&blob),
        Arc::clone(&index),
        Arc::clone(&model),
        config.summarize.clone(),
    ));

    Ok(AppState {
        store,
        coordinator,
        retrieval,
        chat,
        summarizer,
        classifier,
        artifacts,
        config: Arc::new(config.clone()),
    })
}

async fn resolve_user(store: &Store, email: &str) -> Result<String> {
    store.ensure_user(email.trim()).await
}

async fn cmd_ingest(config: &Config, file: &PathBuf, user: &str, title: Option<String>) -> Result<()> {
    let state = build_state(config).await?;
    let user_id = resolve_user(&state.store, user).await?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file path has no name")?
        .to_string();
    if !file_name.to_lowercase().ends_with(".pdf") {
        bail!("only PDF files are supported");
    }
    let title = title.unwrap_or_else(|| file_name.trim_end_matches(".pdf").to_string());

    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let document = state
        .store
        .create_document(&user_id, &title, "pdf", None, Some(&file_name))
        .await?;

    let storage_path = format!("{}/{}/{}", user_id, document.id, file_name);
    let blob = LocalBlobStore::new(&config.blob.root);
    blob.upload(&storage_path, &bytes, "application/pdf", Default::default())
        .await?;
    state
        .store
        .set_storage_path(&user_id, &document.id, &storage_path)
        .await?;

    println!("Ingesting {} ({} bytes)...", file_name, bytes.len());
    state.coordinator.run(&user_id, &document.id).await?;

    let document = state
        .store
        .get_document(&user_id, &document.id)
        .await?
        .context("document vanished during ingestion")?;

    println!("Document: {}", document.id);
    println!("  Status:  {}", document.status.as_str());
    match document.status.as_str() {
        "completed" => {
            println!("  Chunks:  {}", document.chunk_count);
            println!("  Chars:   {}", document.character_count);
            if document.truncated {
                println!("  Note:    text was truncated at the size cap");
            }
            let tags = state.classifier.classify_document(&user_id, &document.id).await?;
            println!("  Topics:  {}", tags.join(", "));
        }
        _ => {
            if let Some(error) = &document.error {
                println!("  Error:   {}", error);
            }
        }
    }
    Ok(())
}

async fn cmd_query(config: &Config, query: &str, user: &str, documents: &[String]) -> Result<()> {
    let state = build_state(config).await?;
    let user_id = resolve_user(&state.store, user).await?;

    if documents.is_empty() {
        bail!("pass at least one --doc <document-id> to search");
    }

    let retrieval = state.retrieval.retrieve(query, &user_id, documents).await?;
    if retrieval.matches.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    if let Some(confidence) = retrieval.confidence {
        println!("Confidence: {:.0}%", confidence);
    }
    for (i, m) in retrieval.matches.iter().enumerate() {
        let snippet: String = m.metadata.text.chars().take(120).collect();
        println!(
            "{:2}. [{:.3}] {} #{}: {}",
            i + 1,
            m.score,
            m.metadata.title,
            m.metadata.chunk_index,
            snippet
        );
    }
    Ok(())
}
