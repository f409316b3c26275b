//! # Document Portal CLI (`docportal`)
//!
//! Runs the HTTP API or drives the same pipelines from the command line.
//!
//! ## Usage
//!
//! ```bash
//! docportal --config ./config/config.yaml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docportal serve` | Start the HTTP API |
//! | `docportal index <files>…` | Build a session vector index |
//! | `docportal query "<question>"` | Ask a question against a session index |
//! | `docportal analyze <file.pdf>` | Extract document metadata |
//! | `docportal compare <reference> <actual>` | Compare two documents |
//!
//! `OPENAI_API_KEY` and `GROQ_API_KEY` must be set (a `.env` file in the
//! working directory is read first). Log verbosity follows `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use document_portal::analyzer::{DocumentAnalyzer, DocumentHandler};
use document_portal::compare::DocumentComparator;
use document_portal::config::{self, DEFAULT_CONFIG_PATH};
use document_portal::ingest::{DocumentIngestor, IngestOptions};
use document_portal::model_loader::ModelLoader;
use document_portal::models::UploadedFile;
use document_portal::rag::ConversationalRag;
use document_portal::server::{self, AppState};
use document_portal::session::SessionPaths;

/// Document Portal: analyze, compare and chat with your documents.
#[derive(Parser)]
#[command(name = "docportal", version)]
struct Cli {
    /// Path to the YAML configuration file.
    ///
    /// Falls back to `DOCPORTAL_CONFIG`, then `config/config.yaml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `server.bind`.
    Serve,

    /// Ingest files into a session's vector index.
    Index {
        /// Files to ingest (pdf, docx, txt, md).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Reuse a session id instead of generating one.
        #[arg(long)]
        session_id: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        #[arg(short, long)]
        k: Option<usize>,

        /// Write directly into the upload and index bases.
        #[arg(long)]
        flat: bool,
    },

    /// Ask a question against an indexed session.
    Query {
        question: String,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(short, long)]
        k: Option<usize>,

        /// Read the index from the index base directly.
        #[arg(long)]
        flat: bool,
    },

    /// Extract metadata and a summary from a PDF.
    Analyze { file: PathBuf },

    /// Compare two documents page by page.
    Compare { reference: PathBuf, actual: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "document_portal=info,tower_http=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("DOCPORTAL_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let cfg = Arc::new(config::load_config(&config_path)?);
    let loader = ModelLoader::new(cfg.clone())?;

    match cli.command {
        Commands::Serve => {
            let state = AppState::new(cfg.clone(), loader.load_llm()?, loader.load_embeddings()?);
            server::run_server(state).await?;
        }
        Commands::Index {
            files,
            session_id,
            chunk_size,
            chunk_overlap,
            k,
            flat,
        } => {
            let defaults = IngestOptions::from_config(&cfg);
            let options = IngestOptions {
                chunk_size: chunk_size.unwrap_or(defaults.chunk_size),
                chunk_overlap: chunk_overlap.unwrap_or(defaults.chunk_overlap),
                k: k.unwrap_or(defaults.k),
                use_session_dirs: !flat,
            };
            let uploads = files
                .iter()
                .map(|p| read_upload(p))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let ingestor = DocumentIngestor::new(
                &cfg.storage,
                loader.load_embeddings()?,
                session_id.as_deref(),
                options,
            )?;
            let retriever = ingestor.ingest(&uploads).await?;
            println!(
                "Indexed {} chunks into {} (session {})",
                retriever.index().len(),
                ingestor.paths().index_dir.display(),
                ingestor.session_id()
            );
        }
        Commands::Query {
            question,
            session_id,
            k,
            flat,
        } => {
            if !flat && session_id.is_none() {
                anyhow::bail!("--session-id is required unless --flat is given");
            }
            let paths = SessionPaths::new(
                &cfg.storage.upload_base,
                &cfg.storage.index_base,
                session_id.clone().unwrap_or_default(),
                !flat,
            );
            let k = k.unwrap_or(cfg.retriever.top_k);
            let (search_type, search_kwargs) = cfg.retriever.search(k)?;

            let mut rag = ConversationalRag::new(session_id, loader.load_llm()?, loader.load_embeddings()?);
            rag.load_retriever_from_index(
                &paths.index_dir,
                k,
                &cfg.storage.index_name,
                search_type,
                Some(search_kwargs),
            )
            .await?;
            println!("{}", rag.invoke(&question, &[]).await?);
        }
        Commands::Analyze { file } => {
            let upload = read_upload(&file)?;
            let handler = DocumentHandler::new(&cfg.storage.analysis_dir, None)?;
            let saved = handler.save_pdf(&upload)?;
            let text = handler.read_pdf(&saved)?;
            let metadata = DocumentAnalyzer::new(loader.load_llm()?).analyze(&text).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Compare { reference, actual } => {
            let comparator = DocumentComparator::new(
                loader.load_llm()?,
                cfg.storage.compare_dir.clone(),
                cfg.storage.compare_keep_latest,
            );
            let (rows, session_id) = comparator
                .compare(&read_upload(&reference)?, &read_upload(&actual)?)
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "rows": rows,
                    "session_id": session_id,
                }))?
            );
        }
    }

    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<UploadedFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedFile::new(name, bytes))
}
