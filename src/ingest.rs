//! Document ingestion: uploads → text → chunks → embeddings → saved index.
//!
//! [`DocumentIngestor::ingest`] runs the whole pipeline for one session:
//!
//! 1. Skip files whose extension is not supported (logged, not an error).
//! 2. Save each accepted upload under the session's upload directory and
//!    extract its text, both on the blocking pool; PDFs yield one document
//!    per non-empty page.
//! 4. Split into overlapping chunks and embed them.
//! 5. Save the index under the session's index directory, replacing any
//!    index with the same name.
//! 6. Return a similarity [`Retriever`] over the new index.

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunk::chunk_documents;
use crate::config::{Config, StorageConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{PortalError, Result, ResultExt};
use crate::extract::{extract_pages, DocumentFormat, SUPPORTED_EXTENSIONS};
use crate::models::{LoadedDocument, UploadedFile};
use crate::session::{resolve_session_id, save_upload, SessionPaths};
use crate::vector_store::{Retriever, VectorIndex};

/// Tunables for one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Top-k of the returned retriever.
    pub k: usize,
    /// Nest uploads and index under a per-session directory.
    pub use_session_dirs: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            k: 5,
            use_session_dirs: true,
        }
    }
}

impl IngestOptions {
    /// Options taken from the `chunking` and `retriever` config blocks.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            k: config.retriever.top_k,
            use_session_dirs: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PortalError::InvalidInput("chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PortalError::InvalidInput(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.k == 0 {
            return Err(PortalError::InvalidInput("k must be at least 1".to_string()));
        }
        Ok(())
    }
}

pub struct DocumentIngestor {
    paths: SessionPaths,
    index_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    options: IngestOptions,
}

impl DocumentIngestor {
    /// Resolves the session and creates its directories.
    ///
    /// A missing or blank `session_id` gets a freshly generated one.
    pub fn new(
        storage: &StorageConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        session_id: Option<&str>,
        options: IngestOptions,
    ) -> Result<Self> {
        options.validate()?;
        let session_id = resolve_session_id(session_id)?;
        let paths = SessionPaths::new(
            &storage.upload_base,
            &storage.index_base,
            session_id,
            options.use_session_dirs,
        );
        paths
            .create_dirs()
            .context("Failed to initialize DocumentIngestor")?;

        tracing::info!(
            session_id = %paths.session_id,
            temp_path = %paths.upload_dir.display(),
            faiss_path = %paths.index_dir.display(),
            "DocumentIngestor initialized"
        );

        Ok(Self {
            paths,
            index_name: storage.index_name.clone(),
            embedder,
            options,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.paths.session_id
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Ingests `files` and returns a retriever over the saved index.
    pub async fn ingest(&self, files: &[UploadedFile]) -> Result<Retriever> {
        self.run(files).await.map_err(|e| {
            tracing::error!(session_id = %self.paths.session_id, error = %e, "Failed to ingest files");
            e.context("Failed to ingest files")
        })
    }

    async fn run(&self, files: &[UploadedFile]) -> Result<Retriever> {
        let mut documents = Vec::new();
        for file in files {
            let Some(format) = DocumentFormat::from_file_name(&file.name) else {
                tracing::warn!(
                    filename = %file.name,
                    supported = ?SUPPORTED_EXTENSIONS,
                    "Unsupported file skipped"
                );
                continue;
            };
            let (saved, docs) = load_document(file, format, self.paths.upload_dir.clone()).await?;
            tracing::info!(
                session_id = %self.paths.session_id,
                filename = %file.name,
                saved_as = %saved.display(),
                documents = docs.len(),
                "File saved for ingestion"
            );
            documents.extend(docs);
        }

        if documents.is_empty() {
            return Err(PortalError::Ingestion(
                "No valid documents loaded for ingestion".to_string(),
            ));
        }

        let chunks = chunk_documents(&documents, self.options.chunk_size, self.options.chunk_overlap);
        tracing::info!(
            session_id = %self.paths.session_id,
            documents = documents.len(),
            chunks = chunks.len(),
            chunk_size = self.options.chunk_size,
            chunk_overlap = self.options.chunk_overlap,
            "Documents split into chunks"
        );

        let index = Arc::new(VectorIndex::from_chunks(chunks, self.embedder.as_ref()).await?);
        let (to_save, dir, name) = (index.clone(), self.paths.index_dir.clone(), self.index_name.clone());
        tokio::task::spawn_blocking(move || to_save.save_local(&dir, &name))
            .await
            .map_err(|e| PortalError::Io(std::io::Error::other(e)))??;

        tracing::info!(
            session_id = %self.paths.session_id,
            index_path = %self.paths.index_dir.display(),
            k = self.options.k,
            "Retriever created"
        );
        Retriever::similarity(index, self.embedder.clone(), self.options.k)
    }
}

/// Saves `file` into `upload_dir` and extracts it into loaded documents,
/// both on the blocking pool.
async fn load_document(
    file: &UploadedFile,
    format: DocumentFormat,
    upload_dir: PathBuf,
) -> Result<(PathBuf, Vec<LoadedDocument>)> {
    let upload = file.clone();
    let (saved, pages) = tokio::task::spawn_blocking(move || {
        let saved = save_upload(&upload_dir, &upload)?;
        let pages = extract_pages(&upload.bytes, format).map_err(|source| PortalError::Extract {
            file: upload.name.clone(),
            source,
        })?;
        Ok::<_, PortalError>((saved, pages))
    })
    .await
    .map_err(|e| PortalError::Ingestion(format!("extraction task failed: {}", e)))??;

    let saved_path = saved.to_string_lossy().to_string();
    let paginated = format == DocumentFormat::Pdf;
    let documents = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !paginated || !text.trim().is_empty())
        .map(|(i, text)| LoadedDocument {
            text,
            source: file.name.clone(),
            saved_path: saved_path.clone(),
            page: paginated.then_some(i as u32 + 1),
        })
        .collect();
    Ok((saved, documents))
}
