//! Single-document metadata extraction.
//!
//! [`DocumentHandler`] stores an uploaded PDF under an analysis session and
//! reads it back with page markers; [`DocumentAnalyzer`] sends the text to
//! the chat model and parses the reply into [`Metadata`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PortalError, Result, ResultExt};
use crate::extract::{extract_with_page_markers, DocumentFormat};
use crate::llm::ChatModel;
use crate::models::{Metadata, UploadedFile};
use crate::parser::OutputFixingParser;
use crate::prompts::{template, PromptType};
use crate::session::resolve_session_id;

/// Saves and reads PDFs for one analysis session under `data_dir/<session_id>`.
pub struct DocumentHandler {
    session_id: String,
    session_path: PathBuf,
}

impl DocumentHandler {
    pub fn new(data_dir: &Path, session_id: Option<&str>) -> Result<Self> {
        let session_id = resolve_session_id(session_id)?;
        let session_path = data_dir.join(&session_id);
        std::fs::create_dir_all(&session_path)
            .context("Error initializing DocumentHandler")?;
        tracing::info!(
            session_id = %session_id,
            session_path = %session_path.display(),
            "DocumentHandler initialized"
        );
        Ok(Self {
            session_id,
            session_path,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    /// Writes the upload under its own file name. Only PDFs are accepted.
    pub fn save_pdf(&self, file: &UploadedFile) -> Result<PathBuf> {
        if DocumentFormat::from_file_name(&file.name) != Some(DocumentFormat::Pdf) {
            return Err(PortalError::InvalidInput(
                "Invalid file type. Only PDFs are allowed.".to_string(),
            ));
        }
        let path = self.session_path.join(safe_file_name(&file.name));
        std::fs::write(&path, &file.bytes).context("Failed to save PDF")?;
        tracing::info!(
            session_id = %self.session_id,
            filename = %file.name,
            save_path = %path.display(),
            "PDF saved successfully"
        );
        Ok(path)
    }

    /// Reads a saved PDF, prefixing each page with `--- Page N ---`.
    pub fn read_pdf(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).context("Failed to read PDF")?;
        let text = extract_with_page_markers(&bytes, DocumentFormat::Pdf).map_err(|source| {
            PortalError::Extract {
                file: path.display().to_string(),
                source,
            }
        })?;
        tracing::info!(pdf_path = %path.display(), chars = text.len(), "PDF read successfully");
        Ok(text)
    }
}

/// Drops any directory part of an uploaded file name.
pub(crate) fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base {
        "" | "." | ".." => "upload".to_string(),
        other => other.to_string(),
    }
}

pub struct DocumentAnalyzer {
    llm: Arc<dyn ChatModel>,
    parser: OutputFixingParser<Metadata>,
}

impl DocumentAnalyzer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        tracing::info!(model = %llm.model_name(), "DocumentAnalyzer initialized");
        Self {
            parser: OutputFixingParser::new(llm.clone()),
            llm,
        }
    }

    /// Extracts [`Metadata`] and a summary from `document_text`.
    pub async fn analyze(&self, document_text: &str) -> Result<Metadata> {
        self.run(document_text).await.map_err(|e| {
            tracing::error!(error = %e, "Metadata analysis failed");
            e.context("Metadata extraction failed")
        })
    }

    async fn run(&self, document_text: &str) -> Result<Metadata> {
        let instructions = self.parser.format_instructions();
        let messages = template(PromptType::DocumentAnalysis).render(
            &[
                ("format_instructions", instructions.as_str()),
                ("document_text", document_text),
            ],
            &[],
        );
        let reply = self.llm.complete(&messages).await?;
        let metadata = self.parser.parse(&reply).await?;
        tracing::info!(
            title = %metadata.title,
            summary_points = metadata.summary.len(),
            "Metadata extraction successful"
        );
        Ok(metadata)
    }
}
