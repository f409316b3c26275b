//! Two-document comparison.
//!
//! A comparison runs in its own session directory under the configured
//! `compare_dir`. Both uploads are saved there, their text is extracted with
//! page markers, and the combined text is sent to the chat model, which
//! answers with one `{Page, Changes}` row per page. Only the newest
//! `compare_keep_latest` comparison sessions are kept on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::safe_file_name;
use crate::error::{PortalError, Result, ResultExt};
use crate::extract::{extract_with_page_markers, DocumentFormat, SUPPORTED_EXTENSIONS};
use crate::llm::ChatModel;
use crate::models::{ComparisonRow, UploadedFile};
use crate::parser::OutputFixingParser;
use crate::prompts::{template, PromptType};
use crate::session::{generate_session_id, prune_sessions};

const REFERENCE_DIR: &str = "reference";
const ACTUAL_DIR: &str = "actual";

/// Session directory holding the two documents of one comparison.
pub struct ComparisonSession {
    session_id: String,
    session_path: PathBuf,
}

impl ComparisonSession {
    /// Creates `base_dir/<new session id>`.
    pub fn create(base_dir: &Path) -> Result<Self> {
        let session_id = generate_session_id();
        let session_path = base_dir.join(&session_id);
        std::fs::create_dir_all(&session_path)
            .context("Error initializing comparison session")?;
        tracing::info!(
            session_id = %session_id,
            session_path = %session_path.display(),
            "Comparison session created"
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

    /// Saves both uploads under their own names, in `reference/` and
    /// `actual/` subdirectories so same-named versions do not collide.
    pub fn save_uploaded_files(
        &self,
        reference: &UploadedFile,
        actual: &UploadedFile,
    ) -> Result<(PathBuf, PathBuf)> {
        let reference_path = self.save(REFERENCE_DIR, reference)?;
        let actual_path = self.save(ACTUAL_DIR, actual)?;
        tracing::info!(
            reference = %reference_path.display(),
            actual = %actual_path.display(),
            session_id = %self.session_id,
            "Files saved"
        );
        Ok((reference_path, actual_path))
    }

    fn save(&self, role: &str, file: &UploadedFile) -> Result<PathBuf> {
        let dir = self.session_path.join(role);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(safe_file_name(&file.name));
        std::fs::write(&path, &file.bytes)?;
        Ok(path)
    }
}

/// Formats the two extracted texts as the model input.
pub fn combine_documents(reference_name: &str, reference_text: &str, actual_name: &str, actual_text: &str) -> String {
    format!(
        "Document: {}\n{}\n\nDocument: {}\n{}",
        reference_name, reference_text, actual_name, actual_text
    )
}

/// Extracts `file` with page markers on the blocking pool.
async fn read_with_page_markers(file: &UploadedFile) -> Result<String> {
    let format = DocumentFormat::from_file_name(&file.name).ok_or_else(|| {
        PortalError::InvalidInput(format!(
            "unsupported file type: {} (expected one of: {})",
            file.name,
            SUPPORTED_EXTENSIONS.join(", ")
        ))
    })?;
    let bytes = file.bytes.clone();
    tokio::task::spawn_blocking(move || extract_with_page_markers(&bytes, format))
        .await
        .map_err(|e| PortalError::Ingestion(format!("extraction task failed: {}", e)))?
        .map_err(|source| PortalError::Extract {
            file: file.name.clone(),
            source,
        })
}

pub struct DocumentComparator {
    llm: Arc<dyn ChatModel>,
    parser: OutputFixingParser<Vec<ComparisonRow>>,
    compare_dir: PathBuf,
    keep_latest: usize,
}

impl DocumentComparator {
    pub fn new(llm: Arc<dyn ChatModel>, compare_dir: impl Into<PathBuf>, keep_latest: usize) -> Self {
        Self {
            parser: OutputFixingParser::new(llm.clone()),
            llm,
            compare_dir: compare_dir.into(),
            keep_latest: keep_latest.max(1),
        }
    }

    /// Compares two uploads and returns the page-wise rows plus the
    /// comparison session id.
    ///
    /// Identical extracted texts yield no rows and no model call.
    pub async fn compare(
        &self,
        reference: &UploadedFile,
        actual: &UploadedFile,
    ) -> Result<(Vec<ComparisonRow>, String)> {
        self.run(reference, actual).await.map_err(|e| {
            tracing::error!(error = %e, "Document comparison failed");
            e.context("Document comparison failed")
        })
    }

    async fn run(
        &self,
        reference: &UploadedFile,
        actual: &UploadedFile,
    ) -> Result<(Vec<ComparisonRow>, String)> {
        let session = ComparisonSession::create(&self.compare_dir)?;
        session.save_uploaded_files(reference, actual)?;

        let reference_text = read_with_page_markers(reference).await?;
        let actual_text = read_with_page_markers(actual).await?;

        if let Err(e) = prune_sessions(&self.compare_dir, self.keep_latest, Some(session.session_id())) {
            tracing::warn!(error = %e, "Failed to prune old comparison sessions");
        }

        let session_id = session.session_id().to_string();
        if reference_text == actual_text {
            tracing::info!(session_id = %session_id, "Documents are identical, skipping model call");
            return Ok((Vec::new(), session_id));
        }

        let combined = combine_documents(&reference.name, &reference_text, &actual.name, &actual_text);
        let rows = self.compare_documents(&combined).await?;
        Ok((rows, session_id))
    }

    /// Sends already-combined text to the model and parses the rows.
    pub async fn compare_documents(&self, combined_docs: &str) -> Result<Vec<ComparisonRow>> {
        let instructions = self.parser.format_instructions();
        let messages = template(PromptType::DocumentComparison).render(
            &[
                ("format_instructions", instructions.as_str()),
                ("combined_docs", combined_docs),
            ],
            &[],
        );
        let reply = self.llm.complete(&messages).await?;
        let rows = self.parser.parse(&reply).await?;
        tracing::info!(
            rows = rows.len(),
            changed = rows.iter().filter(|r| !r.is_unchanged()).count(),
            "Document comparison completed"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::ChatMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct RowsModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for RowsModel {
        fn model_name(&self) -> &str {
            "rows"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(messages[1].content.contains("Document: a.txt"));
            Ok(r#"[{"Page":"1","Changes":"Price changed from 10 to 12"},{"Page":"2","Changes":"NO CHANGE"}]"#.to_string())
        }
    }

    struct EmptyRows;

    #[async_trait]
    impl ChatModel for EmptyRows {
        fn model_name(&self) -> &str {
            "empty"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok("[]".to_string())
        }
    }

    fn model() -> Arc<RowsModel> {
        Arc::new(RowsModel {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn combined_format() {
        assert_eq!(
            combine_documents("a.pdf", "one", "b.pdf", "two"),
            "Document: a.pdf\none\n\nDocument: b.pdf\ntwo"
        );
    }

    #[tokio::test]
    async fn identical_documents_skip_model() {
        let tmp = TempDir::new().unwrap();
        let llm = model();
        let comparator = DocumentComparator::new(llm.clone(), tmp.path(), 3);
        let file = UploadedFile::new("a.txt", b"same words".to_vec());
        let (rows, session_id) = comparator.compare(&file, &file).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        let session_dir = tmp.path().join(&session_id);
        assert!(session_dir.join("reference").join("a.txt").exists());
        assert!(session_dir.join("actual").join("a.txt").exists());
    }

    #[tokio::test]
    async fn different_documents_yield_rows() {
        let tmp = TempDir::new().unwrap();
        let llm = model();
        let comparator = DocumentComparator::new(llm.clone(), tmp.path(), 3);
        let (rows, _) = comparator
            .compare(
                &UploadedFile::new("a.txt", b"price 10".to_vec()),
                &UploadedFile::new("b.txt", b"price 12".to_vec()),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_unchanged());
        assert!(rows[1].is_unchanged());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsupported_upload_fails_whole_comparison() {
        let tmp = TempDir::new().unwrap();
        let comparator = DocumentComparator::new(model(), tmp.path(), 3);
        let err = comparator
            .compare(
                &UploadedFile::new("a.txt", b"x".to_vec()),
                &UploadedFile::new("b.xlsx", b"y".to_vec()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn keeps_only_latest_sessions() {
        let tmp = TempDir::new().unwrap();
        for name in ["session_20000101T000000_00000000", "session_20000102T000000_00000000"] {
            std::fs::create_dir(tmp.path().join(name)).unwrap();
        }
        let comparator = DocumentComparator::new(model(), tmp.path(), 1);
        let file = UploadedFile::new("a.txt", b"same".to_vec());
        let (_, session_id) = comparator.compare(&file, &file).await.unwrap();

        let remaining: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining, vec![session_id]);
    }

    #[tokio::test]
    async fn same_named_versions_are_both_kept() {
        let tmp = TempDir::new().unwrap();
        let comparator = DocumentComparator::new(Arc::new(EmptyRows), tmp.path(), 3);
        let (rows, session_id) = comparator
            .compare(
                &UploadedFile::new("contract.txt", b"reference v1".to_vec()),
                &UploadedFile::new("contract.txt", b"actual v2".to_vec()),
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
        let session_dir = tmp.path().join(&session_id);
        assert_eq!(
            std::fs::read(session_dir.join("reference").join("contract.txt")).unwrap(),
            b"reference v1"
        );
        assert_eq!(
            std::fs::read(session_dir.join("actual").join("contract.txt")).unwrap(),
            b"actual v2"
        );
    }

    #[tokio::test]
    async fn zero_keep_latest_still_keeps_current_session() {
        let tmp = TempDir::new().unwrap();
        let comparator = DocumentComparator::new(model(), tmp.path(), 0);
        let file = UploadedFile::new("a.txt", b"same".to_vec());
        let (_, session_id) = comparator.compare(&file, &file).await.unwrap();
        assert!(tmp.path().join(&session_id).is_dir());
    }
}
