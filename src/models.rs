//! Core data models used throughout the portal.
//!
//! These types represent uploads, loaded documents, chunks, and the
//! structured results returned by the analyzer and comparator.

use serde::{Deserialize, Serialize};

/// An uploaded file: original name plus raw bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lower-cased extension without the leading dot, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Text loaded from one file, or one page of a PDF.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    /// Original upload name.
    pub source: String,
    /// Path the upload was saved under.
    pub saved_path: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
}

/// A chunk of a loaded document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Structured metadata extracted from a document by the analyzer.
///
/// Field names are part of the HTTP contract and match the keys the model is
/// asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "Summary", default)]
    pub summary: Vec<String>,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "DateCreated")]
    pub date_created: String,
    #[serde(rename = "LastModifiedDate", alias = "LateModifiedDate")]
    pub last_modified_date: String,
    #[serde(rename = "Publisher")]
    pub publisher: String,
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "PageCount")]
    pub page_count: PageCount,
    #[serde(rename = "SentimentTone")]
    pub sentiment_tone: String,
}

/// Page count as reported by the model: a number, or free text such as
/// `"Not Available"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCount {
    Count(u64),
    Text(String),
}

/// One row of a document comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    #[serde(rename = "Page")]
    pub page: String,
    #[serde(rename = "Changes")]
    pub changes: String,
}

impl ComparisonRow {
    /// Whether the row reports no difference for its page.
    pub fn is_unchanged(&self) -> bool {
        let c = self.changes.trim();
        c.is_empty() || c.eq_ignore_ascii_case("no change")
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to, or received from, a chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
