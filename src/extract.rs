//! Format-specific text loaders for uploaded documents.
//!
//! Supported formats are PDF, DOCX, plain text and Markdown, chosen by file
//! extension. PDFs are read page by page; every other format yields a single
//! page. Extraction never panics on malformed input: it returns an
//! [`ExtractError`] and the caller decides whether to skip the file or fail.

use std::io::Read;

/// Extensions accepted for ingestion, lower-case and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx", "md"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl DocumentFormat {
    /// Maps a file extension (case-insensitive, without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "txt" => Some(DocumentFormat::Text),
            "md" => Some(DocumentFormat::Markdown),
            _ => None,
        }
    }

    /// Maps a file name to a format using its extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Text => "txt",
            DocumentFormat::Markdown => "md",
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts text page by page. Non-paginated formats return one entry.
pub fn extract_pages(bytes: &[u8], format: DocumentFormat) -> Result<Vec<String>, ExtractError> {
    match format {
        DocumentFormat::Pdf => extract_pdf_pages(bytes),
        DocumentFormat::Docx => extract_docx(bytes).map(|t| vec![t]),
        DocumentFormat::Text | DocumentFormat::Markdown => {
            Ok(vec![String::from_utf8_lossy(bytes).into_owned()])
        }
    }
}

/// Extracts the document with a `--- Page N ---` marker before every page.
pub fn extract_with_page_markers(
    bytes: &[u8],
    format: DocumentFormat,
) -> Result<String, ExtractError> {
    let pages = extract_pages(bytes, format)?;
    Ok(pages
        .iter()
        .enumerate()
        .map(|(i, text)| format!("\n--- Page {} ---\n{}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // lopdf gives per-page text; pdf-extract copes with more font encodings
    // but only returns the whole document, so it is the fallback.
    if let Ok(doc) = lopdf::Document::load_mem(bytes) {
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        let mut ok = !page_numbers.is_empty();
        for n in &page_numbers {
            match doc.extract_text(&[*n]) {
                Ok(text) => pages.push(text),
                Err(_) => {
                    ok = false;
                    break;
                }
            }
        }
        if ok && pages.iter().any(|p| !p.trim().is_empty()) {
            return Ok(pages);
        }
    }

    pdf_extract::extract_text_from_mem(bytes)
        .map(|text| vec![text])
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collects `<w:t>` runs, one output line per `<w:p>` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    paragraphs.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}
