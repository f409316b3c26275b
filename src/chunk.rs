//! Overlapping text chunker.
//!
//! Splits loaded documents into [`Chunk`]s of at most `chunk_size` bytes.
//! Splitting prefers paragraph boundaries (`\n\n`); paragraphs longer than a
//! chunk are hard-split at a newline or space. When a chunk is flushed, the
//! next one starts with up to `chunk_overlap` bytes taken from the end of the
//! previous chunk (cut at a word boundary) so that context spanning the
//! boundary is retrievable from either side.
//!
//! Each chunk carries its source file name, page number, a position index
//! and a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, LoadedDocument};

/// Split every document and number the chunks contiguously from 0.
pub fn chunk_documents(
    docs: &[LoadedDocument],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    for doc in docs {
        for piece in split_text(&doc.text, chunk_size, chunk_overlap) {
            chunks.push(make_chunk(doc, index, &piece));
            index += 1;
        }
    }
    chunks
}

/// Split text into overlapping pieces no longer than `chunk_size` bytes.
///
/// Whitespace-only input yields no pieces. `chunk_overlap` is clamped below
/// `chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let max = chunk_size.max(1);
    let overlap = chunk_overlap.min(max - 1);
    // Leave room for a carried tail plus the separator in front of hard-split pieces.
    let piece_max = if overlap > 0 {
        max.saturating_sub(overlap + 2).max(1)
    } else {
        max
    };

    let mut units: Vec<&str> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() <= max {
            units.push(trimmed);
        } else {
            hard_split(trimmed, piece_max, &mut units);
        }
    }

    let mut out = Vec::new();
    let mut buf = String::new();
    // Whether buf holds anything beyond the tail carried from the last chunk.
    let mut has_new = false;

    for unit in units {
        let would_be = if buf.is_empty() {
            unit.len()
        } else {
            buf.len() + 2 + unit.len()
        };

        if would_be > max {
            if has_new {
                out.push(buf.clone());
                let tail = overlap_tail(&buf, overlap).to_string();
                buf.clear();
                if !tail.is_empty() && tail.len() + 2 + unit.len() <= max {
                    buf.push_str(&tail);
                }
            } else {
                buf.clear();
            }
            has_new = false;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(unit);
        has_new = true;
    }

    if has_new {
        out.push(buf);
    }

    out
}

/// Hard-split an over-long paragraph, preferring newline then space boundaries.
fn hard_split<'a>(text: &'a str, max: usize, out: &mut Vec<&'a str>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = floor_char_boundary(remaining, remaining.len().min(max));
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        // A single character wider than `max` still has to make progress.
        let actual_split = if actual_split == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            actual_split
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = &remaining[actual_split..];
    }
}

/// The last `overlap` bytes of `text`, advanced to the next word start.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 || text.is_empty() {
        return "";
    }
    let start = ceil_char_boundary(text, text.len().saturating_sub(overlap));
    let tail = &text[start..];
    if start == 0 {
        return tail.trim();
    }
    match tail.find(char::is_whitespace) {
        Some(ws) if !tail[ws..].trim().is_empty() => tail[ws..].trim(),
        _ => tail.trim(),
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn make_chunk(doc: &LoadedDocument, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: doc.source.clone(),
        page: doc.page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
