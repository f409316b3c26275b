//! Session identifiers and the per-session directory layout.
//!
//! Every artifact the portal writes lives under a session directory:
//!
//! ```text
//! upload_base/<session_id>/<8 hex>.<ext>     saved uploads
//! index_base/<session_id>/<index_name>.*     vector index
//! ```
//!
//! Generated ids look like `session_20250101T120000_1a2b3c4d` (UTC) and sort
//! chronologically by name. Caller-supplied ids are accepted only when they
//! cannot escape the base directory.

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{PortalError, Result};
use crate::models::UploadedFile;

/// Prefix of every generated session id.
pub const SESSION_PREFIX: &str = "session_";

/// Returns a new id of the form `session_<YYYYmmddTHHMMSS>_<8 hex>`.
pub fn generate_session_id() -> String {
    format!(
        "{}{}_{}",
        SESSION_PREFIX,
        Utc::now().format("%Y%m%dT%H%M%S"),
        short_hex()
    )
}

/// Checks that `id` is safe to use as a single path component.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PortalError::InvalidInput(format!("invalid session id: {:?}", id)))
    }
}

/// Uses the caller's id after validation, or generates a fresh one.
pub fn resolve_session_id(id: Option<&str>) -> Result<String> {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => {
            validate_session_id(id)?;
            Ok(id.to_string())
        }
        None => Ok(generate_session_id()),
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Upload and index directories for one ingestion or query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub session_id: String,
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl SessionPaths {
    /// Computes the directories without touching the filesystem.
    ///
    /// With `use_session_dirs` off the bases are used directly and the
    /// session id only labels log lines and responses.
    pub fn new(
        upload_base: &Path,
        index_base: &Path,
        session_id: impl Into<String>,
        use_session_dirs: bool,
    ) -> Self {
        let session_id = session_id.into();
        let (upload_dir, index_dir) = if use_session_dirs {
            (upload_base.join(&session_id), index_base.join(&session_id))
        } else {
            (upload_base.to_path_buf(), index_base.to_path_buf())
        };
        Self {
            session_id,
            upload_dir,
            index_dir,
        }
    }

    /// Creates both directories if they do not exist.
    pub fn create_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.index_dir)?;
        Ok(())
    }
}

/// Writes `file` into `dir` as `<8 hex>.<ext>` and returns the saved path.
pub fn save_upload(dir: &Path, file: &UploadedFile) -> Result<PathBuf> {
    let name = match file.extension() {
        Some(ext) => format!("{}.{}", short_hex(), ext),
        None => short_hex(),
    };
    let path = dir.join(name);
    std::fs::write(&path, &file.bytes)?;
    Ok(path)
}

/// Removes all but the `keep_latest` newest generated session directories
/// under `base`. Returns the removed paths.
///
/// Only directories whose name starts with [`SESSION_PREFIX`] are
/// considered; anything else under `base` is left alone. The session named
/// `current` is never removed and counts toward `keep_latest`.
pub fn prune_sessions(base: &Path, keep_latest: usize, current: Option<&str>) -> Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions: Vec<PathBuf> = Vec::new();
    let mut current_present = false;
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if current == Some(name.as_str()) {
            current_present = true;
        } else if name.starts_with(SESSION_PREFIX) {
            sessions.push(entry.path());
        }
    }

    // Newest first: generated names embed a sortable timestamp.
    sessions.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let keep = keep_latest.saturating_sub(usize::from(current_present));
    let stale = sessions.split_off(keep.min(sessions.len()));
    for dir in &stale {
        std::fs::remove_dir_all(dir)?;
        tracing::info!(path = %dir.display(), "Removed old session directory");
    }
    Ok(stale)
}
