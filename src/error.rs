//! Error type shared by every component of the portal.
//!
//! Failures are returned as [`PortalError`] values. Component boundaries wrap
//! the underlying failure with a short context message via
//! [`ResultExt::context`], so the rendered error reads as a chain from the
//! operation that failed down to the root cause:
//!
//! ```text
//! Failed to ingest files: ingestion error: No valid documents loaded for ingestion
//! ```
//!
//! [`PortalError::kind`] looks through any number of context wrappers and
//! reports the kind of the innermost error, which the HTTP layer uses to pick
//! a status code.

use thiserror::Error;

use crate::extract::ExtractError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PortalError>;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("failed to extract text from {file}: {source}")]
    Extract {
        file: String,
        #[source]
        source: ExtractError,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PortalError>,
    },
}

/// Coarse classification of a [`PortalError`], independent of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Ingestion,
    Parse,
    NotFound,
    InvalidInput,
    Model,
    Internal,
}

impl PortalError {
    /// Returns the kind of the innermost (root) error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::Config(_) | PortalError::MissingCredentials(_) | PortalError::Yaml(_) => {
                ErrorKind::Config
            }
            PortalError::Ingestion(_) | PortalError::Extract { .. } => ErrorKind::Ingestion,
            PortalError::Parse(_) => ErrorKind::Parse,
            PortalError::NotFound(_) => ErrorKind::NotFound,
            PortalError::InvalidInput(_) => ErrorKind::InvalidInput,
            PortalError::Model(_) | PortalError::Http(_) => ErrorKind::Model,
            PortalError::Io(_) | PortalError::Json(_) => ErrorKind::Internal,
            PortalError::Context { source, .. } => source.kind(),
        }
    }

    /// Returns the innermost error, skipping context wrappers.
    pub fn root(&self) -> &PortalError {
        match self {
            PortalError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wraps `self` with a context message.
    pub fn context(self, context: impl Into<String>) -> PortalError {
        PortalError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Adds context wrapping to `Result`s whose error converts into [`PortalError`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PortalError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
