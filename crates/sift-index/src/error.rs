//! Error types for sift-index.

use std::num::TryFromIntError;
use std::path::PathBuf;

use sift_store::VectorStoreError;

/// Errors that can occur while indexing or searching.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or index state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store unreachable or rejected an operation. Aborts a reconciliation pass.
    #[error("store error: {0}")]
    Store(#[from] VectorStoreError),

    /// Malformed source that tree-sitter could not parse cleanly.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language for {0}")]
    UnsupportedLanguage(String),

    /// Embedding collaborator failed for a file or query.
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    /// Version-control collaborator failed.
    #[error("change detection failed: {0:#}")]
    Vcs(anyhow::Error),

    /// Another reconciliation holds the advisory lock.
    #[error("reconciliation already running (lock file {})", .0.display())]
    Locked(PathBuf),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Config file could not be parsed.
    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether this error must abort the whole reconciliation pass instead of
    /// being recorded against a single file.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Locked(_))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
