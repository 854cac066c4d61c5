//! Persisted index state: which revision and file contents the store reflects.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Schema version written by this build.
pub const STATE_VERSION: u32 = 1;

/// Snapshot of what the store holds, written after every successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Revision the last pass reconciled against.
    pub revision: Option<String>,
    /// Indexed files keyed by repository-relative path.
    pub files: BTreeMap<String, FileRecord>,
    pub updated_at: DateTime<Utc>,
    pub total_chunks: usize,
    pub total_files: usize,
    /// Paths to re-examine on the next incremental pass even if the VCS
    /// delta no longer lists them.
    #[serde(default)]
    pub recheck: BTreeSet<String>,
    /// Dense vector length of the collections this state was written against.
    #[serde(default)]
    pub vector_size: Option<u64>,
}

/// What the store holds for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: String,
    pub chunks: usize,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            revision: None,
            files: BTreeMap::new(),
            updated_at: Utc::now(),
            total_chunks: 0,
            total_files: 0,
            recheck: BTreeSet::new(),
            vector_size: None,
        }
    }
}

impl IndexState {
    /// Recompute the totals from `files`.
    pub fn refresh_totals(&mut self) {
        self.total_files = self.files.len();
        self.total_chunks = self.files.values().map(|f| f.chunks).sum();
    }

    /// Load state from `path`.
    ///
    /// Missing, unreadable, corrupt or newer-schema state all yield `None`
    /// so the caller runs a full pass.
    pub async fn load(path: &Path) -> Option<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "index state unreadable, rebuilding: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<Self>(&bytes) {
            Ok(state) if state.version > STATE_VERSION => {
                tracing::warn!(
                    path = %path.display(),
                    version = state.version,
                    "index state written by a newer version, rebuilding"
                );
                None
            }
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), "index state corrupt, rebuilding: {e}");
                None
            }
        }
    }

    /// Atomically replace the state file (write to a sibling temp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
