//! Version-control change detection.
//!
//! The indexer asks a [`ChangeDetector`] which files changed since the
//! revision recorded in its state. [`GitChangeDetector`] answers by shelling
//! out to `git`.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use sift_store::BoxFuture;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

/// One changed path. `old_path` is set for renames and copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old_path: Option<String>,
}

impl FileChange {
    #[must_use]
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            old_path: None,
        }
    }

    #[must_use]
    pub fn renamed(old_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Renamed,
            old_path: Some(old_path.into()),
        }
    }
}

/// Source of truth for the file set, deltas between revisions and content
/// fingerprints. Paths are relative to the repository root, `/`-separated.
pub trait ChangeDetector: Send + Sync {
    /// Current revision identifier, or `None` in a repository with no commits.
    fn current_revision(&self) -> BoxFuture<'_, anyhow::Result<Option<String>>>;

    /// Changes between `revision` and the working tree, including untracked files.
    fn changes_since<'a>(
        &'a self,
        revision: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<FileChange>>>;

    /// Tracked (and untracked, not ignored) files whose extension is in `extensions`.
    fn tracked_files<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>>;

    /// Content fingerprint, or `None` if the file does not exist.
    fn content_hash<'a>(&'a self, path: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
}

/// Hex blake3 digest of `bytes`.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// [`ChangeDetector`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitChangeDetector {
    root: PathBuf,
}

impl GitChangeDetector {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("failed to run git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn head(&self) -> anyhow::Result<Option<String>> {
        match self.git(&["rev-parse", "--verify", "-q", "HEAD"]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(e) => {
                // `--verify -q` fails silently on an unborn branch
                self.git(&["rev-parse", "--git-dir"]).await?;
                tracing::debug!("no HEAD revision yet: {e:#}");
                Ok(None)
            }
        }
    }

    async fn diff(&self, revision: &str) -> anyhow::Result<Vec<FileChange>> {
        let out = self
            .git(&["diff", "--name-status", "-z", "-M", "--no-color", revision, "--"])
            .await?;
        let mut changes = parse_name_status(&out)?;
        let untracked = self
            .git(&["ls-files", "-z", "--others", "--exclude-standard"])
            .await?;
        changes.extend(
            split_nul(&untracked).map(|path| FileChange::new(path, ChangeKind::Added)),
        );
        Ok(changes)
    }

    async fn files(&self, extensions: &[&str]) -> anyhow::Result<Vec<String>> {
        let out = self
            .git(&["ls-files", "-z", "--cached", "--others", "--exclude-standard"])
            .await?;
        let mut files: Vec<String> = split_nul(&out)
            .filter(|l| has_extension(l, extensions))
            .filter(|l| self.root.join(l).is_file())
            .map(str::to_string)
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }
}

impl ChangeDetector for GitChangeDetector {
    fn current_revision(&self) -> BoxFuture<'_, anyhow::Result<Option<String>>> {
        Box::pin(self.head())
    }

    fn changes_since<'a>(
        &'a self,
        revision: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<FileChange>>> {
        Box::pin(self.diff(revision))
    }

    fn tracked_files<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>> {
        Box::pin(self.files(extensions))
    }

    fn content_hash<'a>(&'a self, path: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(async move {
            match tokio::fs::read(self.root.join(path)).await {
                Ok(bytes) => Ok(Some(hash_bytes(&bytes))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e).with_context(|| format!("failed to read {path}")),
            }
        })
    }
}

/// Whether `path` ends in one of `extensions` (without the dot).
#[must_use]
pub fn has_extension(path: &str, extensions: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

/// Non-empty fields of NUL-separated git output (`-z`), where paths are
/// never quoted.
fn split_nul(output: &str) -> impl Iterator<Item = &str> {
    output.split('\0').filter(|field| !field.is_empty())
}

/// Parse `git diff --name-status -z` output: a status field followed by one
/// path, or two for renames and copies.
///
/// # Errors
///
/// Returns an error on a status field with a missing path.
pub fn parse_name_status(output: &str) -> anyhow::Result<Vec<FileChange>> {
    let mut changes = Vec::new();
    let mut fields = split_nul(output);
    while let Some(status) = fields.next() {
        let first = fields
            .next()
            .with_context(|| format!("missing path after status {status}"))?;
        let change = match status.chars().next() {
            Some('A') => FileChange::new(first, ChangeKind::Added),
            Some('D') => FileChange::new(first, ChangeKind::Deleted),
            Some('R' | 'C') => {
                let second = fields
                    .next()
                    .with_context(|| format!("missing target path for {status} {first}"))?;
                let mut change = FileChange::renamed(first, second);
                if status.starts_with('C') {
                    change.kind = ChangeKind::Copied;
                }
                change
            }
            // M, T (type change), U (unmerged)
            _ => FileChange::new(first, ChangeKind::Modified),
        };
        changes.push(change);
    }
    Ok(changes)
}
