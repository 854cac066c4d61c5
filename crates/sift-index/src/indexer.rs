//! Incremental reconciliation: persisted state + VCS delta → store operations.
//!
//! Each file's chunk set is replaced as a unit (embed first, then delete the
//! old points, then upsert the new ones). A failed file keeps its previous
//! record and is retried on the next pass; a store failure aborts the pass
//! without persisting state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_store::{FieldCondition, Payload, VectorFilter, VectorPoint, VectorStore};
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::change::{ChangeDetector, ChangeKind, FileChange, has_extension};
use crate::chunker::{Chunk, FileOverview, chunk_file};
use crate::config::IndexConfig;
use crate::context::contextualize_for_embedding;
use crate::embed::{EmbedPool, Embedders};
use crate::error::{IndexError, Result};
use crate::languages::{detect_language, indexable_extensions};
use crate::state::{FileRecord, IndexState};

/// Upper bound on points scrolled for a single file during a rename.
const SCROLL_LIMIT: u32 = 10_000;

/// Summary of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Whether the pass enumerated every tracked file.
    pub full: bool,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_renamed: usize,
    pub files_unchanged: usize,
    pub chunks_added: usize,
    pub chunks_deleted: usize,
    /// `path: error` for every file that failed and will be retried.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ReconcileReport {
    #[must_use]
    pub fn files_changed(&self) -> usize {
        self.files_added + self.files_modified + self.files_deleted + self.files_renamed
    }
}

/// Per-path structural overviews, rebuilt lazily and dropped on every pass.
#[derive(Debug, Default)]
pub struct OverviewCache {
    entries: RwLock<HashMap<String, FileOverview>>,
}

impl OverviewCache {
    #[must_use]
    pub fn get(&self, path: &str) -> Option<FileOverview> {
        self.entries.read().ok()?.get(path).cloned()
    }

    pub fn insert(&self, path: &str, overview: FileOverview) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path.to_string(), overview);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owner record written into the lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// On-disk half of the reconciliation lock. Removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Take the lock, reclaiming it first if its owner is gone or it is older
    /// than `stale_after`.
    fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        match Self::create(path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        if !lock_is_stale(path, stale_after) {
            return Err(IndexError::Locked(path.to_path_buf()));
        }
        tracing::warn!(path = %path.display(), "reclaiming stale reconciliation lock");
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(IndexError::Locked(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let lock = Self {
            path: path.to_path_buf(),
        };
        let owner = LockOwner {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        serde_json::to_writer(file, &owner)?;
        Ok(lock)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove lock file: {e}");
        }
    }
}

/// A lock is stale when its owning process has exited or it has been held
/// longer than `stale_after`. Unparseable locks age by modification time.
fn lock_is_stale(path: &Path, stale_after: Duration) -> bool {
    let owner = std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockOwner>(&bytes).ok());
    let age = match &owner {
        Some(owner) if !process_alive(owner.pid) => return true,
        Some(owner) => (Utc::now() - owner.acquired_at).to_std().unwrap_or_default(),
        None => std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .unwrap_or_default(),
    };
    age > stale_after
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

struct PassGuard<'a> {
    _mutex: MutexGuard<'a, ()>,
    _file: LockFile,
}

/// Result of replacing one file's chunk set.
struct Replaced {
    added: usize,
    deleted: usize,
}

/// Keeps the vector store synchronized with a source tree.
pub struct IncrementalIndexer {
    root: PathBuf,
    store: Arc<dyn VectorStore>,
    detector: Arc<dyn ChangeDetector>,
    embedders: Embedders,
    pool: EmbedPool,
    config: IndexConfig,
    pass_lock: Mutex<()>,
    dimension: OnceCell<u64>,
    overviews: OverviewCache,
}

impl IncrementalIndexer {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<dyn VectorStore>,
        detector: Arc<dyn ChangeDetector>,
        embedders: Embedders,
        config: IndexConfig,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            detector,
            embedders,
            pool: EmbedPool::new(config.embed_concurrency),
            config,
            pass_lock: Mutex::new(()),
            dimension: OnceCell::new(),
            overviews: OverviewCache::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join(&self.config.state_path)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.state_path().with_file_name("reconcile.lock")
    }

    #[must_use]
    pub fn overviews(&self) -> &OverviewCache {
        &self.overviews
    }

    /// Currently persisted state, if any usable state exists.
    pub async fn state(&self) -> Option<IndexState> {
        IndexState::load(&self.state_path()).await
    }

    /// Structural overview of `path`, from the cache or by re-chunking the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has no grammar, or fails to parse.
    pub async fn file_overview(&self, path: &str) -> Result<FileOverview> {
        if let Some(overview) = self.overviews.get(path) {
            return Ok(overview);
        }
        let source = tokio::fs::read_to_string(self.root.join(path)).await?;
        let lang = detect_language(Path::new(path))
            .ok_or_else(|| IndexError::UnsupportedLanguage(path.to_string()))?;
        let chunked = chunk_file(&source, path, lang, &self.config.chunker)?;
        self.overviews.insert(path, chunked.overview.clone());
        Ok(chunked.overview)
    }

    /// Run one reconciliation pass.
    ///
    /// With `force_full` or without usable state every tracked file is
    /// re-indexed; otherwise only the VCS delta plus the retry set is examined.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Locked`] if another pass holds the lock,
    /// [`IndexError::Store`] if the store fails (state is not persisted), or
    /// [`IndexError::Vcs`] if the file set cannot be enumerated.
    pub async fn reconcile(&self, force_full: bool) -> Result<ReconcileReport> {
        let _guard = self.acquire()?;
        let start = Instant::now();
        self.overviews.clear();

        let previous = IndexState::load(&self.state_path()).await;
        self.ensure_collections(previous.as_ref().and_then(|s| s.vector_size))
            .await?;
        let previous = previous.filter(|_| !force_full);
        let revision = self
            .detector
            .current_revision()
            .await
            .map_err(IndexError::Vcs)?;

        let mut report = ReconcileReport::default();
        let mut state = match previous {
            Some(prev) => {
                let delta = match &prev.revision {
                    Some(rev) => match self.detector.changes_since(rev).await {
                        Ok(changes) => Some(changes),
                        Err(e) => {
                            tracing::warn!("change detection failed, falling back to full pass: {e:#}");
                            None
                        }
                    },
                    None => None,
                };
                match delta {
                    Some(changes) => self.incremental_pass(prev, changes, &mut report).await?,
                    None => self.full_pass(&prev.files, &mut report).await?,
                }
            }
            None => self.full_pass(&BTreeMap::new(), &mut report).await?,
        };

        state.revision = revision;
        self.finish(&mut state, &mut report, start).await?;
        Ok(report)
    }

    /// Reconcile an explicit set of paths (e.g. from the file watcher).
    ///
    /// Each path is re-hashed; changed files are replaced, missing files are
    /// removed. Falls back to [`reconcile`](Self::reconcile) when no state
    /// has been persisted yet.
    ///
    /// # Errors
    ///
    /// Same as [`reconcile`](Self::reconcile).
    pub async fn reconcile_paths(&self, paths: &[String]) -> Result<ReconcileReport> {
        let guard = self.acquire()?;
        let Some(mut state) = IndexState::load(&self.state_path()).await else {
            drop(guard);
            return self.reconcile(false).await;
        };

        let start = Instant::now();
        self.overviews.clear();
        self.ensure_collections(state.vector_size).await?;

        let exts = indexable_extensions();
        let mut report = ReconcileReport::default();
        let mut failures = BTreeSet::new();
        let changes: Vec<FileChange> = paths
            .iter()
            .filter(|p| has_extension(p, &exts))
            .map(|p| FileChange::new(p.as_str(), ChangeKind::Modified))
            .collect();
        for change in &changes {
            self.apply_change(change, &mut state.files, &mut report, &mut failures)
                .await?;
        }
        state.recheck.extend(failures);
        self.finish(&mut state, &mut report, start).await?;
        Ok(report)
    }

    fn acquire(&self) -> Result<PassGuard<'_>> {
        let lock_path = self.lock_path();
        let mutex = self
            .pass_lock
            .try_lock()
            .map_err(|_| IndexError::Locked(lock_path.clone()))?;
        let stale_after = Duration::from_secs(self.config.stale_lock_secs);
        let file = LockFile::acquire(&lock_path, stale_after)?;
        Ok(PassGuard {
            _mutex: mutex,
            _file: file,
        })
    }

    /// Create both collections once per indexer. The vector size comes from
    /// config, then the persisted state; only a first-ever pass asks the
    /// embedder.
    async fn ensure_collections(&self, recorded: Option<u64>) -> Result<u64> {
        self.dimension
            .get_or_try_init(|| async {
                let dim = match self.config.vector_size.or(recorded) {
                    Some(dim) => dim,
                    None => self.embedders.dense_dimension().await?,
                };
                self.store
                    .ensure_collection(&self.config.chunk_collection, dim)
                    .await?;
                self.store
                    .ensure_collection(&self.config.symbol_collection, dim)
                    .await?;
                Ok::<_, IndexError>(dim)
            })
            .await
            .copied()
    }

    async fn finish(
        &self,
        state: &mut IndexState,
        report: &mut ReconcileReport,
        start: Instant,
    ) -> Result<()> {
        state.updated_at = Utc::now();
        state.vector_size = self.dimension.get().copied();
        state.refresh_totals();
        state.save(&self.state_path()).await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            full = report.full,
            added = report.files_added,
            modified = report.files_modified,
            deleted = report.files_deleted,
            renamed = report.files_renamed,
            unchanged = report.files_unchanged,
            chunks_added = report.chunks_added,
            chunks_deleted = report.chunks_deleted,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "reconciliation complete"
        );
        Ok(())
    }

    /// Index every tracked file, skipping those whose hash matches `known`,
    /// then sweep store points belonging to untracked paths.
    async fn full_pass(
        &self,
        known: &BTreeMap<String, FileRecord>,
        report: &mut ReconcileReport,
    ) -> Result<IndexState> {
        report.full = true;
        let exts = indexable_extensions();
        let tracked = self
            .detector
            .tracked_files(&exts)
            .await
            .map_err(IndexError::Vcs)?;
        let total = tracked.len();
        tracing::info!(total, "full reconciliation started");

        let mut state = IndexState::default();
        for (i, path) in tracked.iter().enumerate() {
            let hash = match self.detector.content_hash(path).await {
                Ok(Some(hash)) => hash,
                Ok(None) => continue,
                Err(e) => {
                    report.errors.push(format!("{path}: {e:#}"));
                    state.recheck.insert(path.clone());
                    if let Some(record) = known.get(path) {
                        state.files.insert(path.clone(), record.clone());
                    }
                    continue;
                }
            };
            if let Some(record) = known.get(path)
                && record.hash == hash
            {
                tracing::debug!(file = %path, "unchanged, skipping");
                report.files_unchanged += 1;
                state.files.insert(path.clone(), record.clone());
                continue;
            }

            match self.replace_file(path).await {
                Ok(replaced) => {
                    if known.contains_key(path) {
                        report.files_modified += 1;
                    } else {
                        report.files_added += 1;
                    }
                    report.chunks_added += replaced.added;
                    report.chunks_deleted += replaced.deleted;
                    state.files.insert(
                        path.clone(),
                        FileRecord {
                            hash,
                            chunks: replaced.added,
                        },
                    );
                    tracing::info!(
                        file = %path,
                        progress = format_args!("{}/{total}", i + 1),
                        chunks = replaced.added,
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(file = %path, "indexing failed: {e:#}");
                    report.errors.push(format!("{path}: {e:#}"));
                    state.recheck.insert(path.clone());
                    if let Some(record) = known.get(path) {
                        state.files.insert(path.clone(), record.clone());
                    }
                }
            }
        }

        let keep: BTreeSet<&str> = state
            .files
            .keys()
            .chain(state.recheck.iter())
            .map(String::as_str)
            .collect();
        report.files_deleted += known
            .keys()
            .filter(|p| !keep.contains(p.as_str()))
            .count();
        let orphans = VectorFilter {
            must: Vec::new(),
            must_not: vec![FieldCondition::any(
                "file_path",
                keep.into_iter().map(str::to_string).collect(),
            )],
        };
        let swept = self.delete_matching(orphans).await?;
        if swept > 0 {
            tracing::info!(chunks = swept, "removed chunks of untracked files");
        }
        report.chunks_deleted += swept;
        Ok(state)
    }

    async fn incremental_pass(
        &self,
        prev: IndexState,
        changes: Vec<FileChange>,
        report: &mut ReconcileReport,
    ) -> Result<IndexState> {
        let exts = indexable_extensions();
        let mut delta: BTreeMap<String, FileChange> = BTreeMap::new();
        for change in changes {
            for change in normalize_change(change, &exts) {
                delta.insert(change.path.clone(), change);
            }
        }
        // Paths in the working-tree delta stay on the retry list so a later
        // revert (which drops out of the diff) still gets re-hashed.
        let vcs_paths: Vec<String> = delta.keys().cloned().collect();
        for path in &prev.recheck {
            delta
                .entry(path.clone())
                .or_insert_with(|| FileChange::new(path.as_str(), ChangeKind::Modified));
        }
        tracing::info!(candidates = delta.len(), "incremental reconciliation started");

        let mut state = prev;
        let mut failures = BTreeSet::new();
        for change in delta.values() {
            self.apply_change(change, &mut state.files, report, &mut failures)
                .await?;
        }
        state.recheck = vcs_paths.into_iter().chain(failures).collect();
        Ok(state)
    }

    async fn apply_change(
        &self,
        change: &FileChange,
        files: &mut BTreeMap<String, FileRecord>,
        report: &mut ReconcileReport,
        failures: &mut BTreeSet<String>,
    ) -> Result<()> {
        let path = change.path.as_str();
        if change.kind == ChangeKind::Deleted {
            return self.remove_file(path, files, report).await;
        }

        let hash = match self.detector.content_hash(path).await {
            Ok(Some(hash)) => hash,
            Ok(None) => return self.remove_file(path, files, report).await,
            Err(e) => {
                report.errors.push(format!("{path}: {e:#}"));
                failures.insert(path.to_string());
                return Ok(());
            }
        };

        if change.kind == ChangeKind::Renamed
            && let Some(old) = change.old_path.as_deref()
            && let Some(record) = files.get(old)
        {
            if record.hash == hash {
                let record = record.clone();
                let patched = self.rename_file(old, path).await?;
                tracing::info!(from = old, to = path, chunks = patched, "renamed without re-embedding");
                files.remove(old);
                files.insert(path.to_string(), record);
                report.files_renamed += 1;
                return Ok(());
            }
            self.remove_file(old, files, report).await?;
        }

        if files.get(path).is_some_and(|r| r.hash == hash) {
            tracing::debug!(file = path, "content unchanged, skipping");
            report.files_unchanged += 1;
            return Ok(());
        }

        match self.replace_file(path).await {
            Ok(replaced) => {
                let previous = files.insert(
                    path.to_string(),
                    FileRecord {
                        hash,
                        chunks: replaced.added,
                    },
                );
                if previous.is_some() {
                    report.files_modified += 1;
                } else {
                    report.files_added += 1;
                }
                report.chunks_added += replaced.added;
                report.chunks_deleted += replaced.deleted;
                tracing::info!(file = path, chunks = replaced.added, "reindexed");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(file = path, "indexing failed: {e:#}");
                report.errors.push(format!("{path}: {e:#}"));
                failures.insert(path.to_string());
                Ok(())
            }
        }
    }

    async fn remove_file(
        &self,
        path: &str,
        files: &mut BTreeMap<String, FileRecord>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if files.remove(path).is_none() {
            return Ok(());
        }
        let deleted = self.delete_matching(file_filter(path)).await?;
        tracing::info!(file = path, chunks = deleted, "removed");
        report.files_deleted += 1;
        report.chunks_deleted += deleted;
        Ok(())
    }

    /// Chunk, embed, then swap the file's points. Nothing in the store is
    /// touched unless chunking and embedding both succeed.
    async fn replace_file(&self, path: &str) -> Result<Replaced> {
        let source = tokio::fs::read_to_string(self.root.join(path)).await?;
        let lang = detect_language(Path::new(path))
            .ok_or_else(|| IndexError::UnsupportedLanguage(path.to_string()))?;
        let chunked = chunk_file(&source, path, lang, &self.config.chunker)?;

        let texts: Vec<String> = chunked
            .chunks
            .iter()
            .map(contextualize_for_embedding)
            .collect();
        let vectors = self.pool.embed_all(&self.embedders, &texts).await?;

        let mut chunk_points = Vec::with_capacity(chunked.chunks.len());
        let mut symbol_points = Vec::new();
        for (chunk, vectors) in chunked.chunks.iter().zip(vectors) {
            let point = VectorPoint {
                id: chunk.id.clone(),
                vectors,
                payload: chunk_payload(chunk)?,
            };
            if chunk.kind.is_definition() {
                symbol_points.push(point.clone());
            }
            chunk_points.push(point);
        }

        let deleted = self.delete_matching(file_filter(path)).await?;
        let added = chunk_points.len();
        self.store
            .upsert(&self.config.chunk_collection, chunk_points)
            .await?;
        if !symbol_points.is_empty() {
            self.store
                .upsert(&self.config.symbol_collection, symbol_points)
                .await?;
        }
        self.overviews.insert(path, chunked.overview);
        Ok(Replaced { added, deleted })
    }

    /// Move the file's points to `new_path` in both collections, re-keyed
    /// for the new path and keeping their vectors.
    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<usize> {
        let mut moved = 0;
        for collection in self.collections() {
            let points = self
                .store
                .scroll_points(collection, file_filter(old_path), SCROLL_LIMIT)
                .await?;
            if points.is_empty() {
                continue;
            }
            let relocated = points
                .into_iter()
                .map(|point| relocate_point(point, new_path))
                .collect::<Result<Vec<_>>>()?;
            if collection == self.config.chunk_collection {
                moved = relocated.len();
            }
            self.store.upsert(collection, relocated).await?;
            self.store.delete(collection, file_filter(old_path)).await?;
        }
        Ok(moved)
    }

    /// Delete matching points from both collections; returns the count removed
    /// from the chunk collection.
    async fn delete_matching(&self, filter: VectorFilter) -> Result<usize> {
        let removed = self
            .store
            .delete(&self.config.chunk_collection, filter.clone())
            .await?;
        self.store
            .delete(&self.config.symbol_collection, filter)
            .await?;
        Ok(usize::try_from(removed)?)
    }

    fn collections(&self) -> [&str; 2] {
        [
            self.config.chunk_collection.as_str(),
            self.config.symbol_collection.as_str(),
        ]
    }
}

impl std::fmt::Debug for IncrementalIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalIndexer")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

fn file_filter(path: &str) -> VectorFilter {
    VectorFilter::must([FieldCondition::eq("file_path", path)])
}

/// Rebuild a stored point for `new_path`: same vectors, relocated chunk.
fn relocate_point(point: VectorPoint, new_path: &str) -> Result<VectorPoint> {
    let mut chunk: Chunk =
        serde_json::from_value(serde_json::Value::Object(point.payload.into_iter().collect()))?;
    chunk.relocate(new_path);
    Ok(VectorPoint {
        id: chunk.id.clone(),
        vectors: point.vectors,
        payload: chunk_payload(&chunk)?,
    })
}

/// Store payload: the serialized chunk plus a lower-cased `symbol_key`.
///
/// # Errors
///
/// Returns an error if the chunk does not serialize to a JSON object.
pub fn chunk_payload(chunk: &Chunk) -> Result<Payload> {
    let serde_json::Value::Object(map) = serde_json::to_value(chunk)? else {
        return Err(IndexError::Other("chunk did not serialize to an object".into()));
    };
    let mut payload: Payload = map.into_iter().collect();
    if let Some(name) = &chunk.symbol_name {
        payload.insert(
            "symbol_key".into(),
            serde_json::Value::String(name.to_lowercase()),
        );
    }
    Ok(payload)
}

/// Restrict a VCS change to indexable paths. Renames across the indexable
/// boundary become an add or a delete; copies become adds.
fn normalize_change(change: FileChange, exts: &[&str]) -> Vec<FileChange> {
    let new_ok = has_extension(&change.path, exts);
    match (change.kind, change.old_path.as_deref()) {
        (ChangeKind::Renamed, Some(old)) => {
            let old_ok = has_extension(old, exts);
            match (old_ok, new_ok) {
                (true, true) => vec![change],
                (true, false) => vec![FileChange::new(old, ChangeKind::Deleted)],
                (false, true) => vec![FileChange::new(change.path, ChangeKind::Added)],
                (false, false) => Vec::new(),
            }
        }
        (ChangeKind::Copied, _) if new_ok => vec![FileChange::new(change.path, ChangeKind::Added)],
        _ if new_ok => vec![change],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_chunk;

    #[test]
    fn payload_carries_chunk_fields_and_symbol_key() {
        let mut chunk = sample_chunk();
        chunk.symbol_name = Some("HelloWorld".into());
        let payload = chunk_payload(&chunk).unwrap();
        assert_eq!(payload["file_path"], "src/lib.rs");
        assert_eq!(payload["kind"], "method");
        assert_eq!(payload["language"], "rust");
        assert_eq!(payload["start_line"], 1);
        assert_eq!(payload["symbol_key"], "helloworld");

        let back: Chunk =
            serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
                .unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn payload_without_symbol_has_no_key() {
        let mut chunk = sample_chunk();
        chunk.symbol_name = None;
        assert!(!chunk_payload(&chunk).unwrap().contains_key("symbol_key"));
    }

    #[test]
    fn normalize_filters_non_indexable_paths() {
        let exts = ["py", "rs"];
        assert!(normalize_change(FileChange::new("README.md", ChangeKind::Modified), &exts).is_empty());
        assert_eq!(
            normalize_change(FileChange::renamed("a.py", "b.py"), &exts),
            vec![FileChange::renamed("a.py", "b.py")]
        );
        assert_eq!(
            normalize_change(FileChange::renamed("a.py", "a.txt"), &exts),
            vec![FileChange::new("a.py", ChangeKind::Deleted)]
        );
        assert_eq!(
            normalize_change(FileChange::renamed("a.txt", "a.py"), &exts),
            vec![FileChange::new("a.py", ChangeKind::Added)]
        );
        let copy = FileChange {
            path: "c.rs".into(),
            kind: ChangeKind::Copied,
            old_path: Some("b.rs".into()),
        };
        assert_eq!(
            normalize_change(copy, &exts),
            vec![FileChange::new("c.rs", ChangeKind::Added)]
        );
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn write_owner(path: &Path, pid: u32, acquired_at: DateTime<Utc>) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let owner = LockOwner { pid, acquired_at };
        std::fs::write(path, serde_json::to_vec(&owner).unwrap()).unwrap();
    }

    #[test]
    fn lock_file_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".sift/reconcile.lock");
        let first = LockFile::acquire(&path, HOUR).unwrap();
        let owner: LockOwner = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(owner.pid, std::process::id());
        assert!(matches!(
            LockFile::acquire(&path, HOUR),
            Err(IndexError::Locked(_))
        ));
        drop(first);
        assert!(!path.exists());
        assert!(LockFile::acquire(&path, HOUR).is_ok());
    }

    #[test]
    fn old_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.lock");
        write_owner(&path, std::process::id(), Utc::now() - chrono::Duration::hours(2));
        let lock = LockFile::acquire(&path, HOUR).unwrap();
        let owner: LockOwner = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(Utc::now() - owner.acquired_at < chrono::Duration::minutes(1));
        drop(lock);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lock_of_exited_process_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.lock");
        write_owner(&path, u32::MAX, Utc::now());
        assert!(LockFile::acquire(&path, HOUR).is_ok());
    }

    #[test]
    fn fresh_foreign_lock_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.lock");
        write_owner(&path, std::process::id(), Utc::now());
        assert!(matches!(
            LockFile::acquire(&path, HOUR),
            Err(IndexError::Locked(_))
        ));
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            LockFile::acquire(&path, HOUR),
            Err(IndexError::Locked(_))
        ));
    }

    #[test]
    fn overview_cache_insert_get_clear() {
        let cache = OverviewCache::default();
        assert!(cache.is_empty());
        cache.insert(
            "a.py",
            FileOverview {
                path: "a.py".into(),
                language: crate::languages::Lang::Python,
                line_count: 3,
                imports: vec![],
                classes: vec![],
                functions: vec!["main".into()],
            },
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a.py").unwrap().functions, ["main"]);
        cache.clear();
        assert!(cache.get("a.py").is_none());
    }

    #[test]
    fn report_counts_changed_files() {
        let report = ReconcileReport {
            files_added: 1,
            files_modified: 2,
            files_deleted: 3,
            files_renamed: 4,
            files_unchanged: 100,
            ..ReconcileReport::default()
        };
        assert_eq!(report.files_changed(), 10);
    }
}
