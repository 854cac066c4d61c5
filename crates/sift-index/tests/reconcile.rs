#![cfg(feature = "lang-python")]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sift_index::change::hash_bytes;
use sift_index::config::IndexConfig;
use sift_index::{
    ChangeDetector, ChangeKind, ChunkerConfig, DenseEmbedder, Embedders, FileChange,
    GitChangeDetector, IncrementalIndexer, IndexError,
};
use sift_store::{
    BoxFuture, FieldCondition, InMemoryVectorStore, ScoredVectorPoint, VectorFilter, VectorPoint,
    VectorQuery, VectorStore, VectorStoreError,
};

const CHUNKS: &str = "code_chunks";
const SYMBOLS: &str = "code_symbols";

/// Change detector driven by the test: the revision and delta are set by
/// hand, the file set and hashes come from disk.
struct ScriptedDetector {
    root: PathBuf,
    revision: Mutex<Option<String>>,
    changes: Mutex<Vec<FileChange>>,
    fail_changes: AtomicBool,
}

impl ScriptedDetector {
    fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            revision: Mutex::new(Some("r1".into())),
            changes: Mutex::new(Vec::new()),
            fail_changes: AtomicBool::new(false),
        })
    }

    fn advance(&self, revision: &str, changes: Vec<FileChange>) {
        *self.revision.lock().unwrap() = Some(revision.into());
        *self.changes.lock().unwrap() = changes;
    }

    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                Self::walk(&path, root, out);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
}

impl ChangeDetector for ScriptedDetector {
    fn current_revision(&self) -> BoxFuture<'_, anyhow::Result<Option<String>>> {
        let rev = self.revision.lock().unwrap().clone();
        Box::pin(async move { Ok(rev) })
    }

    fn changes_since<'a>(
        &'a self,
        _revision: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<FileChange>>> {
        let changes = self.changes.lock().unwrap().clone();
        let fail = self.fail_changes.load(Ordering::SeqCst);
        Box::pin(async move {
            anyhow::ensure!(!fail, "revision no longer reachable");
            Ok(changes)
        })
    }

    fn tracked_files<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>> {
        Box::pin(async move {
            let mut files = Vec::new();
            Self::walk(&self.root, &self.root, &mut files);
            files.retain(|f| sift_index::change::has_extension(f, extensions));
            files.sort();
            Ok(files)
        })
    }

    fn content_hash<'a>(&'a self, path: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(async move {
            match std::fs::read(self.root.join(path)) {
                Ok(bytes) => Ok(Some(hash_bytes(&bytes))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Dense embedder counting calls; rejects texts containing `fail_on`.
struct CountingEmbedder {
    calls: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl CountingEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DenseEmbedder for CountingEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|m| text.contains(m));
        Box::pin(async move {
            anyhow::ensure!(!fail, "embedding backend rejected input");
            let h = blake3::hash(text.as_bytes());
            Ok(h.as_bytes()[..8].iter().map(|b| f32::from(*b) + 1.0).collect())
        })
    }
}

/// In-memory store whose upserts can be switched to fail.
struct FlakyStore {
    inner: InMemoryVectorStore,
    fail_upserts: AtomicBool,
}

impl VectorStore for FlakyStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        self.inner.ensure_collection(collection, vector_size)
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Box::pin(async { Err(VectorStoreError::Connection("store unreachable".into())) });
        }
        self.inner.upsert(collection, points)
    }

    fn delete(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        self.inner.delete(collection, filter)
    }

    fn query(
        &self,
        collection: &str,
        query: VectorQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        self.inner.query(collection, query)
    }

    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        self.inner.scroll(collection, filter, limit)
    }

    fn scroll_points(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>> {
        self.inner.scroll_points(collection, filter, limit)
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    store: Arc<FlakyStore>,
    detector: Arc<ScriptedDetector>,
    embedder: Arc<CountingEmbedder>,
    indexer: IncrementalIndexer,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: InMemoryVectorStore::new(),
            fail_upserts: AtomicBool::new(false),
        });
        let detector = ScriptedDetector::new(dir.path());
        let embedder = CountingEmbedder::new();
        let indexer = IncrementalIndexer::new(
            dir.path(),
            store.clone(),
            detector.clone(),
            Embedders::new(embedder.clone()),
            IndexConfig::default(),
        );
        Self {
            dir,
            store,
            detector,
            embedder,
            indexer,
        }
    }

    fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn disk_hashes(&self) -> BTreeMap<String, String> {
        let mut files = Vec::new();
        ScriptedDetector::walk(self.dir.path(), self.dir.path(), &mut files);
        files
            .into_iter()
            .filter(|f| f.ends_with(".py"))
            .map(|f| {
                let bytes = std::fs::read(self.dir.path().join(&f)).unwrap();
                (f, hash_bytes(&bytes))
            })
            .collect()
    }

    async fn state_hashes(&self) -> BTreeMap<String, String> {
        let state = self.indexer.state().await.unwrap();
        state.files.into_iter().map(|(p, r)| (p, r.hash)).collect()
    }

    async fn points_for(&self, collection: &str, path: &str) -> Vec<ScoredVectorPoint> {
        self.store
            .scroll(
                collection,
                VectorFilter::must([FieldCondition::eq("file_path", path)]),
                10_000,
            )
            .await
            .unwrap()
    }

    async fn stored_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .store
            .scroll(CHUNKS, VectorFilter::default(), 10_000)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.payload["file_path"].as_str().unwrap().to_string())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// A new indexer over the same tree, store and state, as a new process
    /// would build it.
    fn restart(&mut self) {
        self.indexer = IncrementalIndexer::new(
            self.dir.path(),
            self.store.clone(),
            self.detector.clone(),
            Embedders::new(self.embedder.clone()),
            IndexConfig::default(),
        );
    }
}

fn module(name: &str, body: &str) -> String {
    format!(
        "\"\"\"Module {name}.\"\"\"\nimport os\n\n\ndef {name}(path):\n    \"\"\"Resolve a path.\"\"\"\n    return os.path.join(path, \"{body}\")\n\n\nclass {name}_holder:\n    def get(self):\n        return {name}(\"x\")\n"
    )
}

#[tokio::test]
async fn incremental_pass_converges_with_disk() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.write("pkg/b.py", &module("beta", "two"));

    let first = fx.indexer.reconcile(false).await.unwrap();
    assert!(first.full);
    assert_eq!(first.files_added, 2);
    assert!(first.errors.is_empty());
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());

    fx.write("a.py", &module("alpha", "changed"));
    std::fs::remove_file(fx.dir.path().join("pkg/b.py")).unwrap();
    fx.write("c.py", &module("gamma", "three"));
    fx.detector.advance(
        "r2",
        vec![
            FileChange::new("a.py", ChangeKind::Modified),
            FileChange::new("pkg/b.py", ChangeKind::Deleted),
            FileChange::new("c.py", ChangeKind::Added),
            FileChange::new("notes.md", ChangeKind::Added),
        ],
    );

    let second = fx.indexer.reconcile(false).await.unwrap();
    assert!(!second.full);
    assert_eq!(second.files_modified, 1);
    assert_eq!(second.files_deleted, 1);
    assert_eq!(second.files_added, 1);
    assert!(second.chunks_deleted > 0);

    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
    assert_eq!(fx.stored_paths().await, ["a.py", "c.py"]);
    assert!(fx.points_for(SYMBOLS, "pkg/b.py").await.is_empty());

    let state = fx.indexer.state().await.unwrap();
    assert_eq!(state.revision.as_deref(), Some("r2"));
    assert_eq!(state.total_files, 2);
    let stored = fx
        .store
        .scroll(CHUNKS, VectorFilter::default(), 10_000)
        .await
        .unwrap();
    assert_eq!(state.total_chunks, stored.len());
}

#[tokio::test]
async fn touched_but_unchanged_file_is_not_reembedded() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();
    let calls = fx.embedder.calls();
    let before = fx.points_for(CHUNKS, "a.py").await;

    fx.write("a.py", &module("alpha", "one"));
    fx.detector
        .advance("r2", vec![FileChange::new("a.py", ChangeKind::Modified)]);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert_eq!(report.files_unchanged, 1);
    assert_eq!(report.files_changed(), 0);
    assert_eq!(fx.embedder.calls(), calls);
    assert_eq!(fx.points_for(CHUNKS, "a.py").await.len(), before.len());
}

#[tokio::test]
async fn vcs_failure_falls_back_to_full_pass_using_known_hashes() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.write("b.py", &module("beta", "two"));
    fx.indexer.reconcile(false).await.unwrap();
    let calls = fx.embedder.calls();

    fx.write("b.py", &module("beta", "edited"));
    fx.detector.fail_changes.store(true, Ordering::SeqCst);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert!(report.full);
    assert_eq!(report.files_unchanged, 1);
    assert_eq!(report.files_modified, 1);
    assert!(fx.embedder.calls() > calls);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
}

#[tokio::test]
async fn rename_moves_points_without_embedding() {
    let fx = Fixture::new();
    fx.write("old.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();
    let calls = fx.embedder.calls();
    let old_ids: Vec<String> = fx
        .points_for(CHUNKS, "old.py")
        .await
        .into_iter()
        .map(|p| p.id)
        .collect();
    let symbol_count = fx.points_for(SYMBOLS, "old.py").await.len();
    assert!(symbol_count > 0);

    std::fs::create_dir_all(fx.dir.path().join("lib")).unwrap();
    std::fs::rename(fx.dir.path().join("old.py"), fx.dir.path().join("lib/new.py")).unwrap();
    fx.detector
        .advance("r2", vec![FileChange::renamed("old.py", "lib/new.py")]);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert_eq!(report.files_renamed, 1);
    assert_eq!(report.chunks_added, 0);
    assert_eq!(fx.embedder.calls(), calls);

    let moved = fx.points_for(CHUNKS, "lib/new.py").await;
    assert_eq!(moved.len(), old_ids.len());
    assert!(moved.iter().all(|p| !old_ids.contains(&p.id)));
    assert_eq!(fx.points_for(SYMBOLS, "lib/new.py").await.len(), symbol_count);
    assert!(fx.points_for(CHUNKS, "old.py").await.is_empty());
    assert!(fx.points_for(SYMBOLS, "old.py").await.is_empty());
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());

    // Same ids a fresh chunking at the new path would produce.
    let source = std::fs::read_to_string(fx.dir.path().join("lib/new.py")).unwrap();
    let chunked = sift_index::chunk_source(&source, "lib/new.py", &ChunkerConfig::default()).unwrap();
    let mut expected: Vec<String> = chunked.chunks.into_iter().map(|c| c.id).collect();
    expected.sort();
    let mut ids: Vec<String> = moved.into_iter().map(|p| p.id).collect();
    ids.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn recreating_renamed_path_keeps_both_files() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();

    std::fs::rename(fx.dir.path().join("a.py"), fx.dir.path().join("b.py")).unwrap();
    fx.detector
        .advance("r2", vec![FileChange::renamed("a.py", "b.py")]);
    fx.indexer.reconcile(false).await.unwrap();
    let renamed = fx.points_for(CHUNKS, "b.py").await.len();
    assert!(renamed > 0);

    fx.write("a.py", &module("alpha", "one"));
    fx.detector
        .advance("r3", vec![FileChange::new("a.py", ChangeKind::Added)]);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert_eq!(report.files_added, 1);
    assert_eq!(fx.points_for(CHUNKS, "b.py").await.len(), renamed);
    assert_eq!(fx.points_for(CHUNKS, "a.py").await.len(), renamed);
    assert_eq!(fx.stored_paths().await, ["a.py", "b.py"]);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
    let state = fx.indexer.state().await.unwrap();
    assert_eq!(state.total_chunks, 2 * renamed);
}

#[tokio::test]
async fn restarted_indexer_renames_without_embedding() {
    let mut fx = Fixture::new();
    fx.write("old.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();
    assert_eq!(fx.indexer.state().await.unwrap().vector_size, Some(8));

    fx.restart();
    let calls = fx.embedder.calls();
    std::fs::rename(fx.dir.path().join("old.py"), fx.dir.path().join("new.py")).unwrap();
    fx.detector
        .advance("r2", vec![FileChange::renamed("old.py", "new.py")]);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert_eq!(report.files_renamed, 1);
    assert_eq!(fx.embedder.calls(), calls);
    assert_eq!(fx.stored_paths().await, ["new.py"]);
}

#[tokio::test]
async fn rename_with_edit_reindexes_new_path() {
    let fx = Fixture::new();
    fx.write("old.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();
    let calls = fx.embedder.calls();

    std::fs::remove_file(fx.dir.path().join("old.py")).unwrap();
    fx.write("new.py", &module("alpha", "two"));
    fx.detector
        .advance("r2", vec![FileChange::renamed("old.py", "new.py")]);
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.files_added, 1);
    assert!(fx.embedder.calls() > calls);
    assert_eq!(fx.stored_paths().await, ["new.py"]);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
}

#[tokio::test]
async fn store_failure_aborts_without_saving_state() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();
    let saved = fx.indexer.state().await.unwrap();

    fx.write("a.py", &module("alpha", "two"));
    fx.detector
        .advance("r2", vec![FileChange::new("a.py", ChangeKind::Modified)]);
    fx.store.fail_upserts.store(true, Ordering::SeqCst);

    let err = fx.indexer.reconcile(false).await.unwrap_err();
    assert!(matches!(err, IndexError::Store(_)), "{err}");
    assert_eq!(fx.indexer.state().await.unwrap(), saved);
    assert!(!fx.indexer.lock_path().exists());

    fx.store.fail_upserts.store(false, Ordering::SeqCst);
    let report = fx.indexer.reconcile(false).await.unwrap();
    assert_eq!(report.files_modified, 1);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
}

#[tokio::test]
async fn corrupt_state_forces_full_pass() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.indexer.reconcile(false).await.unwrap();

    std::fs::write(fx.indexer.state_path(), b"{\"files\": 12").unwrap();
    let report = fx.indexer.reconcile(false).await.unwrap();

    assert!(report.full);
    assert_eq!(report.files_added, 1);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
    assert_eq!(fx.stored_paths().await, ["a.py"]);
}

#[tokio::test]
async fn full_pass_sweeps_orphaned_points() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.write("b.py", &module("beta", "two"));
    fx.indexer.reconcile(false).await.unwrap();

    std::fs::remove_file(fx.dir.path().join("b.py")).unwrap();
    let report = fx.indexer.reconcile(true).await.unwrap();

    assert!(report.full);
    assert!(report.chunks_deleted > 0);
    assert_eq!(fx.stored_paths().await, ["a.py"]);
    assert!(fx.points_for(SYMBOLS, "b.py").await.is_empty());
}

#[tokio::test]
async fn embedding_failure_keeps_old_hash_and_retries() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.write("b.py", &module("beta", "two"));
    fx.indexer.reconcile(false).await.unwrap();
    let old = fx.state_hashes().await;

    fx.write("a.py", &module("alpha", "EXPLODE"));
    fx.write("b.py", &module("beta", "three"));
    *fx.embedder.fail_on.lock().unwrap() = Some("EXPLODE".into());
    fx.detector.advance(
        "r2",
        vec![
            FileChange::new("a.py", ChangeKind::Modified),
            FileChange::new("b.py", ChangeKind::Modified),
        ],
    );

    let report = fx.indexer.reconcile(false).await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("a.py:"));
    assert_eq!(report.files_modified, 1);

    let state = fx.indexer.state().await.unwrap();
    assert_eq!(state.files["a.py"].hash, old["a.py"]);
    assert!(state.recheck.contains("a.py"));
    assert!(!fx.points_for(CHUNKS, "a.py").await.is_empty());

    *fx.embedder.fail_on.lock().unwrap() = None;
    fx.detector.advance("r3", Vec::new());
    let retry = fx.indexer.reconcile(false).await.unwrap();
    assert!(retry.errors.is_empty());
    assert_eq!(retry.files_modified, 1);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
}

#[tokio::test]
async fn held_lock_rejects_pass() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    let lock = fx.indexer.lock_path();
    std::fs::create_dir_all(lock.parent().unwrap()).unwrap();
    std::fs::write(&lock, b"").unwrap();

    let err = fx.indexer.reconcile(false).await.unwrap_err();
    assert!(matches!(err, IndexError::Locked(_)));
    assert!(err.is_fatal());
    assert!(fx.indexer.state().await.is_none());

    std::fs::remove_file(&lock).unwrap();
    assert!(fx.indexer.reconcile(false).await.is_ok());
}

#[tokio::test]
async fn reconcile_paths_rehashes_given_files() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    fx.write("b.py", &module("beta", "two"));
    fx.indexer.reconcile(false).await.unwrap();

    fx.write("a.py", &module("alpha", "edited"));
    std::fs::remove_file(fx.dir.path().join("b.py")).unwrap();
    let report = fx
        .indexer
        .reconcile_paths(&["a.py".into(), "b.py".into(), "README.md".into()])
        .await
        .unwrap();

    assert_eq!(report.files_modified, 1);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(fx.state_hashes().await, fx.disk_hashes());
    assert_eq!(fx.stored_paths().await, ["a.py"]);
    assert!(fx.indexer.overviews().get("a.py").is_some());
}

#[tokio::test]
async fn file_overview_describes_structure() {
    let fx = Fixture::new();
    fx.write("a.py", &module("alpha", "one"));
    let overview = fx.indexer.file_overview("a.py").await.unwrap();
    assert_eq!(overview.functions, ["alpha"]);
    assert_eq!(overview.classes[0].name, "alpha_holder");
    assert_eq!(overview.imports, ["os"]);
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(root: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(["-c", "user.name=sift", "-c", "user.email=sift@example.com"])
        .args(args)
        .current_dir(root)
        .output()
        .unwrap();
    assert!(status.status.success(), "git {args:?}: {status:?}");
}

#[tokio::test]
async fn git_rename_is_detected_end_to_end() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join(".gitignore"), ".sift/\n").unwrap();
    std::fs::write(root.join("a.py"), module("alpha", "one")).unwrap();
    std::fs::write(root.join("b.py"), module("beta", "two")).unwrap();
    git(root, &["init", "-q"]);
    git(root, &["add", "."]);
    git(root, &["commit", "-q", "-m", "initial"]);

    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = CountingEmbedder::new();
    let indexer = IncrementalIndexer::new(
        root,
        store.clone(),
        Arc::new(GitChangeDetector::new(root)),
        Embedders::new(embedder.clone()),
        IndexConfig::default(),
    );
    let first = indexer.reconcile(false).await.unwrap();
    assert!(first.full);
    assert_eq!(first.files_added, 2);
    let calls = embedder.calls();

    git(root, &["mv", "a.py", "renamed.py"]);
    git(root, &["commit", "-q", "-m", "rename"]);
    std::fs::write(root.join("b.py"), module("beta", "changed")).unwrap();

    let second = indexer.reconcile(false).await.unwrap();
    assert!(!second.full);
    assert_eq!(second.files_renamed, 1);
    assert_eq!(second.files_modified, 1);
    assert!(embedder.calls() > calls);

    let state = indexer.state().await.unwrap();
    let paths: Vec<&str> = state.files.keys().map(String::as_str).collect();
    assert_eq!(paths, ["b.py", "renamed.py"]);
    assert!(state.revision.is_some());
}
