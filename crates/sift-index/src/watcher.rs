//! Filesystem watcher feeding debounced path batches into the indexer.

use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use sift_store::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::indexer::{IncrementalIndexer, ReconcileReport};
use crate::languages::is_indexable;

const BASE_BACKOFF_MS: u64 = 250;
/// Backoff stops doubling after this many attempts (16 s).
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Reconciles an explicit set of repository-relative paths.
pub trait PathReconciler: Send + Sync {
    fn reconcile_paths<'a>(&'a self, paths: &'a [String]) -> BoxFuture<'a, Result<ReconcileReport>>;
}

impl PathReconciler for IncrementalIndexer {
    fn reconcile_paths<'a>(&'a self, paths: &'a [String]) -> BoxFuture<'a, Result<ReconcileReport>> {
        Box::pin(IncrementalIndexer::reconcile_paths(self, paths))
    }
}

/// Watches a repository and reconciles changed paths after a quiet period.
pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(indexer: Arc<IncrementalIndexer>, debounce: Duration) -> Result<Self> {
        let root = indexer.root().canonicalize()?;
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<String>>(64);

        let event_root = root.clone();
        let mut debouncer = new_debouncer(
            debounce,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };
                let batch = relevant_batch(&event_root, events);
                if !batch.is_empty() {
                    let _ = batch_tx.blocking_send(batch);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            drive(indexer.as_ref(), batch_rx).await;
        });

        tracing::info!(root = %root.display(), "index watcher started");
        Ok(Self { handle })
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reconcile batches from `rx` until it closes. Batches that fail with a
/// fatal error are merged with whatever arrived meanwhile and retried after
/// an exponential backoff; other failures drop the batch.
async fn drive<R: PathReconciler + ?Sized>(reconciler: &R, mut rx: mpsc::Receiver<Vec<String>>) {
    let mut pending = BTreeSet::new();
    let mut attempt = 0u32;
    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(batch) => pending.extend(batch),
                None => break,
            }
        }
        while let Ok(more) = rx.try_recv() {
            pending.extend(more);
        }

        let batch: Vec<String> = std::mem::take(&mut pending).into_iter().collect();
        let outcome = reconciler.reconcile_paths(&batch).await;
        if let Some(delay) = retry_delay(&outcome, attempt) {
            if let Err(e) = &outcome {
                tracing::warn!(
                    paths = batch.len(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    "watcher reconcile failed, requeueing: {e}"
                );
            }
            pending.extend(batch);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
            continue;
        }

        attempt = 0;
        match outcome {
            Ok(report) => tracing::debug!(
                paths = batch.len(),
                changed = report.files_changed(),
                "watcher batch reconciled"
            ),
            Err(e) => tracing::warn!(paths = batch.len(), "watcher reconcile failed: {e:#}"),
        }
    }
}

/// Backoff before retrying a batch, or `None` if the outcome is final.
fn retry_delay(outcome: &Result<ReconcileReport>, attempt: u32) -> Option<Duration> {
    match outcome {
        Err(e) if e.is_fatal() => Some(Duration::from_millis(
            BASE_BACKOFF_MS << attempt.min(MAX_BACKOFF_SHIFT),
        )),
        _ => None,
    }
}

/// Sorted, de-duplicated relevant paths of the settled events in one
/// debouncer tick.
fn relevant_batch(root: &Path, events: Vec<DebouncedEvent>) -> Vec<String> {
    events
        .into_iter()
        .filter(|e| e.kind == DebouncedEventKind::Any)
        .filter_map(|e| relevant_path(root, &e.path))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Repository-relative, `/`-separated path of an indexable file outside
/// hidden directories (`.git`, `.sift`, ...).
fn relevant_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        let part = part.to_str()?;
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    is_indexable(rel).then(|| parts.join("/"))
}
