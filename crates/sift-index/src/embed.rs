//! Embedding and rerank collaborators, plus the bounded pool that drives them.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use sift_store::{BoxFuture, PointVectors, SparseVector};

use crate::error::{IndexError, Result};

/// Dense embedding model. Every call must return vectors of the same length.
pub trait DenseEmbedder: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>>;
}

/// Term-weighted (sparse) embedding model.
pub trait SparseEmbedder: Send + Sync {
    fn embed_sparse<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<SparseVector>>;
}

/// Cross-encoder scoring `(query, document)` pairs. Returns one score per
/// document, in input order.
pub trait Reranker: Send + Sync {
    fn rerank<'a>(
        &'a self,
        query: &'a str,
        documents: &'a [String],
    ) -> BoxFuture<'a, anyhow::Result<Vec<f32>>>;
}

/// Embedding collaborators used by the indexer and the search engine.
#[derive(Clone)]
pub struct Embedders {
    pub dense: Arc<dyn DenseEmbedder>,
    pub sparse: Option<Arc<dyn SparseEmbedder>>,
}

impl Embedders {
    #[must_use]
    pub fn new(dense: Arc<dyn DenseEmbedder>) -> Self {
        Self { dense, sparse: None }
    }

    #[must_use]
    pub fn with_sparse(mut self, sparse: Arc<dyn SparseEmbedder>) -> Self {
        self.sparse = Some(sparse);
        self
    }

    /// Length of the dense vectors, measured by embedding a sample text.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] if the sample embedding fails.
    pub async fn dense_dimension(&self) -> Result<u64> {
        let sample = self.dense.embed("dimension").await.map_err(IndexError::Embedding)?;
        Ok(u64::try_from(sample.len())?)
    }
}

impl std::fmt::Debug for Embedders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedders")
            .field("sparse", &self.sparse.is_some())
            .finish_non_exhaustive()
    }
}

/// Fixed-width window of in-flight embedding calls.
///
/// At most `width` texts are being embedded at once; results come back in
/// input order.
#[derive(Debug, Clone, Copy)]
pub struct EmbedPool {
    width: usize,
}

impl EmbedPool {
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Embed every text with the dense model and, when configured, the sparse
    /// model.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] on the first failed call; no partial
    /// result is returned.
    pub async fn embed_all(
        &self,
        embedders: &Embedders,
        texts: &[String],
    ) -> Result<Vec<PointVectors>> {
        let calls: Vec<_> = texts.iter().map(|text| embed_one(embedders, text)).collect();
        let stream = futures::stream::iter(calls);
        stream
            .buffered(self.width)
            .try_collect()
            .await
            .map_err(IndexError::Embedding)
    }
}

fn embed_one<'a>(
    embedders: &'a Embedders,
    text: &'a str,
) -> BoxFuture<'a, anyhow::Result<PointVectors>> {
    Box::pin(async move {
        let dense = embedders.dense.embed(text).await?;
        let sparse = match &embedders.sparse {
            Some(sparse) => Some(sparse.embed_sparse(text).await?),
            None => None,
        };
        anyhow::Ok(PointVectors { dense, sparse })
    })
}

impl Default for EmbedPool {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Deterministic embedder: bag of bytes folded into `dim` buckets.
    /// Counts calls and tracks the highest number of concurrent calls.
    pub(crate) struct HashEmbedder {
        pub dim: usize,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub delay: Option<Duration>,
        pub fail_on: Option<String>,
    }

    impl HashEmbedder {
        pub(crate) fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: None,
                fail_on: None,
            }
        }

        pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0_f32; self.dim];
            for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                let h = blake3::hash(word.to_lowercase().as_bytes());
                let bucket = usize::from(h.as_bytes()[0]) % self.dim;
                v[bucket] += 1.0;
            }
            v
        }
    }

    impl DenseEmbedder for HashEmbedder {
        fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if let Some(marker) = &self.fail_on
                    && text.contains(marker.as_str())
                {
                    anyhow::bail!("embedding backend rejected input");
                }
                Ok(self.vector(text))
            })
        }
    }

    #[tokio::test]
    async fn pool_bounds_concurrency_and_keeps_order() {
        let mut embedder = HashEmbedder::new(8);
        embedder.delay = Some(Duration::from_millis(5));
        let embedder = Arc::new(embedder);
        let embedders = Embedders::new(embedder.clone());
        let texts: Vec<String> = (0..20).map(|i| format!("text number {i}")).collect();

        let pool = EmbedPool::new(4);
        let vectors = pool.embed_all(&embedders, &texts).await.unwrap();

        assert_eq!(vectors.len(), 20);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 20);
        assert!(embedder.max_in_flight.load(Ordering::SeqCst) <= 4);
        for (text, v) in texts.iter().zip(&vectors) {
            assert_eq!(v.dense, embedder.vector(text));
            assert!(v.sparse.is_none());
        }
    }

    #[tokio::test]
    async fn pool_reports_first_failure() {
        let mut embedder = HashEmbedder::new(8);
        embedder.fail_on = Some("poison".into());
        let embedders = Embedders::new(Arc::new(embedder));
        let texts = vec!["fine".to_string(), "poison pill".to_string()];

        let err = EmbedPool::default()
            .embed_all(&embedders, &texts)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn dense_dimension_measures_model() {
        let embedders = Embedders::new(Arc::new(HashEmbedder::new(16)));
        assert_eq!(embedders.dense_dimension().await.unwrap(), 16);
    }

    #[test]
    fn zero_width_clamped_to_one() {
        assert_eq!(EmbedPool::new(0).width(), 1);
        assert_eq!(EmbedPool::default().width(), 32);
    }
}
