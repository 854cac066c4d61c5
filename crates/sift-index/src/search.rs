//! Hybrid code search: exact symbol lookup, dense, sparse and RRF-fused
//! retrieval, optional cross-encoder rerank, overlap deduplication.

use std::collections::HashMap;
use std::sync::Arc;

use sift_store::{
    FieldCondition, QueryVector, ScoredVectorPoint, VectorFilter, VectorQuery, VectorStore,
};

use crate::chunker::{Chunk, ChunkKind};
use crate::config::SearchConfig;
use crate::embed::{Embedders, Reranker};
use crate::error::{IndexError, Result};
use crate::fusion::{max_rrf_score, weighted_rrf};
use crate::languages::Lang;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    /// Case-insensitive symbol-name match on the payload. Score is always 1.0.
    Exact,
    /// Dense nearest neighbours.
    Semantic,
    /// Sparse (term-weighted) nearest neighbours.
    Keyword,
    /// Dense and sparse fused with Reciprocal Rank Fusion.
    #[default]
    Hybrid,
}

/// Payload predicates applied by the store before ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub file_paths: Vec<String>,
    pub languages: Vec<Lang>,
    pub kinds: Vec<ChunkKind>,
    pub exclude_paths: Vec<String>,
}

impl SearchFilters {
    #[must_use]
    pub fn to_filter(&self) -> Option<VectorFilter> {
        let mut filter = VectorFilter::default();
        if !self.file_paths.is_empty() {
            filter
                .must
                .push(FieldCondition::any("file_path", self.file_paths.clone()));
        }
        if !self.languages.is_empty() {
            let ids = self.languages.iter().map(|l| l.id().to_string()).collect();
            filter.must.push(FieldCondition::any("language", ids));
        }
        if !self.kinds.is_empty() {
            let kinds = self.kinds.iter().map(|k| k.as_str().to_string()).collect();
            filter.must.push(FieldCondition::any("kind", kinds));
        }
        if !self.exclude_paths.is_empty() {
            filter
                .must_not
                .push(FieldCondition::any("file_path", self.exclude_paths.clone()));
        }
        (!filter.is_empty()).then_some(filter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub text: String,
    pub mode: SearchMode,
    pub limit: usize,
    pub filters: SearchFilters,
    pub rerank: bool,
    pub deduplicate: bool,
    /// Hits scoring below this after fusion and rerank are dropped.
    pub min_score: Option<f32>,
}

impl SearchRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: SearchMode::default(),
            limit: 10,
            filters: SearchFilters::default(),
            rerank: true,
            deduplicate: true,
            min_score: None,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    #[must_use]
    pub fn without_rerank(mut self) -> Self {
        self.rerank = false;
        self
    }
}

/// Which collection a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Chunks,
    Symbols,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    pub collection: CollectionKind,
}

impl SearchHit {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Mode actually executed (may differ from the request after a fallback).
    pub mode: SearchMode,
    /// Degradations that did not fail the search (missing sparse model,
    /// rerank failure).
    pub warnings: Vec<String>,
}

/// Read-only search over the chunk and symbol collections.
pub struct HybridSearchEngine {
    store: Arc<dyn VectorStore>,
    embedders: Embedders,
    reranker: Option<Arc<dyn Reranker>>,
    config: SearchConfig,
    chunk_collection: String,
    symbol_collection: String,
}

impl HybridSearchEngine {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedders: Embedders, config: SearchConfig) -> Self {
        Self {
            store,
            embedders,
            reranker: None,
            config,
            chunk_collection: "code_chunks".into(),
            symbol_collection: "code_symbols".into(),
        }
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn with_collections(
        mut self,
        chunks: impl Into<String>,
        symbols: impl Into<String>,
    ) -> Self {
        self.chunk_collection = chunks.into();
        self.symbol_collection = symbols.into();
        self
    }

    /// Search the chunk collection.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] if the query cannot be embedded and
    /// [`IndexError::Store`] if the store query fails.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search_in(CollectionKind::Chunks, request).await
    }

    /// Search one collection.
    ///
    /// # Errors
    ///
    /// See [`search`](Self::search).
    pub async fn search_in(
        &self,
        collection: CollectionKind,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        let name = match collection {
            CollectionKind::Chunks => self.chunk_collection.as_str(),
            CollectionKind::Symbols => self.symbol_collection.as_str(),
        };
        let filter = request.filters.to_filter();
        let window = u64::try_from(request.limit.max(1).saturating_mul(self.config.overfetch))?;
        let mut warnings = Vec::new();

        let mut mode = request.mode;
        if matches!(mode, SearchMode::Keyword | SearchMode::Hybrid) && self.embedders.sparse.is_none()
        {
            let warning = format!(
                "{mode:?} search needs a sparse embedder; falling back to semantic search"
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
            mode = SearchMode::Semantic;
        }

        let scored = match mode {
            SearchMode::Exact => self.exact(name, &request.text, filter, window).await?,
            SearchMode::Semantic => {
                let vector = QueryVector::Dense(self.dense_query(&request.text).await?);
                self.query(name, vector, filter, window).await?
            }
            SearchMode::Keyword => {
                let vector = QueryVector::Sparse(self.sparse_query(&request.text).await?);
                self.query(name, vector, filter, window).await?
            }
            SearchMode::Hybrid => self.hybrid(name, &request.text, filter, window).await?,
        };

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .filter_map(|p| hit_from_point(p, collection))
            .collect();

        if request.rerank
            && self.config.rerank
            && hits.len() > 1
            && let Some(reranker) = &self.reranker
            && let Err(e) = rerank(reranker.as_ref(), &request.text, &mut hits).await
        {
            let warning = format!("rerank failed, keeping fused order: {e:#}");
            tracing::warn!("{warning}");
            warnings.push(warning);
        }

        if request.deduplicate {
            hits = deduplicate(hits);
        }
        if let Some(min) = request.min_score {
            hits.retain(|h| h.score >= min);
        }
        hits.truncate(request.limit);

        tracing::debug!(mode = ?mode, collection = name, hits = hits.len(), "search complete");
        Ok(SearchResponse {
            hits,
            mode,
            warnings,
        })
    }

    /// Multi-level search: symbols first, then chunks.
    ///
    /// Returns the symbol hits alone when the best one scores above the
    /// exact-hit threshold; otherwise fuses both result lists with weighted
    /// RRF, boosting symbols.
    ///
    /// # Errors
    ///
    /// See [`search`](Self::search).
    pub async fn search_code(&self, text: &str, limit: usize) -> Result<SearchResponse> {
        let request = SearchRequest::new(text)
            .with_mode(classify_query(text))
            .with_limit(limit);

        let symbols = self.search_in(CollectionKind::Symbols, &request).await?;
        if symbols
            .hits
            .first()
            .is_some_and(|h| h.score > self.config.exact_threshold)
        {
            return Ok(symbols);
        }

        let chunks = self.search_in(CollectionKind::Chunks, &request).await?;
        let mut warnings = symbols.warnings;
        warnings.extend(chunks.warnings);

        let symbol_ids: Vec<String> = symbols.hits.iter().map(|h| h.chunk.id.clone()).collect();
        let chunk_ids: Vec<String> = chunks.hits.iter().map(|h| h.chunk.id.clone()).collect();
        let weights = [self.config.symbol_boost, 1.0];
        let fused = weighted_rrf(
            &[(weights[0], &symbol_ids[..]), (weights[1], &chunk_ids[..])],
            self.config.rrf_k,
        );
        let max = max_rrf_score(&weights, self.config.rrf_k);

        let mut by_id: HashMap<String, SearchHit> = HashMap::new();
        for hit in chunks.hits.into_iter().chain(symbols.hits) {
            by_id.insert(hit.chunk.id.clone(), hit);
        }
        let fused: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut hit| {
                    hit.score = score / max;
                    hit
                })
            })
            .collect();
        let mut hits = deduplicate(fused);
        hits.truncate(limit);

        Ok(SearchResponse {
            hits,
            mode: symbols.mode,
            warnings,
        })
    }

    async fn dense_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedders
            .dense
            .embed(text)
            .await
            .map_err(IndexError::Embedding)
    }

    async fn sparse_query(&self, text: &str) -> Result<sift_store::SparseVector> {
        let Some(sparse) = &self.embedders.sparse else {
            return Err(IndexError::Other("no sparse embedder configured".into()));
        };
        sparse.embed_sparse(text).await.map_err(IndexError::Embedding)
    }

    async fn query(
        &self,
        collection: &str,
        vector: QueryVector,
        filter: Option<VectorFilter>,
        limit: u64,
    ) -> Result<Vec<ScoredVectorPoint>> {
        let query = VectorQuery {
            vector,
            filter,
            limit,
        };
        Ok(self.store.query(collection, query).await?)
    }

    async fn exact(
        &self,
        collection: &str,
        text: &str,
        filter: Option<VectorFilter>,
        limit: u64,
    ) -> Result<Vec<ScoredVectorPoint>> {
        let mut filter = filter.unwrap_or_default();
        filter
            .must
            .push(FieldCondition::eq("symbol_key", text.trim().to_lowercase()));
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let mut points = self.store.scroll(collection, filter, limit).await?;
        for p in &mut points {
            p.score = 1.0;
        }
        Ok(points)
    }

    async fn hybrid(
        &self,
        collection: &str,
        text: &str,
        filter: Option<VectorFilter>,
        window: u64,
    ) -> Result<Vec<ScoredVectorPoint>> {
        let (dense, sparse) = tokio::try_join!(self.dense_query(text), self.sparse_query(text))?;
        let (dense_hits, sparse_hits) = tokio::try_join!(
            self.query(collection, QueryVector::Dense(dense), filter.clone(), window),
            self.query(collection, QueryVector::Sparse(sparse), filter, window),
        )?;

        let dense_ids: Vec<String> = dense_hits.iter().map(|p| p.id.clone()).collect();
        let sparse_ids: Vec<String> = sparse_hits.iter().map(|p| p.id.clone()).collect();
        let fused = weighted_rrf(
            &[(1.0, &dense_ids[..]), (1.0, &sparse_ids[..])],
            self.config.rrf_k,
        );
        let max = max_rrf_score(&[1.0, 1.0], self.config.rrf_k);

        let mut by_id: HashMap<String, ScoredVectorPoint> = HashMap::new();
        for point in sparse_hits.into_iter().chain(dense_hits) {
            by_id.insert(point.id.clone(), point);
        }
        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut p| {
                    p.score = score / max;
                    p
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for HybridSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearchEngine")
            .field("embedders", &self.embedders)
            .field("reranker", &self.reranker.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn hit_from_point(point: ScoredVectorPoint, collection: CollectionKind) -> Option<SearchHit> {
    let payload = serde_json::Value::Object(point.payload.into_iter().collect());
    match serde_json::from_value::<Chunk>(payload) {
        Ok(chunk) => Some(SearchHit {
            chunk,
            score: point.score,
            collection,
        }),
        Err(e) => {
            tracing::warn!(id = %point.id, "skipping point with unreadable payload: {e}");
            None
        }
    }
}

async fn rerank(reranker: &dyn Reranker, query: &str, hits: &mut [SearchHit]) -> anyhow::Result<()> {
    let documents: Vec<String> = hits.iter().map(|h| h.chunk.content.clone()).collect();
    let scores = reranker.rerank(query, &documents).await?;
    anyhow::ensure!(
        scores.len() == hits.len(),
        "reranker returned {} scores for {} documents",
        scores.len(),
        hits.len()
    );
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.score = score;
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(())
}

/// Collapse hits whose line ranges overlap within a file to the first
/// (highest-scoring) one. Input must be sorted best first.
#[must_use]
pub fn deduplicate(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut kept: Vec<SearchHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        if !kept.iter().any(|k| k.chunk.overlaps(&hit.chunk)) {
            kept.push(hit);
        }
    }
    kept
}

/// Pick a search mode from the shape of the query.
///
/// A lone identifier in `snake_case`, `camelCase` or `CamelCase` is looked up
/// exactly; text with code punctuation goes to keyword search; everything
/// else is hybrid.
#[must_use]
pub fn classify_query(text: &str) -> SearchMode {
    let text = text.trim();
    if looks_like_symbol(text) {
        return SearchMode::Exact;
    }
    if ["()", "{}", "[]", "=>", "::"].iter().any(|p| text.contains(p)) {
        return SearchMode::Keyword;
    }
    SearchMode::Hybrid
}

fn looks_like_symbol(text: &str) -> bool {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_')
        || !text.chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        return false;
    }
    text.contains('_') || first.is_uppercase() || chars.any(char::is_uppercase)
}
