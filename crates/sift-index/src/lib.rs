//! Structural code indexing, incremental reconciliation and hybrid retrieval.
//!
//! Provides a code RAG core: tree-sitter splits source files into semantic
//! chunks, the incremental indexer keeps a [`VectorStore`](sift_store::VectorStore)
//! in sync with the working tree using the VCS delta and content hashes, the
//! hybrid search engine fuses dense and sparse retrieval with RRF, and the
//! context assembler packs ranked hits into a token budget.

pub mod assembler;
pub mod change;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod fusion;
pub mod indexer;
pub mod languages;
pub mod search;
pub mod state;
pub(crate) mod syntax;
pub mod tokens;
pub mod watcher;

pub use assembler::{
    AssembledContext, BudgetAllocation, BudgetStrategy, ContextAssembler, ContextChunk, Priority,
};
pub use change::{ChangeDetector, ChangeKind, FileChange, GitChangeDetector};
pub use chunker::{Chunk, ChunkKind, ChunkedFile, ChunkerConfig, FileOverview, chunk_source};
pub use config::SiftConfig;
pub use embed::{DenseEmbedder, EmbedPool, Embedders, Reranker, SparseEmbedder};
pub use error::{IndexError, Result};
pub use indexer::{IncrementalIndexer, ReconcileReport};
pub use languages::Lang;
pub use search::{
    CollectionKind, HybridSearchEngine, SearchFilters, SearchHit, SearchMode, SearchRequest,
    SearchResponse, classify_query,
};
pub use state::IndexState;
pub use tokens::{CharEstimator, TokenCounter};
pub use watcher::IndexWatcher;
