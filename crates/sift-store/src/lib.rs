//! Vector/payload store contract consumed by the sift code index.
//!
//! The index never talks to a storage engine directly: it upserts, deletes,
//! queries and scrolls through [`VectorStore`]. Two backends ship here, an
//! in-process map for tests and a Qdrant adapter behind the `qdrant` feature.

pub mod in_memory_store;
#[cfg(feature = "qdrant")]
pub mod qdrant_ops;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
#[cfg(feature = "qdrant")]
pub use qdrant_ops::QdrantOps;
pub use vector_store::{
    BoxFuture, FieldCondition, FieldMatch, FieldValue, Payload, PointVectors, QueryVector,
    ScoredVectorPoint, SparseVector, VectorFilter, VectorPoint, VectorQuery, VectorStore,
    VectorStoreError,
};
