use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Payload = HashMap<String, serde_json::Value>;

/// Term-weighted vector in `(indices, values)` form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    #[must_use]
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Self {
        Self { indices, values }
    }

    /// Dot product over shared indices.
    #[must_use]
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let weights: HashMap<u32, f32> = other
            .indices
            .iter()
            .copied()
            .zip(other.values.iter().copied())
            .collect();
        self.indices
            .iter()
            .zip(&self.values)
            .filter_map(|(i, v)| weights.get(i).map(|w| v * w))
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointVectors {
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vectors: PointVectors,
    pub payload: Payload,
}

/// Conjunction of `must` conditions minus any point matching a `must_not` condition.
///
/// An empty filter matches every point.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn must(conditions: impl IntoIterator<Item = FieldCondition>) -> Self {
        Self {
            must: conditions.into_iter().collect(),
            must_not: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Check a payload against this filter.
    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        let all_must = self.must.iter().all(|cond| {
            payload
                .get(&cond.field)
                .is_some_and(|val| cond.value.matches(val))
        });
        let any_must_not = self.must_not.iter().any(|cond| {
            payload
                .get(&cond.field)
                .is_some_and(|val| cond.value.matches(val))
        });
        all_must && !any_must_not
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldMatch,
}

impl FieldCondition {
    /// Field equals `value`.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            value: FieldMatch::Value(value.into()),
        }
    }

    /// Field equals one of `values`.
    #[must_use]
    pub fn any(field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            value: FieldMatch::Any(values),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldMatch {
    Value(FieldValue),
    Any(Vec<String>),
}

impl FieldMatch {
    fn matches(&self, val: &serde_json::Value) -> bool {
        match self {
            Self::Value(FieldValue::Integer(i)) => val.as_i64() == Some(*i),
            Self::Value(FieldValue::Text(s)) => val.as_str() == Some(s.as_str()),
            Self::Any(values) => val
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[derive(Debug, Clone)]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

/// Single nearest-neighbour query against one named vector space.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: QueryVector,
    pub filter: Option<VectorFilter>,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Narrow contract over an external vector/payload store.
///
/// Every point carries a dense vector and optionally a sparse one. Filters are
/// field-equality and membership predicates over the payload.
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing. Idempotent.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Delete every point matching `filter`, returning how many were removed.
    fn delete(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    /// Ranked nearest-neighbour query, best first.
    fn query(
        &self,
        collection: &str,
        query: VectorQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Unranked payload scan. Scores are always `1.0`.
    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Like [`scroll`](Self::scroll), but returns whole points with their
    /// vectors so they can be re-keyed without re-embedding.
    fn scroll_points(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>>;
}
