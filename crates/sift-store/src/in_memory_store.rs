use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, Payload, PointVectors, QueryVector, ScoredVectorPoint, VectorFilter, VectorPoint,
    VectorQuery, VectorStore, VectorStoreError,
};

struct StoredPoint {
    vectors: PointVectors,
    payload: Payload,
}

#[derive(Default)]
struct InMemoryCollection {
    points: HashMap<String, StoredPoint>,
}

/// Process-local store used by tests and single-process embedders.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of points in `collection`, zero if it does not exist.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|cols| cols.get(collection).map_or(0, |c| c.points.len()))
            .unwrap_or(0)
    }

    /// Snapshot of every payload in `collection`, ordered by point id.
    #[must_use]
    pub fn payloads(&self, collection: &str) -> Vec<(String, Payload)> {
        let Ok(cols) = self.collections.read() else {
            return Vec::new();
        };
        let mut out: Vec<(String, Payload)> = cols
            .get(collection)
            .map(|c| {
                c.points
                    .iter()
                    .map(|(id, p)| (id.clone(), p.payload.clone()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(collection).or_default();
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        vectors: p.vectors,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn delete(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Delete(format!("collection {collection} not found"))
            })?;
            let before = col.points.len();
            col.points.retain(|_, p| !filter.matches(&p.payload));
            Ok((before - col.points.len()) as u64)
        })
    }

    fn query(
        &self,
        collection: &str,
        query: VectorQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Query(format!("collection {collection} not found"))
            })?;

            let filter = query.filter.unwrap_or_default();
            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| filter.matches(&sp.payload))
                .filter_map(|(id, sp)| {
                    let score = match &query.vector {
                        QueryVector::Dense(v) => cosine_similarity(v, &sp.vectors.dense),
                        QueryVector::Sparse(v) => v.dot(sp.vectors.sparse.as_ref()?),
                    };
                    Some(ScoredVectorPoint {
                        id: id.clone(),
                        score,
                        payload: sp.payload.clone(),
                    })
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            scored.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Scroll(format!("collection {collection} not found"))
            })?;

            let mut points: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| filter.matches(&sp.payload))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: 1.0,
                    payload: sp.payload.clone(),
                })
                .collect();
            points.sort_by(|a, b| a.id.cmp(&b.id));
            points.truncate(limit as usize);
            Ok(points)
        })
    }

    fn scroll_points(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Scroll(format!("collection {collection} not found"))
            })?;

            let mut points: Vec<VectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| filter.matches(&sp.payload))
                .map(|(id, sp)| VectorPoint {
                    id: id.clone(),
                    vectors: sp.vectors.clone(),
                    payload: sp.payload.clone(),
                })
                .collect();
            points.sort_by(|a, b| a.id.cmp(&b.id));
            points.truncate(limit as usize);
            Ok(points)
        })
    }
}
