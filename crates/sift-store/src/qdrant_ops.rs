//! Qdrant backend for [`VectorStore`].
//!
//! Points live in named vector spaces (`dense`, `sparse`). Qdrant only accepts
//! integer or UUID point ids, so string ids are mapped onto UUIDv5 and the
//! original id is kept in the `point_key` payload field.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, NamedVectors, PointStruct, Query,
    QueryPointsBuilder, ScrollPointsBuilder, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
    UpsertPointsBuilder, Value, VectorInput, VectorParamsBuilder, VectorsConfigBuilder,
    VectorsOutput, value::Kind, vector_output,
};

use crate::vector_store::{
    BoxFuture, FieldCondition, FieldMatch, FieldValue, Payload, PointVectors, QueryVector,
    ScoredVectorPoint, SparseVector, VectorFilter, VectorPoint, VectorQuery, VectorStore,
    VectorStoreError,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

pub const DENSE_VECTOR: &str = "dense";
pub const SPARSE_VECTOR: &str = "sparse";
const POINT_KEY: &str = "point_key";

/// Payload fields indexed as keywords on collection creation.
const KEYWORD_FIELDS: &[&str] = &["file_path", "language", "kind", "symbol_key"];

/// Thin wrapper over [`Qdrant`] implementing the store contract.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url).build().map_err(Box::new)?;
        Ok(Self { client })
    }

    async fn create_if_missing(&self, collection: &str, vector_size: u64) -> QdrantResult<()> {
        if self
            .client
            .collection_exists(collection)
            .await
            .map_err(Box::new)?
        {
            return Ok(());
        }
        let mut dense = VectorsConfigBuilder::default();
        dense.add_named_vector_params(
            DENSE_VECTOR,
            VectorParamsBuilder::new(vector_size, Distance::Cosine),
        );
        let mut sparse = SparseVectorsConfigBuilder::default();
        sparse.add_named_vector_params(SPARSE_VECTOR, SparseVectorParamsBuilder::default());

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(dense)
                    .sparse_vectors_config(sparse),
            )
            .await
            .map_err(Box::new)?;

        for field in KEYWORD_FIELDS {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    collection,
                    *field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(Box::new)?;
        }
        tracing::info!(collection, vector_size, "qdrant collection created");
        Ok(())
    }

    async fn count(&self, collection: &str, filter: Filter) -> QdrantResult<u64> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(collection)
                    .filter(filter)
                    .exact(true),
            )
            .await
            .map_err(Box::new)?;
        Ok(response.result.map_or(0, |r| r.count))
    }
}

/// Deterministic UUID for a string point id.
#[must_use]
pub fn point_uuid(id: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

fn to_qdrant_filter(filter: VectorFilter) -> Filter {
    Filter {
        must: filter.must.into_iter().map(to_qdrant_condition).collect(),
        must_not: filter.must_not.into_iter().map(to_qdrant_condition).collect(),
        ..Default::default()
    }
}

fn to_qdrant_condition(cond: FieldCondition) -> Condition {
    match cond.value {
        FieldMatch::Value(FieldValue::Integer(v)) => Condition::matches(cond.field, v),
        FieldMatch::Value(FieldValue::Text(v)) => Condition::matches(cond.field, v),
        FieldMatch::Any(values) => Condition::matches(cond.field, values),
    }
}

fn to_qdrant_payload(payload: Payload) -> Result<HashMap<String, Value>, VectorStoreError> {
    serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(obj)) => serde_json::Value::Object(
            obj.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

fn from_qdrant_payload(payload: HashMap<String, Value>) -> (String, Payload) {
    let mut payload: Payload = payload
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect();
    let key = match payload.remove(POINT_KEY) {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };
    (key, payload)
}

fn from_qdrant_vectors(vectors: &VectorsOutput) -> Result<PointVectors, VectorStoreError> {
    let dense = match vectors.get_vector_by_name(DENSE_VECTOR) {
        Some(vector_output::Vector::Dense(v)) => v.data,
        _ => return Err(VectorStoreError::Scroll("point without dense vector".into())),
    };
    let sparse = match vectors.get_vector_by_name(SPARSE_VECTOR) {
        Some(vector_output::Vector::Sparse(v)) => Some(SparseVector::new(v.indices, v.values)),
        _ => None,
    };
    Ok(PointVectors { dense, sparse })
}

impl VectorStore for QdrantOps {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.create_if_missing(&collection, vector_size)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let mut qdrant_points = Vec::with_capacity(points.len());
            for p in points {
                let mut payload = p.payload;
                payload.insert(POINT_KEY.into(), serde_json::Value::String(p.id.clone()));
                let mut vectors = NamedVectors::default().add_vector(DENSE_VECTOR, p.vectors.dense);
                if let Some(sparse) = p.vectors.sparse {
                    vectors = vectors.add_vector(
                        SPARSE_VECTOR,
                        qdrant_client::qdrant::Vector::new_sparse(sparse.indices, sparse.values),
                    );
                }
                qdrant_points.push(PointStruct::new(
                    point_uuid(&p.id),
                    vectors,
                    to_qdrant_payload(payload)?,
                ));
            }
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
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
            let filter = to_qdrant_filter(filter);
            let count = self
                .count(&collection, filter.clone())
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if count == 0 {
                return Ok(0);
            }
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(filter).wait(true))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(count)
        })
    }

    fn query(
        &self,
        collection: &str,
        query: VectorQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let (input, using) = match query.vector {
                QueryVector::Dense(v) => (VectorInput::new_dense(v), DENSE_VECTOR),
                QueryVector::Sparse(v) => (VectorInput::new_sparse(v.indices, v.values), SPARSE_VECTOR),
            };
            let mut builder = QueryPointsBuilder::new(&collection)
                .query(Query::new_nearest(input))
                .using(using)
                .limit(query.limit)
                .with_payload(true);
            if let Some(f) = query.filter {
                builder = builder.filter(to_qdrant_filter(f));
            }
            let response = self
                .client
                .query(builder)
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            Ok(response
                .result
                .into_iter()
                .map(|point| {
                    let (id, payload) = from_qdrant_payload(point.payload);
                    ScoredVectorPoint {
                        id,
                        score: point.score,
                        payload,
                    }
                })
                .collect())
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
            let response = self
                .client
                .scroll(
                    ScrollPointsBuilder::new(&collection)
                        .filter(to_qdrant_filter(filter))
                        .limit(limit)
                        .with_payload(true)
                        .with_vectors(false),
                )
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            Ok(response
                .result
                .into_iter()
                .map(|point| {
                    let (id, payload) = from_qdrant_payload(point.payload);
                    ScoredVectorPoint {
                        id,
                        score: 1.0,
                        payload,
                    }
                })
                .collect())
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
            let response = self
                .client
                .scroll(
                    ScrollPointsBuilder::new(&collection)
                        .filter(to_qdrant_filter(filter))
                        .limit(limit)
                        .with_payload(true)
                        .with_vectors(true),
                )
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            response
                .result
                .into_iter()
                .map(|point| {
                    let vectors = point
                        .vectors
                        .as_ref()
                        .map(from_qdrant_vectors)
                        .transpose()?
                        .ok_or_else(|| VectorStoreError::Scroll("point without vectors".into()))?;
                    let (id, payload) = from_qdrant_payload(point.payload);
                    Ok(VectorPoint {
                        id,
                        vectors,
                        payload,
                    })
                })
                .collect()
        })
    }
}
