//! Qdrant adapter
//!
//! Documents become points keyed by a UUIDv5 of the document id; the original id,
//! the text and the metadata travel in the payload. Only single-vector
//! collections are supported.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        self, value::Kind, CreateCollection, DeleteCollection, Distance, HnswConfigDiff,
        PointStruct, SearchPoints, UpsertPoints, Value, VectorParams,
    },
    Payload, Qdrant, QdrantError,
};
use tracing::{debug, info, warn};

use super::{stable_uuid, validate_document, validate_finite, validate_spec, VectorStore};
use crate::{
    call::CallContext,
    error::{CollectionError, SearchError, UpsertError, UpsertFailure},
    query::SearchQuery,
    types::{
        BatchReport, CollectionSpec, CollectionStatus, Document, DistanceMetric, Metadata, Scalar,
        SearchHit, SearchResult, DOC_ID_FIELD,
    },
    RagError, Result,
};

const HNSW_M: u64 = 16;
const HNSW_EF_CONSTRUCT: u64 = 100;

/// Vector store backed by a Qdrant server
pub struct QdrantStore {
    client: Qdrant,
    known: RwLock<HashMap<String, CollectionSpec>>,
}

impl QdrantStore {
    /// Connect to the Qdrant gRPC endpoint at `uri`
    pub fn new(uri: &str) -> Result<Self> {
        let client = Qdrant::from_url(uri)
            .build()
            .map_err(|e| RagError::Config(format!("Invalid Qdrant endpoint {uri}: {e}")))?;
        Ok(Self {
            client,
            known: RwLock::new(HashMap::new()),
        })
    }

    fn known_spec(&self, name: &str) -> Option<CollectionSpec> {
        self.known.read().get(name).cloned()
    }

    fn to_point(document: &Document) -> PointStruct {
        let mut payload_map: HashMap<String, Value> = document
            .payload()
            .into_iter()
            .map(|(key, value)| (key, scalar_to_value(value)))
            .collect();
        payload_map.insert(
            DOC_ID_FIELD.to_string(),
            Value {
                kind: Some(Kind::StringValue(document.id.clone())),
            },
        );
        let payload: Payload = payload_map.into();
        PointStruct::new(
            qdrant::PointId::from(stable_uuid(&document.id).to_string()),
            document.vector.clone(),
            payload,
        )
    }

    /// Local checks before a point leaves the process
    fn check(&self, collection: &str, document: &Document) -> std::result::Result<(), UpsertFailure> {
        if !document.named_vectors.is_empty() {
            let target = document.named_vectors.keys().next().cloned().unwrap_or_default();
            return Err(UpsertFailure::UnknownTarget(target));
        }
        match self.known_spec(collection) {
            Some(spec) => validate_document(&spec, document),
            None => validate_finite(document),
        }
    }

    async fn write_points(
        &self,
        collection: &str,
        points: Vec<PointStruct>,
        ctx: &CallContext,
    ) -> std::result::Result<(), UpsertFailure> {
        let request = UpsertPoints {
            collection_name: collection.to_string(),
            wait: Some(true),
            points,
            ..Default::default()
        };
        ctx.run(self.client.upsert_points(request))
            .await?
            .map(|_| ())
            .map_err(|err| upsert_failure(collection, err))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        ctx: &CallContext,
    ) -> std::result::Result<CollectionStatus, CollectionError> {
        validate_spec(spec)?;
        if !spec.targets.is_empty() {
            return Err(CollectionError::Invalid(format!(
                "collection {} declares named targets, which the Qdrant store does not support",
                spec.name
            )));
        }

        let exists = ctx
            .run(self.client.collection_exists(&spec.name))
            .await?
            .map_err(|e| CollectionError::Transport(e.to_string()))?;
        if exists {
            debug!("Qdrant collection {} already exists", spec.name);
            self.known.write().insert(spec.name.clone(), spec.clone());
            return Ok(CollectionStatus::AlreadyExists);
        }

        let request = CreateCollection {
            collection_name: spec.name.clone(),
            vectors_config: Some(qdrant::VectorsConfig {
                config: Some(qdrant::vectors_config::Config::Params(VectorParams {
                    size: spec.dimension as u64,
                    distance: distance_of(spec.metric) as i32,
                    ..Default::default()
                })),
            }),
            hnsw_config: Some(HnswConfigDiff {
                m: Some(HNSW_M),
                ef_construct: Some(HNSW_EF_CONSTRUCT),
                ..Default::default()
            }),
            ..Default::default()
        };
        match ctx.run(self.client.create_collection(request)).await? {
            Ok(_) => {
                info!(
                    "Created Qdrant collection {} ({}d, {})",
                    spec.name,
                    spec.dimension,
                    spec.metric.as_str()
                );
                self.known.write().insert(spec.name.clone(), spec.clone());
                Ok(CollectionStatus::Created)
            }
            // Lost a race with another creator
            Err(err) if err.to_string().contains("already exists") => {
                self.known.write().insert(spec.name.clone(), spec.clone());
                Ok(CollectionStatus::AlreadyExists)
            }
            Err(err) => Err(CollectionError::Transport(err.to_string())),
        }
    }

    async fn delete_collection(
        &self,
        name: &str,
        ctx: &CallContext,
    ) -> std::result::Result<(), CollectionError> {
        let name = name.to_string();
        let exists = ctx
            .run(self.client.collection_exists(&name))
            .await?
            .map_err(|e| CollectionError::Transport(e.to_string()))?;
        if !exists {
            return Err(CollectionError::NotFound(name));
        }
        let request = DeleteCollection {
            collection_name: name.clone(),
            ..Default::default()
        };
        ctx.run(self.client.delete_collection(request))
            .await?
            .map_err(|e| CollectionError::Transport(e.to_string()))?;
        self.known.write().remove(&name);
        info!("Deleted Qdrant collection {}", name);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        document: &Document,
        ctx: &CallContext,
    ) -> std::result::Result<(), UpsertError> {
        self.check(collection, document)
            .map_err(|reason| UpsertError::new(&document.id, reason))?;
        self.write_points(collection, vec![Self::to_point(document)], ctx)
            .await
            .map_err(|reason| UpsertError::new(&document.id, reason))
    }

    /// Valid documents go out in one request; a failed request fails each of them
    async fn upsert_batch(
        &self,
        collection: &str,
        documents: &[Document],
        ctx: &CallContext,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut accepted = Vec::new();
        let mut points = Vec::new();
        for document in documents {
            match self.check(collection, document) {
                Ok(()) => {
                    accepted.push(document.id.clone());
                    points.push(Self::to_point(document));
                }
                Err(reason) => {
                    warn!("Skipping document {} for {}: {}", document.id, collection, reason);
                    report.failed.push(UpsertError::new(&document.id, reason));
                }
            }
        }
        if points.is_empty() {
            return report;
        }

        match self.write_points(collection, points, ctx).await {
            Ok(()) => report.succeeded.extend(accepted),
            Err(reason) => {
                warn!(
                    "Qdrant batch upsert of {} points into {} failed: {}",
                    accepted.len(),
                    collection,
                    reason
                );
                report.failed.extend(
                    accepted
                        .into_iter()
                        .map(|id| UpsertError::new(id, reason.clone())),
                );
            }
        }
        report
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        ctx: &CallContext,
    ) -> std::result::Result<SearchResult, SearchError> {
        if query.is_multi_target() || !query.target_vectors.is_empty() {
            return Err(SearchError::Malformed(
                "the Qdrant store does not support target vectors".to_string(),
            ));
        }
        let vector = query
            .vector
            .clone()
            .ok_or_else(|| SearchError::Malformed("query has no vector".to_string()))?;
        if query.limit == 0 {
            return Ok(SearchResult::default());
        }

        let metric = self
            .known_spec(collection)
            .map(|spec| spec.metric)
            .unwrap_or_default();
        if query.certainty.is_some() && metric != DistanceMetric::Cosine {
            return Err(SearchError::Malformed(format!(
                "certainty is only defined for cosine collections, {} uses {}",
                collection,
                metric.as_str()
            )));
        }

        let request = SearchPoints {
            collection_name: collection.to_string(),
            vector,
            limit: query.limit as u64,
            // Qdrant's cosine score is cos; certainty is (1 + cos) / 2
            score_threshold: query.certainty.map(|certainty| 2.0 * certainty - 1.0),
            with_payload: Some(qdrant::WithPayloadSelector {
                selector_options: Some(qdrant::with_payload_selector::SelectorOptions::Enable(
                    true,
                )),
            }),
            ..Default::default()
        };
        let response = ctx
            .run(self.client.search_points(request))
            .await?
            .map_err(|err| search_failure(collection, err))?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let (distance, score, certainty) = from_qdrant_score(metric, point.score);
            if let Some(max) = query.distance {
                if distance > max {
                    continue;
                }
            }
            let mut payload: Metadata = point
                .payload
                .iter()
                .filter_map(|(key, value)| value_to_scalar(value).map(|s| (key.clone(), s)))
                .collect();
            let id = match payload.remove(DOC_ID_FIELD) {
                Some(Scalar::String(id)) => id,
                _ => point_id_string(point.id.as_ref()),
            };
            if !query.include_payload {
                payload.clear();
            }
            hits.push(SearchHit {
                id,
                score,
                distance: Some(distance),
                certainty,
                payload,
            });
        }
        debug!("Qdrant search on {} returned {} hits", collection, hits.len());
        Ok(SearchResult::new(hits))
    }
}

fn distance_of(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Euclidean => Distance::Euclid,
        DistanceMetric::Dot => Distance::Dot,
    }
}

/// Map a Qdrant score to (distance, score, certainty) on this crate's scales
fn from_qdrant_score(metric: DistanceMetric, raw: f32) -> (f32, f32, Option<f32>) {
    match metric {
        DistanceMetric::Cosine => {
            let distance = 1.0 - raw;
            (distance, raw, Some(1.0 - distance / 2.0))
        }
        // Qdrant reports plain L2 distance
        DistanceMetric::Euclidean => {
            let distance = raw * raw;
            (distance, 1.0 / (1.0 + distance), None)
        }
        DistanceMetric::Dot => (-raw, raw, None),
    }
}

fn is_missing_collection(err: &QdrantError) -> bool {
    let message = err.to_string();
    message.contains("doesn't exist") || message.contains("Not found")
}

/// Requests the server refused as invalid, such as a vector of the wrong size
fn is_invalid_request(err: &QdrantError) -> bool {
    let message = err.to_string();
    message.contains("Wrong input") || message.contains("invalid argument")
}

fn search_failure(collection: &str, err: QdrantError) -> SearchError {
    if is_missing_collection(&err) {
        SearchError::CollectionNotFound(collection.to_string())
    } else if is_invalid_request(&err) {
        SearchError::Malformed(err.to_string())
    } else {
        SearchError::Transport(err.to_string())
    }
}

fn upsert_failure(collection: &str, err: QdrantError) -> UpsertFailure {
    if is_missing_collection(&err) {
        UpsertFailure::CollectionNotFound(collection.to_string())
    } else if is_invalid_request(&err) {
        UpsertFailure::Rejected(err.to_string())
    } else {
        UpsertFailure::Transport(err.to_string())
    }
}

fn scalar_to_value(scalar: Scalar) -> Value {
    let kind = match scalar {
        Scalar::Bool(value) => Kind::BoolValue(value),
        Scalar::Integer(value) => Kind::IntegerValue(value),
        Scalar::Float(value) => Kind::DoubleValue(value),
        Scalar::String(value) => Kind::StringValue(value),
    };
    Value { kind: Some(kind) }
}

fn value_to_scalar(value: &Value) -> Option<Scalar> {
    match value.kind.as_ref()? {
        Kind::BoolValue(value) => Some(Scalar::Bool(*value)),
        Kind::IntegerValue(value) => Some(Scalar::Integer(*value)),
        Kind::DoubleValue(value) => Some(Scalar::Float(*value)),
        Kind::StringValue(value) => Some(Scalar::String(value.clone())),
        _ => None,
    }
}

fn point_id_string(id: Option<&qdrant::PointId>) -> String {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(qdrant::point_id::PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(qdrant::point_id::PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}
