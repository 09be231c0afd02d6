//! In-process vector store
//!
//! Exhaustive scan over every document of a collection. Used for tests, small
//! corpora, and as the reference behaviour the remote adapters are held to.

use std::{cmp::Ordering, collections::HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{scoring, validate_document, validate_spec, VectorStore};
use crate::{
    call::CallContext,
    error::{CollectionError, SearchError, UpsertError, UpsertFailure},
    query::SearchQuery,
    types::{
        CollectionSpec, CollectionStatus, Document, Metadata, SearchHit, SearchResult, Vector,
    },
};

struct Collection {
    spec: CollectionSpec,
    documents: HashMap<String, Document>,
}

/// Vector store kept entirely in memory
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`, `None` if it does not exist
    pub fn len(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.len())
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.documents.get(id).cloned())
    }

    pub fn spec(&self, collection: &str) -> Option<CollectionSpec> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.spec.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        ctx: &CallContext,
    ) -> Result<CollectionStatus, CollectionError> {
        if ctx.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }
        validate_spec(spec)?;

        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(&spec.name) {
            if existing.spec == *spec {
                debug!("Collection {} already exists", spec.name);
                return Ok(CollectionStatus::AlreadyExists);
            }
            return Err(CollectionError::Conflict {
                name: spec.name.clone(),
                detail: format!(
                    "existing definition is {}d {} with targets {:?}",
                    existing.spec.dimension,
                    existing.spec.metric.as_str(),
                    existing.spec.targets
                ),
            });
        }

        collections.insert(
            spec.name.clone(),
            Collection {
                spec: spec.clone(),
                documents: HashMap::new(),
            },
        );
        info!(
            "Created in-memory collection {} ({}d, {})",
            spec.name,
            spec.dimension,
            spec.metric.as_str()
        );
        Ok(CollectionStatus::Created)
    }

    async fn delete_collection(
        &self,
        name: &str,
        ctx: &CallContext,
    ) -> Result<(), CollectionError> {
        if ctx.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }
        match self.collections.write().remove(name) {
            Some(_) => {
                info!("Deleted in-memory collection {}", name);
                Ok(())
            }
            None => Err(CollectionError::NotFound(name.to_string())),
        }
    }

    async fn upsert(
        &self,
        collection: &str,
        document: &Document,
        ctx: &CallContext,
    ) -> Result<(), UpsertError> {
        let fail = |reason| UpsertError::new(&document.id, reason);
        if ctx.is_cancelled() {
            return Err(fail(UpsertFailure::Cancelled));
        }

        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| fail(UpsertFailure::CollectionNotFound(collection.to_string())))?;
        validate_document(&target.spec, document).map_err(fail)?;
        target
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        ctx: &CallContext,
    ) -> Result<SearchResult, SearchError> {
        if ctx.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let collections = self.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| SearchError::CollectionNotFound(collection.to_string()))?;
        let spec = &target.spec;

        if query.certainty.is_some() && scoring::certainty(spec.metric, 0.0).is_none() {
            return Err(SearchError::Malformed(format!(
                "certainty is only defined for cosine collections, {} uses {}",
                spec.name,
                spec.metric.as_str()
            )));
        }
        let plan = search_plan(spec, query)?;
        if query.limit == 0 {
            return Ok(SearchResult::default());
        }
        let combination = query.combination.unwrap_or_default();

        let mut hits = Vec::new();
        'documents: for document in target.documents.values() {
            let mut distances = Vec::with_capacity(plan.len());
            for (target_name, query_vector) in &plan {
                let stored = match target_name {
                    Some(name) => match document.named_vectors.get(*name) {
                        Some(vector) => vector,
                        None => continue 'documents,
                    },
                    None => &document.vector,
                };
                distances.push(scoring::distance(spec.metric, query_vector, stored));
            }
            let Some(distance) = combination.combine(&distances) else {
                continue;
            };
            let certainty = scoring::certainty(spec.metric, distance);

            if let (Some(min), Some(value)) = (query.certainty, certainty) {
                if value < min {
                    continue;
                }
            }
            if let Some(max) = query.distance {
                if distance > max {
                    continue;
                }
            }

            hits.push(SearchHit {
                id: document.id.clone(),
                score: scoring::score(spec.metric, distance),
                distance: Some(distance),
                certainty,
                payload: if query.include_payload {
                    document.payload()
                } else {
                    Metadata::new()
                },
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(query.limit);
        debug!(
            "In-memory search on {} returned {} hits",
            collection,
            hits.len()
        );
        Ok(SearchResult::new(hits))
    }
}

/// Pair every query vector with the document vector it is compared against
///
/// `None` means the document's primary vector.
fn search_plan<'q>(
    spec: &CollectionSpec,
    query: &'q SearchQuery,
) -> Result<Vec<(Option<&'q str>, &'q Vector)>, SearchError> {
    let mut plan = Vec::new();
    if query.is_multi_target() {
        for target in query.distinct_targets() {
            let vectors = query.vectors_per_target.get(target).ok_or_else(|| {
                SearchError::Malformed(format!("target {target} has no query vector"))
            })?;
            plan.extend(vectors.iter().map(|vector| (Some(target), vector)));
        }
    } else if let Some(vector) = &query.vector {
        let targets = query.distinct_targets();
        if targets.is_empty() {
            plan.push((None, vector));
        } else {
            plan.extend(targets.into_iter().map(|target| (Some(target), vector)));
        }
    } else {
        return Err(SearchError::Malformed("query has no vector".to_string()));
    }

    for (target, vector) in &plan {
        if let Some(target) = target {
            if !spec.targets.iter().any(|declared| declared == target) {
                return Err(SearchError::Malformed(format!(
                    "collection {} has no target vector {}",
                    spec.name, target
                )));
            }
        }
        if vector.len() != spec.dimension {
            return Err(SearchError::Malformed(format!(
                "query vector has {} dimensions, collection {} expects {}",
                vector.len(),
                spec.name,
                spec.dimension
            )));
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{query::QueryParams, types::DistanceMetric};

    async fn store_with(docs: &[(&str, Vector)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let ctx = CallContext::default();
        store
            .create_collection(&CollectionSpec::new("docs", 2, DistanceMetric::Cosine), &ctx)
            .await
            .unwrap();
        for (id, vector) in docs {
            store
                .upsert("docs", &Document::new(*id, format!("text of {id}"), vector.clone()), &ctx)
                .await
                .unwrap();
        }
        store
    }

    fn query(vector: Vector, limit: usize) -> SearchQuery {
        QueryParams::new(limit).with_vector(vector).build().unwrap()
    }

    #[tokio::test]
    async fn create_is_idempotent_for_identical_definitions() {
        let store = InMemoryStore::new();
        let ctx = CallContext::default();
        let spec = CollectionSpec::new("docs", 4, DistanceMetric::Cosine);
        assert_eq!(
            store.create_collection(&spec, &ctx).await.unwrap(),
            CollectionStatus::Created
        );
        assert_eq!(
            store.create_collection(&spec, &ctx).await.unwrap(),
            CollectionStatus::AlreadyExists
        );

        let different = CollectionSpec::new("docs", 8, DistanceMetric::Cosine);
        assert!(matches!(
            store.create_collection(&different, &ctx).await,
            Err(CollectionError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_zero_dimension() {
        let store = InMemoryStore::new();
        let spec = CollectionSpec::new("docs", 0, DistanceMetric::Cosine);
        assert!(matches!(
            store.create_collection(&spec, &CallContext::default()).await,
            Err(CollectionError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let store = store_with(&[]).await;
        let ctx = CallContext::default();
        store.delete_collection("docs", &ctx).await.unwrap();
        let err = store.delete_collection("docs", &ctx).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = store_with(&[("a", vec![1.0, 0.0])]).await;
        let ctx = CallContext::default();
        store
            .upsert("docs", &Document::new("a", "replaced", vec![0.0, 1.0]), &ctx)
            .await
            .unwrap();
        assert_eq!(store.len("docs"), Some(1));
        assert_eq!(store.get("docs", "a").unwrap().text, "replaced");
    }

    #[tokio::test]
    async fn upsert_into_missing_collection_names_the_document() {
        let store = InMemoryStore::new();
        let err = store
            .upsert(
                "missing",
                &Document::new("a", "t", vec![1.0]),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.document_id, "a");
        assert!(matches!(err.reason, UpsertFailure::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn stored_vector_is_its_own_top_hit() {
        let store = store_with(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.0, 1.0]),
            ("c", vec![0.7, 0.7]),
        ])
        .await;
        let result = store
            .search("docs", &query(vec![0.0, 1.0], 3), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(result.ids(), vec!["b", "c", "a"]);
        assert_eq!(result.hits[0].text(), Some("text of b"));
        assert!(result.hits[0].certainty.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn ties_are_broken_by_id() {
        let store = store_with(&[("z", vec![1.0, 0.0]), ("m", vec![2.0, 0.0])]).await;
        let result = store
            .search("docs", &query(vec![1.0, 0.0], 2), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(result.ids(), vec!["m", "z"]);
    }

    #[tokio::test]
    async fn limit_zero_returns_nothing() {
        let store = store_with(&[("a", vec![1.0, 0.0])]).await;
        let result = store
            .search("docs", &query(vec![1.0, 0.0], 0), &CallContext::default())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn thresholds_filter_independently() {
        let store = store_with(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]).await;
        let ctx = CallContext::default();

        let by_certainty = QueryParams::new(5)
            .with_vector(vec![1.0, 0.0])
            .with_certainty(0.9)
            .build()
            .unwrap();
        assert_eq!(
            store.search("docs", &by_certainty, &ctx).await.unwrap().ids(),
            vec!["a"]
        );

        let by_distance = QueryParams::new(5)
            .with_vector(vec![1.0, 0.0])
            .with_distance(1.5)
            .build()
            .unwrap();
        assert_eq!(
            store.search("docs", &by_distance, &ctx).await.unwrap().ids(),
            vec!["a", "b"]
        );

        let both = QueryParams::new(5)
            .with_vector(vec![1.0, 0.0])
            .with_certainty(0.4)
            .with_distance(0.5)
            .build()
            .unwrap();
        assert_eq!(store.search("docs", &both, &ctx).await.unwrap().ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn certainty_on_euclidean_collection_is_malformed() {
        let store = InMemoryStore::new();
        let ctx = CallContext::default();
        store
            .create_collection(&CollectionSpec::new("l2", 2, DistanceMetric::Euclidean), &ctx)
            .await
            .unwrap();
        let query = QueryParams::new(1)
            .with_vector(vec![1.0, 0.0])
            .with_certainty(0.5)
            .build()
            .unwrap();
        assert!(matches!(
            store.search("l2", &query, &ctx).await,
            Err(SearchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn query_dimension_mismatch_is_malformed() {
        let store = store_with(&[("a", vec![1.0, 0.0])]).await;
        assert!(matches!(
            store
                .search("docs", &query(vec![1.0, 0.0, 0.0], 1), &CallContext::default())
                .await,
            Err(SearchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn search_on_missing_collection_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .search("nope", &query(vec![1.0], 1), &CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::CollectionNotFound("nope".into()));
    }

    #[tokio::test]
    async fn multi_target_search_combines_distances() {
        let store = InMemoryStore::new();
        let ctx = CallContext::default();
        let spec = CollectionSpec::new("multi", 2, DistanceMetric::Cosine)
            .with_targets(["title", "body"]);
        store.create_collection(&spec, &ctx).await.unwrap();
        store
            .upsert(
                "multi",
                &Document::new("a", "a", vec![1.0, 0.0])
                    .with_named_vector("title", vec![1.0, 0.0])
                    .with_named_vector("body", vec![0.0, 1.0]),
                &ctx,
            )
            .await
            .unwrap();
        store
            .upsert(
                "multi",
                &Document::new("b", "b", vec![1.0, 0.0])
                    .with_named_vector("title", vec![0.0, 1.0])
                    .with_named_vector("body", vec![0.0, 1.0]),
                &ctx,
            )
            .await
            .unwrap();
        // Lacks the body target; skipped by multi-target queries
        store
            .upsert(
                "multi",
                &Document::new("c", "c", vec![1.0, 0.0]).with_named_vector("title", vec![1.0, 0.0]),
                &ctx,
            )
            .await
            .unwrap();

        let mut per_target = BTreeMap::new();
        per_target.insert("title".to_string(), vec![vec![1.0, 0.0]]);
        per_target.insert("body".to_string(), vec![vec![0.0, 1.0]]);
        let query = QueryParams::new(5)
            .with_vectors_per_target(per_target)
            .with_target_vectors(["title", "body"])
            .with_combination(crate::query::TargetCombination::Sum)
            .build()
            .unwrap();
        let result = store.search("multi", &query, &ctx).await.unwrap();
        assert_eq!(result.ids(), vec!["a", "b"]);
        assert!(result.hits[0].distance.unwrap().abs() < 1e-6);
        assert!((result.hits[1].distance.unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn undeclared_target_is_malformed() {
        let store = store_with(&[("a", vec![1.0, 0.0])]).await;
        let query = QueryParams::new(1)
            .with_vector(vec![1.0, 0.0])
            .with_target_vectors(["title"])
            .build()
            .unwrap();
        assert!(matches!(
            store.search("docs", &query, &CallContext::default()).await,
            Err(SearchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn payload_is_omitted_on_request() {
        let store = store_with(&[("a", vec![1.0, 0.0])]).await;
        let query = QueryParams::new(1)
            .with_vector(vec![1.0, 0.0])
            .with_payload(false)
            .build()
            .unwrap();
        let result = store
            .search("docs", &query, &CallContext::default())
            .await
            .unwrap();
        assert!(result.hits[0].payload.is_empty());
    }

    #[tokio::test]
    async fn batch_reports_each_failure() {
        let store = store_with(&[]).await;
        let docs = vec![
            Document::new("ok-1", "t", vec![1.0, 0.0]),
            Document::new("short", "t", vec![1.0]),
            Document::new("ok-2", "t", vec![0.0, 1.0]),
        ];
        let report = store
            .upsert_batch("docs", &docs, &CallContext::default())
            .await;
        assert_eq!(report.succeeded, vec!["ok-1", "ok-2"]);
        assert_eq!(report.failed_ids(), vec!["short"]);
        assert_eq!(store.len("docs"), Some(2));
    }

    #[tokio::test]
    async fn cancelled_context_writes_nothing() {
        let store = store_with(&[]).await;
        let ctx = CallContext::default();
        ctx.cancel();
        let report = store
            .upsert_batch("docs", &[Document::new("a", "t", vec![1.0, 0.0])], &ctx)
            .await;
        assert!(report.failed[0].is_cancelled());
        assert_eq!(store.len("docs"), Some(0));
    }
}
