//! Vector stores: collection management, upsert and nearest-neighbour search
//!
//! Every backing store is one adapter implementing [`VectorStore`]; it converts
//! the store's own response shape into [`SearchResult`]. Retrieval and
//! orchestration code only ever sees the trait.

pub mod memory;
pub mod scoring;

#[cfg(feature = "qdrant")]
pub mod qdrant;
#[cfg(feature = "weaviate")]
pub mod weaviate;

use async_trait::async_trait;
use tracing::warn;

pub use memory::InMemoryStore;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantStore;
#[cfg(feature = "weaviate")]
pub use weaviate::WeaviateStore;

use crate::{
    call::CallContext,
    error::{CollectionError, SearchError, UpsertError, UpsertFailure},
    query::SearchQuery,
    types::{BatchReport, CollectionSpec, CollectionStatus, Document, SearchResult},
};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create a collection
    ///
    /// An existing collection with the same definition is
    /// `Ok(CollectionStatus::AlreadyExists)`, never an error.
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        ctx: &CallContext,
    ) -> Result<CollectionStatus, CollectionError>;

    /// Delete a collection; a missing one is `CollectionError::NotFound`
    async fn delete_collection(&self, name: &str, ctx: &CallContext)
        -> Result<(), CollectionError>;

    /// Insert or overwrite one document by id
    async fn upsert(
        &self,
        collection: &str,
        document: &Document,
        ctx: &CallContext,
    ) -> Result<(), UpsertError>;

    /// Upsert many documents, reporting failures per document
    ///
    /// One bad document never stops the rest. The default writes them one by one.
    async fn upsert_batch(
        &self,
        collection: &str,
        documents: &[Document],
        ctx: &CallContext,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for document in documents {
            if ctx.is_cancelled() {
                report
                    .failed
                    .push(UpsertError::new(&document.id, UpsertFailure::Cancelled));
                continue;
            }
            match self.upsert(collection, document, ctx).await {
                Ok(()) => report.succeeded.push(document.id.clone()),
                Err(err) => {
                    warn!(
                        backend = self.backend(),
                        collection = collection,
                        document_id = %err.document_id,
                        "upsert failed: {}",
                        err.reason
                    );
                    report.failed.push(err);
                }
            }
        }
        report
    }

    /// Nearest-neighbour search, hits ordered by decreasing relevance
    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        ctx: &CallContext,
    ) -> Result<SearchResult, SearchError>;
}

/// Check a collection definition before creating it
pub(crate) fn validate_spec(spec: &CollectionSpec) -> Result<(), CollectionError> {
    if spec.name.trim().is_empty() {
        return Err(CollectionError::Invalid(
            "collection name cannot be empty".to_string(),
        ));
    }
    if spec.dimension == 0 {
        return Err(CollectionError::Invalid(format!(
            "collection {} must have a non-zero dimension",
            spec.name
        )));
    }
    Ok(())
}

/// Check a document against its collection: dimensions, finiteness, declared targets
pub(crate) fn validate_document(
    spec: &CollectionSpec,
    document: &Document,
) -> Result<(), UpsertFailure> {
    check_vector(spec.dimension, &document.vector)?;
    for (target, vector) in &document.named_vectors {
        if !spec.targets.contains(target) {
            return Err(UpsertFailure::UnknownTarget(target.clone()));
        }
        check_vector(spec.dimension, vector)?;
    }
    Ok(())
}

/// Finiteness only, for stores whose dimension is not known locally
pub(crate) fn validate_finite(document: &Document) -> Result<(), UpsertFailure> {
    std::iter::once(&document.vector)
        .chain(document.named_vectors.values())
        .try_for_each(|vector| match vector.iter().position(|v| !v.is_finite()) {
            Some(position) => Err(UpsertFailure::NonFinite(position)),
            None => Ok(()),
        })
}

fn check_vector(dimension: usize, vector: &[f32]) -> Result<(), UpsertFailure> {
    if vector.len() != dimension {
        return Err(UpsertFailure::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
        return Err(UpsertFailure::NonFinite(position));
    }
    Ok(())
}

/// Deterministic document id for stores that require UUIDs
pub fn stable_uuid(document_id: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, document_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DistanceMetric;

    #[test]
    fn rejects_wrong_dimension_without_truncating() {
        let spec = CollectionSpec::new("docs", 3, DistanceMetric::Cosine);
        let document = Document::new("a", "text", vec![1.0, 2.0]);
        assert_eq!(
            validate_document(&spec, &document).unwrap_err(),
            UpsertFailure::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_undeclared_named_vector() {
        let spec = CollectionSpec::new("docs", 1, DistanceMetric::Cosine).with_targets(["title"]);
        let ok = Document::new("a", "t", vec![1.0]).with_named_vector("title", vec![0.5]);
        assert!(validate_document(&spec, &ok).is_ok());
        let bad = Document::new("b", "t", vec![1.0]).with_named_vector("body", vec![0.5]);
        assert_eq!(
            validate_document(&spec, &bad).unwrap_err(),
            UpsertFailure::UnknownTarget("body".into())
        );
    }

    #[test]
    fn finiteness_covers_named_vectors() {
        let document =
            Document::new("a", "t", vec![1.0]).with_named_vector("title", vec![0.0, f32::NAN]);
        assert_eq!(
            validate_finite(&document).unwrap_err(),
            UpsertFailure::NonFinite(1)
        );
    }

    #[test]
    fn stable_uuid_is_deterministic() {
        assert_eq!(stable_uuid("doc-1"), stable_uuid("doc-1"));
        assert_ne!(stable_uuid("doc-1"), stable_uuid("doc-2"));
    }
}
