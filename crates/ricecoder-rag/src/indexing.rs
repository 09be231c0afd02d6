//! Corpus indexing: embed raw texts and write them to a collection

use std::sync::Arc;

use futures::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    call::CallContext,
    embeddings::{EmbeddingProvider, EmbeddingPurpose},
    error::{CollectionError, UpsertError, UpsertFailure},
    store::{stable_uuid, VectorStore},
    types::{BatchReport, CollectionSpec, CollectionStatus, Document},
};

/// Metadata key recording a text's position in the input slice
pub const SOURCE_INDEX_FIELD: &str = "source_index";

pub const DEFAULT_INDEX_CONCURRENCY: usize = 4;

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    concurrency: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            concurrency: DEFAULT_INDEX_CONCURRENCY,
        }
    }

    /// Number of embedding calls in flight at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection, treating an existing one as a warning
    pub async fn ensure_collection(
        &self,
        spec: &CollectionSpec,
        ctx: &CallContext,
    ) -> Result<CollectionStatus, CollectionError> {
        match self.store.create_collection(spec, ctx).await {
            Ok(CollectionStatus::AlreadyExists) => {
                warn!("Collection {} already exists", spec.name);
                Ok(CollectionStatus::AlreadyExists)
            }
            Ok(CollectionStatus::Created) => {
                info!("Collection {} created", spec.name);
                Ok(CollectionStatus::Created)
            }
            Err(err) => {
                error!("Failed to create collection {}: {}", spec.name, err);
                Err(err)
            }
        }
    }

    /// Embed every text as a passage and upsert the results
    ///
    /// Document ids are UUIDv5 of the text, so re-indexing the same text
    /// overwrites. A text that fails to embed is reported and skipped.
    pub async fn index_texts<S>(&self, texts: &[S], ctx: &CallContext) -> BatchReport
    where
        S: AsRef<str> + Sync,
    {
        let embedder = &self.embedder;
        let mut embedded: Vec<(usize, Result<Document, UpsertError>)> =
            stream::iter(texts.iter().enumerate())
                .map(|(index, text)| async move {
                    let text = text.as_ref();
                    let id = stable_uuid(text).to_string();
                    let outcome = match embedder.embed(text, EmbeddingPurpose::Passage, ctx).await {
                        Ok(vector) => Ok(Document::new(id, text, vector)
                            .with_metadata(SOURCE_INDEX_FIELD, index as i64)),
                        Err(err) => {
                            warn!("Failed to embed text {}: {}", index, err);
                            Err(UpsertError::new(id, UpsertFailure::Embedding(err)))
                        }
                    };
                    (index, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        embedded.sort_by_key(|(index, _)| *index);

        let mut documents = Vec::with_capacity(embedded.len());
        let mut embed_failures = Vec::new();
        for (_, outcome) in embedded {
            match outcome {
                Ok(document) => documents.push(document),
                Err(failure) => embed_failures.push(failure),
            }
        }

        let mut report = self.index_documents(&documents, ctx).await;
        report.failed.extend(embed_failures);
        info!(
            "Indexed {}/{} texts into {}",
            report.succeeded.len(),
            texts.len(),
            self.collection
        );
        report
    }

    /// Upsert pre-embedded documents
    pub async fn index_documents(&self, documents: &[Document], ctx: &CallContext) -> BatchReport {
        if documents.is_empty() {
            return BatchReport::default();
        }
        debug!(
            "Upserting {} documents into {} collection {}",
            documents.len(),
            self.store.backend(),
            self.collection
        );
        self.store
            .upsert_batch(&self.collection, documents, ctx)
            .await
    }
}
