//! Query text in, ranked passages out
//!
//! The retriever composes an [`EmbeddingProvider`], the query builder and a
//! [`VectorStore`]. Each failure is wrapped in [`RetrievalError`] with its cause
//! kept as the error source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    call::CallContext,
    config::{DEFAULT_COLLECTION, DEFAULT_LIMIT},
    embeddings::{EmbeddingProvider, EmbeddingPurpose},
    error::RetrievalError,
    query::{QueryParams, TargetCombination},
    store::VectorStore,
    types::{RetrievedPassage, Scalar, Vector, TEXT_FIELD},
};

/// Search parameters applied to every retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub collection: String,
    pub limit: usize,
    #[serde(default)]
    pub certainty: Option<f32>,
    #[serde(default)]
    pub distance: Option<f32>,
    #[serde(default)]
    pub target_vectors: Vec<String>,
    #[serde(default)]
    pub combination: Option<TargetCombination>,
    /// Payload field holding the passage text
    pub text_field: String,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            limit: DEFAULT_LIMIT,
            certainty: None,
            distance: None,
            target_vectors: Vec::new(),
            combination: None,
            text_field: TEXT_FIELD.to_string(),
        }
    }
}

impl RetrievalSettings {
    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    fn query_params(&self, vector: Vector, limit: usize) -> QueryParams {
        let mut params = QueryParams::new(limit)
            .with_vector(vector)
            .with_target_vectors(self.target_vectors.iter().cloned());
        params.certainty = self.certainty;
        params.distance = self.distance;
        params.combination = self.combination;
        params
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed query text
    pub async fn embed_query(
        &self,
        query: &str,
        ctx: &CallContext,
    ) -> Result<Vector, RetrievalError> {
        self.embedder
            .embed(query, EmbeddingPurpose::Query, ctx)
            .await
            .map_err(RetrievalError::Embedding)
    }

    /// Embed `query` and return up to `limit` passages, most relevant first
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        ctx: &CallContext,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let vector = self.embed_query(query, ctx).await?;
        self.retrieve_by_vector(vector, limit, ctx).await
    }

    /// Search with an already-embedded query
    pub async fn retrieve_by_vector(
        &self,
        vector: Vector,
        limit: usize,
        ctx: &CallContext,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let query = self
            .settings
            .query_params(vector, limit)
            .build()
            .map_err(RetrievalError::Query)?;
        let result = self
            .store
            .search(&self.settings.collection, &query, ctx)
            .await
            .map_err(RetrievalError::Search)?;
        debug!(
            "Retrieved {} hits from {} collection {}",
            result.len(),
            self.store.backend(),
            self.settings.collection
        );

        result
            .hits
            .into_iter()
            .map(|mut hit| match hit.payload.remove(&self.settings.text_field) {
                Some(Scalar::String(text)) => Ok(RetrievedPassage {
                    id: hit.id,
                    text,
                    score: hit.score,
                }),
                _ => Err(RetrievalError::MissingText {
                    id: hit.id,
                    field: self.settings.text_field.clone(),
                }),
            })
            .collect()
    }
}
