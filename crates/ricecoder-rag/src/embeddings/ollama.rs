//! Ollama embedding client
//!
//! Talks to `POST /api/embeddings`. The HTTP client is pooled and shared, so one
//! embedder can serve concurrent pipelines.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{check_embedding, EmbeddingPrompts, EmbeddingProvider, EmbeddingPurpose};
use crate::{call::CallContext, error::EmbeddingError, types::Vector, RagError, Result};

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default pool idle timeout (90 seconds)
const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Default TCP keep-alive interval (60 seconds)
const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 60;

/// Build the pooled HTTP client shared by the Ollama and Weaviate adapters
pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(DEFAULT_TCP_KEEPALIVE_SECS))
        .build()
        .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Embedding provider backed by a local or remote Ollama server
pub struct OllamaEmbedder {
    client: Arc<Client>,
    base_url: String,
    model: String,
    prompts: EmbeddingPrompts,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    /// Create an embedder for `model` at `base_url`
    ///
    /// # Errors
    /// Returns `RagError::Config` if the URL or model name is empty
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::new_with_client(base_url, model, Arc::new(build_client()?))
    }

    /// Create an embedder that sends through an existing connection pool
    pub fn new_with_client(
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: Arc<Client>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let model = model.into();
        if base_url.is_empty() {
            return Err(RagError::Config("Ollama base URL is required".to_string()));
        }
        if model.is_empty() {
            return Err(RagError::Config(
                "Embedding model name is required".to_string(),
            ));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            prompts: EmbeddingPrompts::default(),
            dimension: None,
        })
    }

    /// Create an embedder against the default localhost endpoint
    pub fn with_default_endpoint(model: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_OLLAMA_URL, model)
    }

    pub fn with_prompts(mut self, prompts: EmbeddingPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Reject vectors whose length differs from `dimension`
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, prompt: &str) -> std::result::Result<Vec<f64>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = OllamaEmbeddingRequest {
            model: &self.model,
            prompt,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama embedding model {} not found: {}", self.model, error_text);
            return Err(EmbeddingError::InvalidModel(self.model.clone()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama embedding API error ({}): {}", status, error_text);
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: OllamaEmbeddingResponse = response.json().await?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
        ctx: &CallContext,
    ) -> std::result::Result<Vector, EmbeddingError> {
        let prompt = self.prompts.prepare(text, purpose)?;
        debug!(
            "Requesting {:?} embedding from Ollama model {} ({} chars)",
            purpose,
            self.model,
            prompt.len()
        );

        let raw = ctx.run(self.request(&prompt)).await??;
        let vector = raw.into_iter().map(|value| value as f32).collect();
        check_embedding(vector, self.dimension)
    }
}

/// Ollama API embedding request format
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama API embedding response format
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f64>,
}
