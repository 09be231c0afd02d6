//! Embedding providers: text in, vector out

mod cache;
mod ollama;

use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::CachingEmbedder;
pub use ollama::{OllamaEmbedder, DEFAULT_OLLAMA_URL};
pub(crate) use ollama::build_client as http_client;

use crate::{call::CallContext, error::EmbeddingError, types::Vector};

/// What the text will be used for; lets asymmetric models use different prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingPurpose {
    Query,
    Passage,
}

/// What to do with empty or whitespace-only input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTextPolicy {
    #[default]
    Reject,
    Allow,
}

/// Per-purpose prompt prefixes and input policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbeddingPrompts {
    #[serde(default)]
    pub query_prefix: Option<String>,
    #[serde(default)]
    pub passage_prefix: Option<String>,
    #[serde(default)]
    pub empty_text: EmptyTextPolicy,
}

impl EmbeddingPrompts {
    /// Apply the empty-text policy and the prefix for `purpose`
    pub fn prepare<'a>(
        &self,
        text: &'a str,
        purpose: EmbeddingPurpose,
    ) -> Result<Cow<'a, str>, EmbeddingError> {
        if text.trim().is_empty() && self.empty_text == EmptyTextPolicy::Reject {
            return Err(EmbeddingError::EmptyText);
        }
        let prefix = match purpose {
            EmbeddingPurpose::Query => self.query_prefix.as_deref(),
            EmbeddingPurpose::Passage => self.passage_prefix.as_deref(),
        };
        Ok(match prefix {
            Some(prefix) if !prefix.is_empty() => Cow::Owned(format!("{prefix}{text}")),
            _ => Cow::Borrowed(text),
        })
    }
}

/// Turns text into a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier used for requests
    fn model(&self) -> &str;

    /// Expected output dimension, when known up front
    fn dimension(&self) -> Option<usize>;

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
        ctx: &CallContext,
    ) -> Result<Vector, EmbeddingError>;
}

/// Validate a raw provider vector against the expected dimension
pub(crate) fn check_embedding(
    vector: Vector,
    expected: Option<usize>,
) -> Result<Vector, EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidResponse(
            "provider returned an empty embedding".to_string(),
        ));
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbeddingError::InvalidResponse(
            "provider returned a non-finite embedding value".to_string(),
        ));
    }
    if let Some(expected) = expected {
        if expected != vector.len() {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(vector)
}
