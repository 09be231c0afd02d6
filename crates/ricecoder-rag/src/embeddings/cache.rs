//! LRU cache in front of an embedding provider

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::{EmbeddingProvider, EmbeddingPurpose};
use crate::{call::CallContext, error::EmbeddingError, types::Vector};

const DEFAULT_CACHE_SIZE: usize = 1024;

/// Caches vectors by purpose and text; failures are never cached
pub struct CachingEmbedder<P> {
    inner: P,
    cache: Mutex<LruCache<(EmbeddingPurpose, String), Vector>>,
}

impl<P: EmbeddingProvider> CachingEmbedder<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachingEmbedder<P> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
        ctx: &CallContext,
    ) -> Result<Vector, EmbeddingError> {
        let key = (purpose, text.to_string());
        if let Some(hit) = self.cache.lock().get(&key).cloned() {
            return Ok(hit);
        }
        let vector = self.inner.embed(text, purpose, ctx).await?;
        self.cache.lock().put(key, vector.clone());
        Ok(vector)
    }
}
