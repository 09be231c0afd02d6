//! Retrieval-augmented generation for RiceCoder
//!
//! This crate answers natural-language questions from an indexed corpus: it embeds
//! the query, runs a nearest-neighbour search against a vector store, renders the
//! hits into a prompt context and asks a generative model for the answer.
//! Embedding providers, vector stores and generators are traits, so backends can
//! be swapped without touching the orchestration.

pub mod call;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod indexing;
pub mod orchestrator;
pub mod query;
pub mod retrieval;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use call::{CallContext, Interrupt};
pub use config::{RagConfig, StoreBackend};
pub use context::{ContextAssembler, ContextTemplate};
pub use embeddings::{
    CachingEmbedder, EmbeddingPrompts, EmbeddingProvider, EmbeddingPurpose, EmptyTextPolicy,
    OllamaEmbedder,
};
pub use error::{
    CollectionError, EmbeddingError, GenerationError, InvalidVectorError, RagError,
    RetrievalError, SearchError, SearchFailureReason, UpsertError, UpsertFailure,
};
pub use generation::{collect_stream, Generator, OllamaGenerator, TextStream};
pub use indexing::Indexer;
pub use orchestrator::{Answer, FailureKind, FallbackMessages, Outcome, RagOrchestrator, Stage};
pub use query::{reconcile_targets, QueryParams, SearchQuery, TargetCombination};
pub use retrieval::{RetrievalSettings, Retriever};
#[cfg(feature = "qdrant")]
pub use store::QdrantStore;
#[cfg(feature = "weaviate")]
pub use store::WeaviateStore;
pub use store::{InMemoryStore, VectorStore};
pub use types::{
    BatchReport, CollectionSpec, CollectionStatus, DistanceMetric, Document, Metadata,
    RetrievedPassage, Scalar, SearchHit, SearchResult, Vector,
};

/// Result type for RAG operations
pub type Result<T> = std::result::Result<T, RagError>;
