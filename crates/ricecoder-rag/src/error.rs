//! Error types for the retrieval pipeline
//!
//! Each component raises its own error type. [`RetrievalError`] wraps embedding,
//! query and search failures without losing the original cause, and [`RagError`]
//! collects everything for callers that only want one type.

use std::time::Duration;

use thiserror::Error;

use crate::call::Interrupt;

/// Errors raised by an embedding provider
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbeddingError {
    /// The provider could not be reached or the connection broke
    #[error("Embedding transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("Embedding request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The configured model does not exist on the provider
    #[error("Invalid embedding model: {0}")]
    InvalidModel(String),

    /// Empty input rejected by the configured policy
    #[error("Empty text rejected by embedding policy")]
    EmptyText,

    /// The provider returned something that is not a usable vector
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    /// The returned vector has the wrong dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Embedding request cancelled")]
    Cancelled,
}

impl EmbeddingError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EmbeddingError::Cancelled)
    }

    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Transport(_) | EmbeddingError::Timeout(_) => true,
            EmbeddingError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<Interrupt> for EmbeddingError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => EmbeddingError::Cancelled,
            Interrupt::TimedOut(budget) => EmbeddingError::Timeout(budget),
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbeddingError::InvalidResponse(err.to_string())
        } else {
            EmbeddingError::Transport(err.to_string())
        }
    }
}

/// A query could not be built because its vectors are unusable
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidVectorError {
    /// NaN or infinity somewhere in a query vector
    #[error("Non-finite value {value} at position {position} of vector for {target}")]
    NonFinite {
        target: String,
        position: usize,
        value: f32,
    },

    /// A zero-length vector was supplied
    #[error("Empty vector supplied for {0}")]
    EmptyVector(String),

    /// A target was given an empty vector list
    #[error("No vectors supplied for target {0}")]
    EmptyTargetVectors(String),

    /// A threshold that is NaN or infinite
    #[error("Invalid {name} threshold: {value}")]
    InvalidThreshold { name: String, value: f32 },

    /// Neither a primary vector nor a per-target mapping was supplied
    #[error("Search query has neither a vector nor per-target vectors")]
    MissingVector,
}

/// Outcome classes a search error falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFailureReason {
    NotFound,
    Transport,
    Malformed,
    Cancelled,
}

/// Errors raised by [`VectorStore::search`](crate::store::VectorStore::search)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Search transport error: {0}")]
    Transport(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the query, or the query cannot run against this collection
    #[error("Malformed search query: {0}")]
    Malformed(String),

    #[error("Search cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn reason(&self) -> SearchFailureReason {
        match self {
            SearchError::CollectionNotFound(_) => SearchFailureReason::NotFound,
            SearchError::Transport(_) | SearchError::Timeout(_) => SearchFailureReason::Transport,
            SearchError::Malformed(_) => SearchFailureReason::Malformed,
            SearchError::Cancelled => SearchFailureReason::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        self.reason() == SearchFailureReason::Transport
    }
}

impl From<Interrupt> for SearchError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => SearchError::Cancelled,
            Interrupt::TimedOut(budget) => SearchError::Timeout(budget),
        }
    }
}

impl From<InvalidVectorError> for SearchError {
    fn from(err: InvalidVectorError) -> Self {
        SearchError::Malformed(err.to_string())
    }
}

/// Errors raised by collection management calls
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollectionError {
    #[error("Collection not found: {0}")]
    NotFound(String),

    /// The collection exists with a different dimension or metric
    #[error("Collection {name} already exists with a different definition: {detail}")]
    Conflict { name: String, detail: String },

    #[error("Invalid collection definition: {0}")]
    Invalid(String),

    #[error("Collection transport error: {0}")]
    Transport(String),

    #[error("Collection request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collection request cancelled")]
    Cancelled,
}

impl CollectionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CollectionError::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectionError::Transport(_) | CollectionError::Timeout(_)
        )
    }
}

impl From<Interrupt> for CollectionError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => CollectionError::Cancelled,
            Interrupt::TimedOut(budget) => CollectionError::Timeout(budget),
        }
    }
}

/// Why a single document could not be written
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UpsertFailure {
    #[error("collection {0} does not exist")]
    CollectionNotFound(String),

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector contains a non-finite value at position {0}")]
    NonFinite(usize),

    /// Named vector for a target the collection does not declare
    #[error("unknown target vector {0}")]
    UnknownTarget(String),

    #[error("embedding failed: {0}")]
    Embedding(EmbeddingError),

    #[error("rejected by store: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl From<Interrupt> for UpsertFailure {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => UpsertFailure::Cancelled,
            Interrupt::TimedOut(budget) => UpsertFailure::Timeout(budget),
        }
    }
}

/// A document failed to upsert; always names the offending document
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Upsert of document {document_id} failed: {reason}")]
pub struct UpsertError {
    pub document_id: String,
    pub reason: UpsertFailure,
}

impl UpsertError {
    pub fn new(document_id: impl Into<String>, reason: UpsertFailure) -> Self {
        Self {
            document_id: document_id.into(),
            reason,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.reason, UpsertFailure::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        match &self.reason {
            UpsertFailure::Transport(_) | UpsertFailure::Timeout(_) => true,
            UpsertFailure::Embedding(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised by the [`Retriever`](crate::retrieval::Retriever)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Query embedding failed")]
    Embedding(#[source] EmbeddingError),

    #[error("Search query could not be built")]
    Query(#[source] InvalidVectorError),

    #[error("Vector search failed")]
    Search(#[source] SearchError),

    /// A hit came back without its stored text
    #[error("Search hit {id} has no stored text in field {field}")]
    MissingText { id: String, field: String },
}

impl RetrievalError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            RetrievalError::Embedding(err) => err.is_cancelled(),
            RetrievalError::Search(err) => err.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RetrievalError::Embedding(EmbeddingError::Timeout(_))
                | RetrievalError::Search(SearchError::Timeout(_))
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::Embedding(err) => err.is_retryable(),
            RetrievalError::Search(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised by a text generator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation transport error: {0}")]
    Transport(String),

    #[error("Generation request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid generation model: {0}")]
    InvalidModel(String),

    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),

    /// The provider reported an error in the middle of a stream
    #[error("Generation stream error: {0}")]
    Stream(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport(_) | GenerationError::Timeout(_) => true,
            GenerationError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<Interrupt> for GenerationError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => GenerationError::Cancelled,
            Interrupt::TimedOut(budget) => GenerationError::Timeout(budget),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GenerationError::InvalidResponse(err.to_string())
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

/// Umbrella error for the crate
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    InvalidVector(#[from] InvalidVectorError),

    #[error(transparent)]
    Upsert(#[from] UpsertError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<Interrupt> for RagError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => RagError::Cancelled,
            Interrupt::TimedOut(budget) => RagError::Timeout(budget),
        }
    }
}
