//! Data model shared by every component of the pipeline

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Embedding vector; its length is the collection dimension
pub type Vector = Vec<f32>;

/// Scalar payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Document metadata / store payload
pub type Metadata = BTreeMap<String, Scalar>;

/// Payload key under which every adapter stores the document text
pub const TEXT_FIELD: &str = "text";

/// Payload key carrying the caller's document id when a store needs its own id format
pub const DOC_ID_FIELD: &str = "doc_id";

/// A unit of indexed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub vector: Vector,
    /// Extra vectors keyed by target name, for multi-target collections
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_vectors: BTreeMap<String, Vector>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, vector: Vector) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vector,
            named_vectors: BTreeMap::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_named_vector(mut self, target: impl Into<String>, vector: Vector) -> Self {
        self.named_vectors.insert(target.into(), vector);
        self
    }

    /// Payload as written to a store: metadata plus the text field
    pub fn payload(&self) -> Metadata {
        let mut payload = self.metadata.clone();
        payload.insert(TEXT_FIELD.to_string(), Scalar::String(self.text.clone()));
        payload
    }
}

/// Distance metric, fixed for a collection's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    /// Squared euclidean distance
    Euclidean,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Dot => "dot",
        }
    }
}

/// Definition of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    /// Named vector spaces besides the default one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric,
            targets: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Created,
    /// The collection was already there with the same definition
    AlreadyExists,
}

/// One search hit as returned by a store adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Relevance, higher is better
    pub score: f32,
    #[serde(default)]
    pub distance: Option<f32>,
    #[serde(default)]
    pub certainty: Option<f32>,
    #[serde(default)]
    pub payload: Metadata,
}

impl SearchHit {
    pub fn text(&self) -> Option<&str> {
        self.payload.get(TEXT_FIELD).and_then(Scalar::as_str)
    }
}

/// Hits ordered by decreasing relevance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
}

impl SearchResult {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|hit| hit.id.as_str()).collect()
    }
}

/// A retrieved passage, ready for context assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Per-document accounting of a batch write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<crate::error::UpsertError>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.document_id.as_str())
            .collect()
    }
}
