//! RAG pipeline configuration
//!
//! Loaded with this precedence (later wins):
//! 1. Built-in defaults
//! 2. Global config file (~/.ricecoder/rag.yaml)
//! 3. Project config file (.ricecoder/rag.yaml)
//! 4. Environment variables (`RICECODER_RAG_*`)
//!
//! The final configuration is validated and can build the whole component graph.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    context::{ContextAssembler, ContextTemplate},
    embeddings::{
        http_client, CachingEmbedder, EmbeddingPrompts, EmbeddingProvider, EmptyTextPolicy,
        OllamaEmbedder, DEFAULT_OLLAMA_URL,
    },
    generation::{Generator, OllamaGenerator},
    indexing::Indexer,
    orchestrator::{FallbackMessages, RagOrchestrator},
    query::TargetCombination,
    retrieval::{RetrievalSettings, Retriever},
    store::{InMemoryStore, VectorStore},
    types::{CollectionSpec, DistanceMetric},
    RagError, Result,
};

pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_STORE_URL: &str = "http://localhost:8080";
pub const DEFAULT_COLLECTION: &str = "Sbb";
pub const DEFAULT_DIMENSION: usize = 3072;
pub const DEFAULT_LIMIT: usize = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_OLLAMA_URL: &str = "RICECODER_RAG_OLLAMA_URL";
const ENV_EMBEDDING_MODEL: &str = "RICECODER_RAG_EMBEDDING_MODEL";
const ENV_GENERATION_MODEL: &str = "RICECODER_RAG_GENERATION_MODEL";
const ENV_STORE: &str = "RICECODER_RAG_STORE";
const ENV_STORE_URL: &str = "RICECODER_RAG_STORE_URL";
const ENV_COLLECTION: &str = "RICECODER_RAG_COLLECTION";
const ENV_TIMEOUT_SECS: &str = "RICECODER_RAG_TIMEOUT_SECS";

/// Which vector store backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Weaviate,
    Qdrant,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Weaviate => "weaviate",
            StoreBackend::Qdrant => "qdrant",
        };
        f.write_str(name)
    }
}

impl FromStr for StoreBackend {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "weaviate" => Ok(StoreBackend::Weaviate),
            "qdrant" => Ok(StoreBackend::Qdrant),
            other => Err(RagError::Config(format!("Unknown vector store: {other}"))),
        }
    }
}

/// Ollama endpoint and models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaSection {
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// Stream generation tokens instead of waiting for one response
    pub stream: bool,
    pub prompts: EmbeddingPrompts,
    /// Cached query/passage embeddings; 0 disables the cache
    pub embedding_cache_size: usize,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: DEFAULT_MODEL.to_string(),
            generation_model: DEFAULT_MODEL.to_string(),
            stream: true,
            prompts: EmbeddingPrompts::default(),
            embedding_cache_size: 0,
        }
    }
}

/// Vector store location and collection definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub url: String,
    pub collection: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub targets: Vec<String>,
    /// Extra payload properties selected on search
    pub payload_fields: Vec<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: DEFAULT_STORE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            dimension: DEFAULT_DIMENSION,
            metric: DistanceMetric::Cosine,
            targets: Vec::new(),
            payload_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSection {
    pub limit: usize,
    pub certainty: Option<f32>,
    pub distance: Option<f32>,
    pub target_vectors: Vec<String>,
    pub combination: Option<TargetCombination>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            certainty: None,
            distance: None,
            target_vectors: Vec::new(),
            combination: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSection {
    pub template: ContextTemplate,
    pub fallbacks: FallbackMessages,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub ollama: OllamaSection,
    pub store: StoreSection,
    pub retrieval: RetrievalSection,
    pub prompt: PromptSection,
    /// Budget for one `answer` call (default: 30)
    pub timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaSection::default(),
            store: StoreSection::default(),
            retrieval: RetrievalSection::default(),
            prompt: PromptSection::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl RagConfig {
    /// Load configuration from the default locations, then the environment
    pub fn load_with_precedence() -> Result<Self> {
        Self::load_from_paths(
            &Self::global_config_path(),
            &Self::project_config_path(),
        )
    }

    /// Same as [`load_with_precedence`](Self::load_with_precedence) with explicit file paths
    pub fn load_from_paths(global: &Path, project: &Path) -> Result<Self> {
        let mut config = Self::default();

        if global.exists() {
            debug!("Loading global RAG config from {:?}", global);
            config.merge_from_file(global)?;
        }

        if project.exists() {
            debug!("Loading project RAG config from {:?}", project);
            config.merge_from_file(project)?;
        }

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Global configuration path (~/.ricecoder/rag.yaml)
    pub fn global_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ricecoder/rag.yaml")
    }

    /// Project configuration path (.ricecoder/rag.yaml)
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".ricecoder/rag.yaml")
    }

    /// Override values from `RICECODER_RAG_*` environment variables
    pub fn load_from_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_OLLAMA_URL) {
            debug!("Loading {} from environment: {}", ENV_OLLAMA_URL, url);
            self.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var(ENV_EMBEDDING_MODEL) {
            debug!("Loading {} from environment: {}", ENV_EMBEDDING_MODEL, model);
            self.ollama.embedding_model = model;
        }
        if let Ok(model) = std::env::var(ENV_GENERATION_MODEL) {
            debug!("Loading {} from environment: {}", ENV_GENERATION_MODEL, model);
            self.ollama.generation_model = model;
        }
        if let Ok(store) = std::env::var(ENV_STORE) {
            match store.parse() {
                Ok(backend) => {
                    debug!("Loading {} from environment: {}", ENV_STORE, backend);
                    self.store.backend = backend;
                }
                Err(_) => warn!("Invalid {} value: {}", ENV_STORE, store),
            }
        }
        if let Ok(url) = std::env::var(ENV_STORE_URL) {
            debug!("Loading {} from environment: {}", ENV_STORE_URL, url);
            self.store.url = url;
        }
        if let Ok(collection) = std::env::var(ENV_COLLECTION) {
            debug!("Loading {} from environment: {}", ENV_COLLECTION, collection);
            self.store.collection = collection;
        }
        if let Ok(timeout) = std::env::var(ENV_TIMEOUT_SECS) {
            match timeout.parse::<u64>() {
                Ok(secs) => {
                    debug!("Loading {} from environment: {}", ENV_TIMEOUT_SECS, secs);
                    self.timeout_secs = secs;
                }
                Err(_) => warn!("Invalid {} value: {}", ENV_TIMEOUT_SECS, timeout),
            }
        }
    }

    /// Merge a YAML file; only the keys present in the file override
    pub fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::Config(format!("Failed to read RAG config file: {}", e)))?;
        let file: RagFileConfig = serde_yaml::from_str(&content)
            .map_err(|e| RagError::Config(format!("Failed to parse RAG config file: {}", e)))?;
        self.apply(file);
        Ok(())
    }

    fn apply(&mut self, file: RagFileConfig) {
        if let Some(timeout_secs) = file.timeout_secs {
            self.timeout_secs = timeout_secs;
        }

        if let Some(ollama) = file.ollama {
            let target = &mut self.ollama;
            override_with(&mut target.base_url, ollama.base_url);
            override_with(&mut target.embedding_model, ollama.embedding_model);
            override_with(&mut target.generation_model, ollama.generation_model);
            override_with(&mut target.stream, ollama.stream);
            override_with(&mut target.embedding_cache_size, ollama.embedding_cache_size);
            if ollama.query_prefix.is_some() {
                target.prompts.query_prefix = ollama.query_prefix;
            }
            if ollama.passage_prefix.is_some() {
                target.prompts.passage_prefix = ollama.passage_prefix;
            }
            override_with(&mut target.prompts.empty_text, ollama.empty_text);
        }

        if let Some(store) = file.store {
            let target = &mut self.store;
            override_with(&mut target.backend, store.backend);
            override_with(&mut target.url, store.url);
            override_with(&mut target.collection, store.collection);
            override_with(&mut target.dimension, store.dimension);
            override_with(&mut target.metric, store.metric);
            override_with(&mut target.targets, store.targets);
            override_with(&mut target.payload_fields, store.payload_fields);
        }

        if let Some(retrieval) = file.retrieval {
            let target = &mut self.retrieval;
            override_with(&mut target.limit, retrieval.limit);
            override_with(&mut target.target_vectors, retrieval.target_vectors);
            if retrieval.certainty.is_some() {
                target.certainty = retrieval.certainty;
            }
            if retrieval.distance.is_some() {
                target.distance = retrieval.distance;
            }
            if retrieval.combination.is_some() {
                target.combination = retrieval.combination;
            }
        }

        if let Some(prompt) = file.prompt {
            let template = &mut self.prompt.template;
            override_with(&mut template.header, prompt.header);
            override_with(&mut template.question_label, prompt.question_label);
            override_with(&mut template.answer_label, prompt.answer_label);
            let fallbacks = &mut self.prompt.fallbacks;
            override_with(&mut fallbacks.embedding, prompt.embedding_fallback);
            override_with(&mut fallbacks.retrieval, prompt.retrieval_fallback);
            override_with(&mut fallbacks.generation, prompt.generation_fallback);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_http_url("Ollama base URL", &self.ollama.base_url)?;
        if self.ollama.embedding_model.is_empty() {
            return Err(RagError::Config(
                "Embedding model cannot be empty".to_string(),
            ));
        }
        if self.ollama.generation_model.is_empty() {
            return Err(RagError::Config(
                "Generation model cannot be empty".to_string(),
            ));
        }

        if self.store.backend != StoreBackend::Memory {
            validate_http_url("Vector store URL", &self.store.url)?;
        }
        if self.store.collection.trim().is_empty() {
            return Err(RagError::Config(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if self.store.dimension == 0 {
            return Err(RagError::Config(
                "Collection dimension must be greater than 0".to_string(),
            ));
        }

        if self.retrieval.limit == 0 {
            return Err(RagError::Config(
                "Retrieval limit must be greater than 0".to_string(),
            ));
        }
        if let Some(certainty) = self.retrieval.certainty {
            if !(0.0..=1.0).contains(&certainty) {
                return Err(RagError::Config(format!(
                    "Certainty must be between 0 and 1: {certainty}"
                )));
            }
            if self.store.metric != DistanceMetric::Cosine {
                return Err(RagError::Config(format!(
                    "Certainty requires a cosine collection, not {}",
                    self.store.metric.as_str()
                )));
            }
        }
        if let Some(distance) = self.retrieval.distance {
            if !distance.is_finite() {
                return Err(RagError::Config(format!(
                    "Distance threshold must be finite: {distance}"
                )));
            }
        }
        if let Some(unknown) = self
            .retrieval
            .target_vectors
            .iter()
            .find(|target| !self.store.targets.contains(target))
        {
            return Err(RagError::Config(format!(
                "Target vector {unknown} is not declared by the collection"
            )));
        }

        if self.timeout_secs == 0 {
            return Err(RagError::Config(
                "Timeout must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec::new(
            self.store.collection.clone(),
            self.store.dimension,
            self.store.metric,
        )
        .with_targets(self.store.targets.iter().cloned())
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            collection: self.store.collection.clone(),
            limit: self.retrieval.limit,
            certainty: self.retrieval.certainty,
            distance: self.retrieval.distance,
            target_vectors: self.retrieval.target_vectors.clone(),
            combination: self.retrieval.combination,
            ..RetrievalSettings::default()
        }
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.embedder_on(Arc::new(http_client()?))
    }

    pub fn build_generator(&self) -> Result<Arc<dyn Generator>> {
        self.generator_on(Arc::new(http_client()?))
    }

    pub fn build_store(&self) -> Result<Arc<dyn VectorStore>> {
        self.store_on(Arc::new(http_client()?))
    }

    /// Indexer writing to the configured collection through `store`
    pub fn build_indexer(&self, store: Arc<dyn VectorStore>) -> Result<Indexer> {
        Ok(Indexer::new(
            self.build_embedder()?,
            store,
            self.store.collection.clone(),
        ))
    }

    /// Orchestrator reading from `store`
    pub fn build_orchestrator_with_store(
        &self,
        store: Arc<dyn VectorStore>,
    ) -> Result<RagOrchestrator> {
        self.orchestrator_on(store, Arc::new(http_client()?))
    }

    /// Full component graph with a freshly built store
    ///
    /// The embedder, generator and an HTTP store all send through one pooled client.
    pub fn build_orchestrator(&self) -> Result<RagOrchestrator> {
        let client = Arc::new(http_client()?);
        let store = self.store_on(client.clone())?;
        self.orchestrator_on(store, client)
    }

    fn embedder_on(&self, client: Arc<Client>) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedder = OllamaEmbedder::new_with_client(
            &self.ollama.base_url,
            &self.ollama.embedding_model,
            client,
        )?
        .with_prompts(self.ollama.prompts.clone())
        .with_dimension(self.store.dimension);
        if self.ollama.embedding_cache_size > 0 {
            return Ok(Arc::new(CachingEmbedder::new(
                embedder,
                self.ollama.embedding_cache_size,
            )));
        }
        Ok(Arc::new(embedder))
    }

    fn generator_on(&self, client: Arc<Client>) -> Result<Arc<dyn Generator>> {
        let generator = OllamaGenerator::new_with_client(
            &self.ollama.base_url,
            &self.ollama.generation_model,
            client,
        )?
        .with_streaming(self.ollama.stream);
        Ok(Arc::new(generator))
    }

    #[cfg_attr(not(feature = "weaviate"), allow(unused_variables))]
    fn store_on(&self, client: Arc<Client>) -> Result<Arc<dyn VectorStore>> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            #[cfg(feature = "weaviate")]
            StoreBackend::Weaviate => Ok(Arc::new(
                crate::store::WeaviateStore::new_with_client(&self.store.url, client)?
                    .with_payload_fields(self.store.payload_fields.iter().cloned()),
            )),
            #[cfg(feature = "qdrant")]
            StoreBackend::Qdrant => Ok(Arc::new(crate::store::QdrantStore::new(&self.store.url)?)),
            #[allow(unreachable_patterns)]
            other => Err(RagError::Config(format!(
                "Vector store {other} is not enabled in this build"
            ))),
        }
    }

    fn orchestrator_on(
        &self,
        store: Arc<dyn VectorStore>,
        client: Arc<Client>,
    ) -> Result<RagOrchestrator> {
        let retriever = Retriever::new(
            self.embedder_on(client.clone())?,
            store,
            self.retrieval_settings(),
        );
        Ok(RagOrchestrator::new(retriever, self.generator_on(client)?)
            .with_assembler(ContextAssembler::new(self.prompt.template.clone()))
            .with_fallbacks(self.prompt.fallbacks.clone())
            .with_timeout(self.timeout()))
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn validate_http_url(what: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(RagError::Config(format!("{what} cannot be empty")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(RagError::Config(format!(
            "{what} must start with http:// or https://: {url}"
        )));
    }
    Ok(())
}

/// YAML file structure for RAG configuration
#[derive(Debug, Default, Deserialize)]
struct RagFileConfig {
    timeout_secs: Option<u64>,
    ollama: Option<OllamaFileSettings>,
    store: Option<StoreFileSettings>,
    retrieval: Option<RetrievalFileSettings>,
    prompt: Option<PromptFileSettings>,
}

/// Ollama settings from YAML file (all fields optional)
#[derive(Debug, Deserialize)]
struct OllamaFileSettings {
    base_url: Option<String>,
    embedding_model: Option<String>,
    generation_model: Option<String>,
    stream: Option<bool>,
    query_prefix: Option<String>,
    passage_prefix: Option<String>,
    empty_text: Option<EmptyTextPolicy>,
    embedding_cache_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StoreFileSettings {
    backend: Option<StoreBackend>,
    url: Option<String>,
    collection: Option<String>,
    dimension: Option<usize>,
    metric: Option<DistanceMetric>,
    targets: Option<Vec<String>>,
    payload_fields: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RetrievalFileSettings {
    limit: Option<usize>,
    certainty: Option<f32>,
    distance: Option<f32>,
    target_vectors: Option<Vec<String>>,
    combination: Option<TargetCombination>,
}

#[derive(Debug, Deserialize)]
struct PromptFileSettings {
    header: Option<String>,
    question_label: Option<String>,
    answer_label: Option<String>,
    embedding_fallback: Option<String>,
    retrieval_fallback: Option<String>,
    generation_fallback: Option<String>,
}
