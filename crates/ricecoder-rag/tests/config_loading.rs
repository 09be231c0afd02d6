//! Integration tests for configuration loading from files and environment
//! Tests precedence: defaults < global file < project file < environment

use std::{fs, time::Duration};

use ricecoder_rag::{
    config::{DEFAULT_COLLECTION, DEFAULT_LIMIT},
    DistanceMetric, EmptyTextPolicy, RagConfig, StoreBackend, VectorStore,
};
use serial_test::serial;
use tempfile::TempDir;

const ENV_VARS: [&str; 7] = [
    "RICECODER_RAG_OLLAMA_URL",
    "RICECODER_RAG_EMBEDDING_MODEL",
    "RICECODER_RAG_GENERATION_MODEL",
    "RICECODER_RAG_STORE",
    "RICECODER_RAG_STORE_URL",
    "RICECODER_RAG_COLLECTION",
    "RICECODER_RAG_TIMEOUT_SECS",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

const GLOBAL_YAML: &str = r#"
timeout_secs: 45
ollama:
  base_url: http://gpu-box:11434
  embedding_model: nomic-embed-text
  query_prefix: "search_query: "
  passage_prefix: "search_document: "
store:
  url: http://weaviate.internal:8080
  collection: Global
  dimension: 768
retrieval:
  limit: 5
"#;

const PROJECT_YAML: &str = r#"
store:
  collection: Project
  metric: dot
prompt:
  header: "Use only these notes:"
  retrieval_fallback: "Search is unavailable."
"#;

/// Test: Project file overrides global file, untouched keys keep earlier values
#[test]
#[serial]
fn test_project_file_overrides_global_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let global = dir.path().join("global.yaml");
    let project = dir.path().join("project.yaml");
    fs::write(&global, GLOBAL_YAML).unwrap();
    fs::write(&project, PROJECT_YAML).unwrap();

    let config = RagConfig::load_from_paths(&global, &project).unwrap();

    assert_eq!(config.timeout(), Duration::from_secs(45));
    assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
    assert_eq!(config.ollama.generation_model, "llama3.2");
    assert_eq!(
        config.ollama.prompts.query_prefix.as_deref(),
        Some("search_query: ")
    );
    assert_eq!(config.ollama.prompts.empty_text, EmptyTextPolicy::Reject);

    assert_eq!(config.store.collection, "Project");
    assert_eq!(config.store.dimension, 768);
    assert_eq!(config.store.metric, DistanceMetric::Dot);
    assert_eq!(config.retrieval.limit, 5);

    assert_eq!(config.prompt.template.header, "Use only these notes:");
    assert_eq!(config.prompt.template.question_label, "Question:");
    assert_eq!(config.prompt.fallbacks.retrieval, "Search is unavailable.");
}

/// Test: Missing files leave the defaults in place
#[test]
#[serial]
fn test_missing_files_use_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config = RagConfig::load_from_paths(
        &dir.path().join("absent-global.yaml"),
        &dir.path().join("absent-project.yaml"),
    )
    .unwrap();

    assert_eq!(config, RagConfig::default());
    assert_eq!(config.store.collection, DEFAULT_COLLECTION);
    assert_eq!(config.retrieval.limit, DEFAULT_LIMIT);
}

/// Test: Environment variables override both files
#[test]
#[serial]
fn test_environment_overrides_files() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let global = dir.path().join("global.yaml");
    fs::write(&global, GLOBAL_YAML).unwrap();

    std::env::set_var("RICECODER_RAG_OLLAMA_URL", "https://ollama.example.com");
    std::env::set_var("RICECODER_RAG_STORE", "memory");
    std::env::set_var("RICECODER_RAG_COLLECTION", "FromEnv");
    std::env::set_var("RICECODER_RAG_TIMEOUT_SECS", "12");

    let config = RagConfig::load_from_paths(&global, &dir.path().join("none.yaml")).unwrap();
    clear_env();

    assert_eq!(config.ollama.base_url, "https://ollama.example.com");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.store.collection, "FromEnv");
    assert_eq!(config.timeout(), Duration::from_secs(12));
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
}

/// Test: Unparseable environment values are ignored, not fatal
#[test]
#[serial]
fn test_invalid_environment_values_are_ignored() {
    clear_env();
    std::env::set_var("RICECODER_RAG_TIMEOUT_SECS", "soon");
    std::env::set_var("RICECODER_RAG_STORE", "pinecone");

    let mut config = RagConfig::default();
    config.load_from_env();
    clear_env();

    assert_eq!(config.timeout_secs, 30);
    assert_eq!(config.store.backend, StoreBackend::Weaviate);
}

/// Test: A malformed file is a configuration error
#[test]
#[serial]
fn test_malformed_file_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let global = dir.path().join("global.yaml");
    fs::write(&global, "store: [not, a, mapping").unwrap();

    let err = RagConfig::load_from_paths(&global, &dir.path().join("none.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to parse RAG config file"));
}

/// Test: Loaded values still pass validation
#[test]
#[serial]
fn test_invalid_file_values_fail_validation() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project.yaml");
    fs::write(&project, "retrieval:\n  certainty: 0.7\nstore:\n  metric: euclidean\n").unwrap();

    let err = RagConfig::load_from_paths(&dir.path().join("none.yaml"), &project).unwrap_err();
    assert!(err.to_string().contains("cosine"));
}

/// Test: A memory-backed config builds a complete pipeline without network access
#[tokio::test]
#[serial]
async fn test_memory_config_builds_pipeline() {
    clear_env();
    let mut config = RagConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.ollama.embedding_cache_size = 16;
    config.validate().unwrap();

    let store = config.build_store().unwrap();
    assert_eq!(store.backend(), "memory");
    let indexer = config.build_indexer(store.clone()).unwrap();
    assert_eq!(indexer.collection(), DEFAULT_COLLECTION);

    let orchestrator = config.build_orchestrator_with_store(store).unwrap();
    assert_eq!(orchestrator.timeout(), Duration::from_secs(30));
    assert_eq!(orchestrator.retriever().settings().limit, DEFAULT_LIMIT);
}
