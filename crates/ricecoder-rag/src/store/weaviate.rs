//! Weaviate adapter (REST schema and batch endpoints, GraphQL `Get` for search)

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::{scoring, stable_uuid, validate_document, validate_finite, validate_spec, VectorStore};
use crate::{
    call::CallContext,
    embeddings::http_client,
    error::{CollectionError, SearchError, UpsertError, UpsertFailure},
    query::SearchQuery,
    types::{
        BatchReport, CollectionSpec, CollectionStatus, Document, DistanceMetric, Metadata, Scalar,
        SearchHit, SearchResult, DOC_ID_FIELD, TEXT_FIELD,
    },
    RagError, Result,
};

/// Default Weaviate endpoint
pub const DEFAULT_WEAVIATE_URL: &str = "http://localhost:8080";

/// Named vector holding `Document::vector` in collections that declare targets
pub const DEFAULT_VECTOR_NAME: &str = "default";

/// Vector store backed by a Weaviate server
pub struct WeaviateStore {
    client: Arc<Client>,
    base_url: String,
    payload_fields: Vec<String>,
    /// Classes known to exist; the definition is kept when this process created them
    known: RwLock<HashMap<String, Option<CollectionSpec>>>,
}

impl WeaviateStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::new_with_client(base_url, Arc::new(http_client()?))
    }

    /// Share the connection pool of the Ollama adapters
    pub fn new_with_client(base_url: impl Into<String>, client: Arc<Client>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(RagError::Config("Weaviate URL is required".to_string()));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            payload_fields: Vec::new(),
            known: RwLock::new(HashMap::new()),
        })
    }

    /// Extra scalar properties to select on search, besides `text`
    pub fn with_payload_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn known_spec(&self, collection: &str) -> Option<CollectionSpec> {
        self.known.read().get(collection).cloned().flatten()
    }

    async fn class_exists(&self, class: &str) -> std::result::Result<bool, reqwest::Error> {
        let url = format!("{}/v1/schema/{}", self.base_url, class);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status().map(|_| true)
    }

    async fn post_schema(&self, body: &Value) -> std::result::Result<Response, reqwest::Error> {
        let url = format!("{}/v1/schema", self.base_url);
        self.client.post(&url).json(body).send().await
    }

    async fn delete_class(&self, class: &str) -> std::result::Result<(), CollectionError> {
        if !self.class_exists(class).await.map_err(transport)? {
            return Err(CollectionError::NotFound(class.to_string()));
        }
        let url = format!("{}/v1/schema/{}", self.base_url, class);
        let response = self.client.delete(&url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Weaviate class deletion failed ({}): {}", status, body);
            return Err(CollectionError::Transport(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Confirm the target class exists before a batch write
    async fn ensure_known(
        &self,
        collection: &str,
        ctx: &CallContext,
    ) -> std::result::Result<(), UpsertFailure> {
        if self.known.read().contains_key(collection) {
            return Ok(());
        }
        let exists = ctx
            .run(self.class_exists(&class_name(collection)))
            .await?
            .map_err(|e| UpsertFailure::Transport(e.to_string()))?;
        if !exists {
            return Err(UpsertFailure::CollectionNotFound(collection.to_string()));
        }
        self.known.write().entry(collection.to_string()).or_insert(None);
        Ok(())
    }

    async fn post_batch(&self, objects: Vec<Value>) -> std::result::Result<Vec<BatchObjectResult>, UpsertFailure> {
        let url = format!("{}/v1/batch/objects", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "objects": objects }))
            .send()
            .await
            .map_err(|e| UpsertFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Weaviate batch API error ({}): {}", status, body);
            return Err(if status.is_client_error() {
                UpsertFailure::Rejected(body)
            } else {
                UpsertFailure::Transport(format!("{status}: {body}"))
            });
        }
        response
            .json()
            .await
            .map_err(|e| UpsertFailure::Transport(format!("Failed to parse batch response: {e}")))
    }

    async fn post_graphql(&self, query: String) -> std::result::Result<GraphQlResponse, SearchError> {
        let url = format!("{}/v1/graphql", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Weaviate GraphQL API error ({}): {}", status, body);
            return Err(if status.is_server_error() {
                SearchError::Transport(format!("{status}: {body}"))
            } else {
                SearchError::Malformed(format!("{status}: {body}"))
            });
        }
        response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(format!("Failed to parse GraphQL response: {e}")))
    }

    fn to_object(&self, class: &str, document: &Document, named: bool) -> Value {
        let mut properties: Map<String, Value> = document
            .payload()
            .into_iter()
            .map(|(key, value)| (key, scalar_to_json(value)))
            .collect();
        properties.insert(DOC_ID_FIELD.to_string(), Value::String(document.id.clone()));

        let mut object = json!({
            "class": class,
            "id": stable_uuid(&document.id).to_string(),
            "properties": properties,
        });
        if named {
            let mut vectors = Map::new();
            vectors.insert(DEFAULT_VECTOR_NAME.to_string(), json!(document.vector));
            for (target, vector) in &document.named_vectors {
                vectors.insert(target.clone(), json!(vector));
            }
            object["vectors"] = Value::Object(vectors);
        } else {
            object["vector"] = json!(document.vector);
        }
        object
    }

    fn graphql_get(&self, class: &str, query: &SearchQuery, metric: DistanceMetric) -> String {
        let mut fields = vec![DOC_ID_FIELD.to_string()];
        if query.include_payload {
            fields.push(TEXT_FIELD.to_string());
            fields.extend(self.payload_fields.iter().cloned());
        }
        let additional = if metric == DistanceMetric::Cosine {
            "_additional { id distance certainty }"
        } else {
            "_additional { id distance }"
        };
        format!(
            "{{ Get {{ {}({} limit: {}) {{ {} {} }} }} }}",
            class,
            query.to_near_vector_clause(),
            query.limit,
            fields.join(" "),
            additional
        )
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    fn backend(&self) -> &'static str {
        "weaviate"
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        ctx: &CallContext,
    ) -> std::result::Result<CollectionStatus, CollectionError> {
        validate_spec(spec)?;
        let class = class_name(&spec.name);
        let body = class_definition(&class, spec);
        debug!("Creating Weaviate class {}", class);

        let response = ctx.run(self.post_schema(&body)).await?.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            info!(
                "Created Weaviate class {} ({}d, {})",
                class,
                spec.dimension,
                spec.metric.as_str()
            );
            self.known
                .write()
                .insert(spec.name.clone(), Some(spec.clone()));
            return Ok(CollectionStatus::Created);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already exists") {
            debug!("Weaviate class {} already exists", class);
            self.known.write().entry(spec.name.clone()).or_insert(None);
            return Ok(CollectionStatus::AlreadyExists);
        }
        error!("Weaviate schema API error ({}): {}", status, body);
        Err(if status.is_client_error() {
            CollectionError::Invalid(body)
        } else {
            CollectionError::Transport(format!("{status}: {body}"))
        })
    }

    async fn delete_collection(
        &self,
        name: &str,
        ctx: &CallContext,
    ) -> std::result::Result<(), CollectionError> {
        let class = class_name(name);
        ctx.run(self.delete_class(&class))
            .await?
            .map_err(|err| match err {
                CollectionError::NotFound(_) => CollectionError::NotFound(name.to_string()),
                other => other,
            })?;
        self.known.write().remove(name);
        info!("Deleted Weaviate class {}", class);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        document: &Document,
        ctx: &CallContext,
    ) -> std::result::Result<(), UpsertError> {
        let mut report = self
            .upsert_batch(collection, std::slice::from_ref(document), ctx)
            .await;
        match report.failed.pop() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn upsert_batch(
        &self,
        collection: &str,
        documents: &[Document],
        ctx: &CallContext,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        if documents.is_empty() {
            return report;
        }
        if let Err(reason) = self.ensure_known(collection, ctx).await {
            warn!("Weaviate batch into {} not attempted: {}", collection, reason);
            report.failed = documents
                .iter()
                .map(|document| UpsertError::new(&document.id, reason.clone()))
                .collect();
            return report;
        }

        let class = class_name(collection);
        let spec = self.known_spec(collection);
        let mut pending: HashMap<String, String> = HashMap::new();
        let mut order = Vec::new();
        let mut objects = Vec::new();
        for document in documents {
            let checked = match &spec {
                Some(spec) => validate_document(spec, document),
                None => validate_finite(document),
            };
            if let Err(reason) = checked {
                warn!("Skipping document {} for {}: {}", document.id, collection, reason);
                report.failed.push(UpsertError::new(&document.id, reason));
                continue;
            }
            let named = !document.named_vectors.is_empty()
                || spec.as_ref().is_some_and(|spec| !spec.targets.is_empty());
            pending.insert(stable_uuid(&document.id).to_string(), document.id.clone());
            order.push(document.id.clone());
            objects.push(self.to_object(&class, document, named));
        }
        if objects.is_empty() {
            return report;
        }

        let results = match ctx.run(self.post_batch(objects)).await {
            Ok(Ok(results)) => results,
            Ok(Err(reason)) => {
                report.failed.extend(order.into_iter().map(|id| UpsertError::new(id, reason.clone())));
                return report;
            }
            Err(interrupt) => {
                let reason = UpsertFailure::from(interrupt);
                report.failed.extend(order.into_iter().map(|id| UpsertError::new(id, reason.clone())));
                return report;
            }
        };

        let mut errors: HashMap<String, String> = HashMap::new();
        for result in results {
            let Some(document_id) = result.id.as_ref().and_then(|id| pending.get(id)) else {
                continue;
            };
            let messages = result.error_messages();
            if !messages.is_empty() {
                errors.insert(document_id.clone(), messages.join("; "));
            }
        }
        for id in order {
            match errors.remove(&id) {
                Some(message) => {
                    warn!("Weaviate rejected document {}: {}", id, message);
                    report.failed.push(UpsertError::new(id, UpsertFailure::Rejected(message)));
                }
                None => report.succeeded.push(id),
            }
        }
        report
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        ctx: &CallContext,
    ) -> std::result::Result<SearchResult, SearchError> {
        if query.limit == 0 {
            return Ok(SearchResult::default());
        }
        let spec = self.known_spec(collection);
        let metric = spec.as_ref().map(|spec| spec.metric).unwrap_or_default();
        if query.certainty.is_some() && metric != DistanceMetric::Cosine {
            return Err(SearchError::Malformed(format!(
                "certainty is only defined for cosine collections, {} uses {}",
                collection,
                metric.as_str()
            )));
        }

        let mut query = query.clone();
        let declares_targets = spec.as_ref().is_some_and(|spec| !spec.targets.is_empty());
        if declares_targets && !query.is_multi_target() && query.target_vectors.is_empty() {
            query.target_vectors = vec![DEFAULT_VECTOR_NAME.to_string()];
        }

        let class = class_name(collection);
        let graphql = self.graphql_get(&class, &query, metric);
        debug!("Weaviate search on {}: {}", class, graphql);
        let response = ctx.run(self.post_graphql(graphql)).await??;

        if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            if messages.iter().any(|m| is_missing_class(m)) {
                return Err(SearchError::CollectionNotFound(collection.to_string()));
            }
            return Err(SearchError::Malformed(messages.join("; ")));
        }

        let objects = response
            .data
            .as_ref()
            .and_then(|data| data.get("Get"))
            .and_then(|get| get.get(&class))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(objects.len());
        for object in objects {
            let Value::Object(mut fields) = object else {
                return Err(SearchError::Malformed(
                    "Get returned a non-object hit".to_string(),
                ));
            };
            let additional = fields.remove("_additional").unwrap_or(Value::Null);
            let distance = additional
                .get("distance")
                .and_then(Value::as_f64)
                .map(|d| d as f32);
            let certainty = additional
                .get("certainty")
                .and_then(Value::as_f64)
                .map(|c| c as f32);
            let id = match fields.remove(DOC_ID_FIELD) {
                Some(Value::String(id)) => id,
                _ => additional
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SearchError::Malformed("hit without an id".to_string()))?,
            };
            let score = match (distance, certainty) {
                (Some(distance), _) => scoring::score(metric, distance),
                (None, Some(certainty)) => certainty,
                (None, None) => {
                    return Err(SearchError::Malformed(format!(
                        "hit {id} has neither distance nor certainty"
                    )))
                }
            };
            let payload: Metadata = fields
                .into_iter()
                .filter_map(|(key, value)| json_to_scalar(value).map(|scalar| (key, scalar)))
                .collect();
            hits.push(SearchHit {
                id,
                score,
                distance,
                certainty,
                payload,
            });
        }
        hits.truncate(query.limit);
        debug!("Weaviate search on {} returned {} hits", class, hits.len());
        Ok(SearchResult::new(hits))
    }
}

/// Weaviate class names start with an uppercase letter
pub fn class_name(collection: &str) -> String {
    let mut chars = collection.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn metric_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "cosine",
        DistanceMetric::Euclidean => "l2-squared",
        DistanceMetric::Dot => "dot",
    }
}

fn class_definition(class: &str, spec: &CollectionSpec) -> Value {
    let index = json!({ "distance": metric_name(spec.metric) });
    let properties = json!([
        { "name": TEXT_FIELD, "dataType": ["text"] },
        { "name": DOC_ID_FIELD, "dataType": ["text"] },
    ]);
    if spec.targets.is_empty() {
        return json!({
            "class": class,
            "vectorizer": "none",
            "vectorIndexType": "hnsw",
            "vectorIndexConfig": index,
            "properties": properties,
        });
    }
    let mut vector_config = Map::new();
    for name in std::iter::once(DEFAULT_VECTOR_NAME).chain(spec.targets.iter().map(String::as_str)) {
        vector_config.insert(
            name.to_string(),
            json!({
                "vectorizer": { "none": {} },
                "vectorIndexType": "hnsw",
                "vectorIndexConfig": index,
            }),
        );
    }
    json!({
        "class": class,
        "vectorConfig": vector_config,
        "properties": properties,
    })
}

/// An unknown class surfaces as an unknown field on the `Get` root type;
/// unknown properties on an existing class name that class instead
fn is_missing_class(message: &str) -> bool {
    message.contains("Cannot query field") && message.contains("on type \"GetObjectsObj\"")
}

fn transport(err: reqwest::Error) -> CollectionError {
    CollectionError::Transport(err.to_string())
}

fn scalar_to_json(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Bool(value) => Value::Bool(value),
        Scalar::Integer(value) => Value::from(value),
        Scalar::Float(value) => Value::from(value),
        Scalar::String(value) => Value::String(value),
    }
}

fn json_to_scalar(value: Value) -> Option<Scalar> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        other => serde_json::from_value(other).ok(),
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<BatchResultBody>,
}

impl BatchObjectResult {
    fn error_messages(&self) -> Vec<String> {
        self.result
            .as_ref()
            .and_then(|result| result.errors.as_ref())
            .map(|errors| errors.error.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct BatchResultBody {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<GraphQlError>,
}
