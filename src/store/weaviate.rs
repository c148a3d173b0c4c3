//! Weaviate REST/GraphQL client and the collection-backed vector store.

use super::{
    accepted_records, collection_name, decode_metadata, encode_metadata, object_id,
    similarity_from_cosine, DocumentChunk, MetadataFilter, SearchHit, StoreError, StoreKind,
    VectorStore,
};
use crate::config::WeaviateConfig;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Properties every collection carries; all flat text
const PROPERTIES: [&str; 6] = ["chunk_id", "text", "source", "category", "metadata", "created_at"];

/// Filter keys that can be pushed into a GraphQL `where`
const PUSHDOWN_FIELDS: [&str; 3] = ["chunk_id", "source", "category"];

/// Over-fetch factor when part of a filter is applied after the query
const POST_FILTER_OVERFETCH: usize = 4;

/// How many per-object errors are logged in full per batch
const VERBOSE_ERRORS: usize = 5;

/// One object ready for a batch insert
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub chunk: DocumentChunk,
}

impl StoredObject {
    pub fn new(collection: &str, chunk: DocumentChunk, vector: Vec<f32>) -> Self {
        Self {
            id: object_id(collection, &chunk.chunk_id),
            vector,
            chunk,
        }
    }

    fn to_json(&self, collection: &str) -> Value {
        json!({
            "class": collection,
            "id": self.id.to_string(),
            "vector": self.vector,
            "properties": {
                "chunk_id": self.chunk.chunk_id,
                "text": self.chunk.text,
                "source": self.chunk.source,
                "category": self.chunk.category,
                "metadata": encode_metadata(&self.chunk.metadata),
                "created_at": self.chunk.created_at.clone().unwrap_or_default(),
            }
        })
    }
}

/// A rejected object inside an otherwise accepted batch
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectError {
    pub chunk_id: String,
    pub message: String,
}

/// Outcome of one batch request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub inserted: usize,
    pub errors: Vec<ObjectError>,
}

/// Connection-level client; cheap to clone, one per worker
#[derive(Clone)]
pub struct WeaviateClient {
    client: Client,
    base_url: String,
    batch_size: usize,
}

impl WeaviateClient {
    pub fn new(
        url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self, StoreError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StoreError::Config(format!(
                "Weaviate URL must be an http(s) URL, got '{}'",
                url
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| StoreError::Config("invalid Weaviate API key".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            batch_size: batch_size.max(1),
        })
    }

    /// Build from configuration; a configured but unset key env var is an error
    pub fn from_config(config: &WeaviateConfig) -> Result<Self, StoreError> {
        let api_key = match &config.api_key_env {
            Some(env) => Some(std::env::var(env).map_err(|_| {
                StoreError::Config(format!("Environment variable {} is not set", env))
            })?),
            None => None,
        };
        Self::new(
            &config.url,
            api_key.as_deref(),
            config.timeout(),
            config.batch_size,
        )
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let url = format!("{}/v1/schema/{}", self.base_url, collection);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(status_error(status, response, "schema lookup")),
        }
    }

    /// Create the collection unless it exists; returns true when it was created
    pub fn ensure_collection(&self, collection: &str) -> Result<bool, StoreError> {
        if self.collection_exists(collection)? {
            return Ok(false);
        }

        let response = self
            .client
            .post(format!("{}/v1/schema", self.base_url))
            .json(&collection_schema(collection))
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Created collection {}", collection);
            return Ok(true);
        }

        // Another writer created it between our lookup and create
        if status == StatusCode::UNPROCESSABLE_ENTITY && self.collection_exists(collection)? {
            return Ok(false);
        }
        Err(status_error(status, response, "schema create"))
    }

    /// Send one batch request; per-object failures come back in the report
    pub fn insert_objects(
        &self,
        collection: &str,
        objects: &[StoredObject],
    ) -> Result<BatchReport, StoreError> {
        if objects.is_empty() {
            return Ok(BatchReport::default());
        }

        let body = json!({
            "objects": objects.iter().map(|o| o.to_json(collection)).collect::<Vec<_>>()
        });
        let request = self
            .client
            .post(format!("{}/v1/batch/objects", self.base_url))
            .json(&body);
        let response = self.send(request, "batch insert")?;

        let results: Vec<BatchObjectResult> = response
            .json()
            .map_err(|e| StoreError::Remote(format!("invalid batch response: {}", e)))?;

        Ok(batch_report(objects, results))
    }

    pub fn near_vector(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let (where_clause, needs_post_filter) = match filter {
            Some(f) => where_clause(f),
            None => (None, false),
        };
        let limit = if needs_post_filter {
            top_k * POST_FILTER_OVERFETCH
        } else {
            top_k
        };

        let query = near_vector_query(collection, vector, limit, where_clause.as_deref());
        let data = self.graphql(&query)?;
        let mut hits = parse_get_response(&data, collection)?;

        if let Some(f) = filter {
            hits.retain(|hit| f.matches(hit));
        }
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Authoritative object count via an aggregate query
    pub fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let query = format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", collection);
        let data = self.graphql(&query)?;
        parse_aggregate_count(&data, collection)
    }

    fn graphql(&self, query: &str) -> Result<Value, StoreError> {
        let request = self
            .client
            .post(format!("{}/v1/graphql", self.base_url))
            .json(&json!({ "query": query }));
        let response = self.send(request, "graphql")?;

        let payload: Value = response
            .json()
            .map_err(|e| StoreError::Remote(format!("invalid GraphQL response: {}", e)))?;
        graphql_data(payload)
    }

    fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, StoreError> {
        let response = request.send().map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(status_error(status, response, operation))
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Unavailable(format!("request to {} timed out", self.base_url))
        } else {
            StoreError::Connection {
                url: self.base_url.clone(),
                message: err.to_string(),
            }
        }
    }
}

fn status_error(status: StatusCode, response: Response, operation: &str) -> StoreError {
    let body = response
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    let message = format!("{} failed ({}): {}", operation, status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => StoreError::Unavailable(message),
        _ => StoreError::Remote(message),
    }
}

fn collection_schema(collection: &str) -> Value {
    json!({
        "class": collection,
        "vectorizer": "none",
        "vectorIndexConfig": { "distance": "cosine" },
        "properties": PROPERTIES
            .iter()
            .map(|name| json!({ "name": name, "dataType": ["text"] }))
            .collect::<Vec<_>>(),
    })
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    result: Option<BatchResultStatus>,
}

#[derive(Debug, Deserialize)]
struct BatchResultStatus {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    message: String,
}

/// Results come back in request order
fn batch_report(objects: &[StoredObject], results: Vec<BatchObjectResult>) -> BatchReport {
    let mut errors = Vec::new();
    for (object, result) in objects.iter().zip(results.iter()) {
        let messages: Vec<&str> = result
            .result
            .as_ref()
            .and_then(|r| r.errors.as_ref())
            .map(|e| e.error.iter().map(|m| m.message.as_str()).collect())
            .unwrap_or_default();
        if !messages.is_empty() {
            errors.push(ObjectError {
                chunk_id: object.chunk.chunk_id.clone(),
                message: messages.join("; "),
            });
        }
    }

    // Objects missing from the response were not committed
    for object in objects.iter().skip(results.len()) {
        errors.push(ObjectError {
            chunk_id: object.chunk.chunk_id.clone(),
            message: "no result returned for object".to_string(),
        });
    }

    BatchReport {
        inserted: objects.len() - errors.len(),
        errors,
    }
}

/// GraphQL `where` for the pushable part of a filter, plus whether anything is left over
fn where_clause(filter: &MetadataFilter) -> (Option<String>, bool) {
    let mut operands = Vec::new();
    let mut leftover = false;

    for (key, value) in filter.conditions() {
        match value.as_str() {
            Some(text) if PUSHDOWN_FIELDS.contains(&key) => {
                operands.push(format!(
                    "{{path: [\"{}\"], operator: Equal, valueText: {}}}",
                    key,
                    Value::String(text.to_string())
                ));
            }
            _ => leftover = true,
        }
    }

    let clause = match operands.len() {
        0 => None,
        1 => operands.pop(),
        _ => Some(format!("{{operator: And, operands: [{}]}}", operands.join(", "))),
    };
    (clause, leftover)
}

fn near_vector_query(
    collection: &str,
    vector: &[f32],
    limit: usize,
    where_clause: Option<&str>,
) -> String {
    let vector = vector
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let where_arg = where_clause
        .map(|w| format!(", where: {}", w))
        .unwrap_or_default();

    format!(
        "{{ Get {{ {}(nearVector: {{vector: [{}]}}, limit: {}{}) {{ {} _additional {{ id distance }} }} }} }}",
        collection,
        vector,
        limit,
        where_arg,
        PROPERTIES.join(" ")
    )
}

fn graphql_data(payload: Value) -> Result<Value, StoreError> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect();
            return Err(StoreError::Remote(format!(
                "GraphQL error: {}",
                messages.join("; ")
            )));
        }
    }

    payload
        .get("data")
        .cloned()
        .ok_or_else(|| StoreError::Remote("GraphQL response without data".to_string()))
}

fn parse_get_response(data: &Value, collection: &str) -> Result<Vec<SearchHit>, StoreError> {
    let objects = data
        .pointer(&format!("/Get/{}", collection))
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Remote(format!("missing Get.{} in response", collection)))?;

    let text = |object: &Value, key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let hits = objects
        .iter()
        .map(|object| {
            let distance = object
                .pointer("/_additional/distance")
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32;

            let chunk_id = text(object, "chunk_id");
            let id = if chunk_id.is_empty() {
                object
                    .pointer("/_additional/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            } else {
                chunk_id
            };

            let metadata = decode_metadata(&text(object, "metadata")).unwrap_or_else(|e| {
                tracing::warn!(id = %id, "Unparseable metadata property: {}", e);
                Default::default()
            });

            SearchHit {
                content: text(object, "text"),
                source: text(object, "source"),
                category: text(object, "category"),
                metadata,
                score: similarity_from_cosine(distance),
                distance,
                id,
            }
        })
        .collect();

    Ok(hits)
}

fn parse_aggregate_count(data: &Value, collection: &str) -> Result<u64, StoreError> {
    data.pointer(&format!("/Aggregate/{}/0/meta/count", collection))
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Remote(format!("missing Aggregate.{} count", collection)))
}

/// A category's collection behind the `VectorStore` capability
pub struct WeaviateStore {
    client: WeaviateClient,
    collection: String,
    dimension: usize,
    ensured: AtomicBool,
}

impl WeaviateStore {
    pub fn new(
        client: WeaviateClient,
        category: &str,
        dimension: usize,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            collection: collection_name(category)?,
            client,
            dimension,
            ensured: AtomicBool::new(false),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn ensure_collection(&self) -> Result<(), StoreError> {
        if !self.ensured.load(Ordering::Acquire) {
            self.client.ensure_collection(&self.collection)?;
            self.ensured.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl VectorStore for WeaviateStore {
    fn add(&self, vectors: &[Vec<f32>], chunks: &[DocumentChunk]) -> Result<usize, StoreError> {
        let keep = accepted_records(self.dimension, vectors, chunks)?;
        if keep.is_empty() {
            return Ok(0);
        }
        self.ensure_collection()?;

        let objects: Vec<StoredObject> = keep
            .iter()
            .map(|&i| StoredObject::new(&self.collection, chunks[i].clone(), vectors[i].clone()))
            .collect();

        let mut inserted = 0;
        let mut failed = 0;
        for batch in objects.chunks(self.client.batch_size()) {
            let report = self.client.insert_objects(&self.collection, batch)?;
            inserted += report.inserted;
            for error in &report.errors {
                failed += 1;
                if failed <= VERBOSE_ERRORS {
                    tracing::warn!(
                        collection = %self.collection,
                        chunk_id = %error.chunk_id,
                        "Object rejected: {}",
                        error.message
                    );
                }
            }
        }

        if failed > VERBOSE_ERRORS {
            tracing::warn!(
                collection = %self.collection,
                "{} objects rejected in total ({} not logged)",
                failed,
                failed - VERBOSE_ERRORS
            );
        }
        Ok(inserted)
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.client
            .near_vector(&self.collection, query, top_k, filter)
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.client.count(&self.collection)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Weaviate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metadata;

    fn chunk(id: &str) -> DocumentChunk {
        DocumentChunk {
            chunk_id: id.to_string(),
            text: "text".to_string(),
            source: "src".to_string(),
            category: "pitch".to_string(),
            metadata: Metadata::new(),
            created_at: None,
        }
    }

    fn unreachable_client() -> WeaviateClient {
        WeaviateClient::new("http://127.0.0.1:9", None, Duration::from_secs(2), 10).unwrap()
    }

    #[test]
    fn test_schema_is_flat_text_without_vectorizer() {
        let schema = collection_schema("PitchCorpus");
        assert_eq!(schema["class"], "PitchCorpus");
        assert_eq!(schema["vectorizer"], "none");
        assert_eq!(schema["properties"].as_array().unwrap().len(), 6);
        assert!(schema["properties"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["dataType"][0] == "text"));
    }

    #[test]
    fn test_object_json_carries_metadata_string() {
        let mut c = chunk("c-1");
        c.metadata
            .insert("stage".to_string(), serde_json::json!("seed"));
        let object = StoredObject::new("PitchCorpus", c.clone(), vec![0.1, 0.2]);
        let value = object.to_json("PitchCorpus");

        let stored = value["properties"]["metadata"].as_str().unwrap();
        assert_eq!(decode_metadata(stored).unwrap(), c.metadata);
        assert_eq!(value["id"], object_id("PitchCorpus", "c-1").to_string());
    }

    #[test]
    fn test_batch_report_counts_object_errors() {
        let objects = vec![
            StoredObject::new("PitchCorpus", chunk("a"), vec![1.0]),
            StoredObject::new("PitchCorpus", chunk("b"), vec![1.0]),
            StoredObject::new("PitchCorpus", chunk("c"), vec![1.0]),
        ];
        let results: Vec<BatchObjectResult> = serde_json::from_str(
            r#"[
                {"result": {}},
                {"result": {"errors": {"error": [{"message": "vector lengths don't match"}]}}}
            ]"#,
        )
        .unwrap();

        let report = batch_report(&objects, results);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].chunk_id, "b");
        assert_eq!(report.errors[1].chunk_id, "c");
    }

    #[test]
    fn test_where_clause_pushdown() {
        let filter = MetadataFilter::new().with("source", "yc \"library\"");
        let (clause, leftover) = where_clause(&filter);
        assert_eq!(
            clause.unwrap(),
            r#"{path: ["source"], operator: Equal, valueText: "yc \"library\""}"#
        );
        assert!(!leftover);

        let filter = MetadataFilter::new()
            .with("category", "pitch")
            .with("source", "yc")
            .with("year", 2023);
        let (clause, leftover) = where_clause(&filter);
        assert!(clause.unwrap().starts_with("{operator: And, operands: ["));
        assert!(leftover);
    }

    #[test]
    fn test_chunk_id_filter_survives_post_filter() {
        let filter = MetadataFilter::new().with("chunk_id", "c-9");
        let (clause, leftover) = where_clause(&filter);
        assert_eq!(
            clause.unwrap(),
            r#"{path: ["chunk_id"], operator: Equal, valueText: "c-9"}"#
        );
        assert!(!leftover);

        let data = serde_json::json!({
            "Get": {"PitchCorpus": [{
                "chunk_id": "c-9", "text": "deck", "source": "yc", "category": "pitch",
                "metadata": "{}", "_additional": {"id": "0000", "distance": 0.1}
            }]}
        });
        let mut hits = parse_get_response(&data, "PitchCorpus").unwrap();
        hits.retain(|hit| filter.matches(hit));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c-9");
    }

    #[test]
    fn test_near_vector_query_shape() {
        let query = near_vector_query("TeamCorpus", &[0.5, -1.0], 3, None);
        assert!(query.contains("TeamCorpus(nearVector: {vector: [0.5,-1]}, limit: 3)"));
        assert!(query.contains("_additional { id distance }"));
    }

    #[test]
    fn test_parse_get_response() {
        let data = serde_json::json!({
            "Get": {"PitchCorpus": [
                {
                    "chunk_id": "c-9", "text": "deck", "source": "yc", "category": "pitch",
                    "metadata": "{\"stage\":\"seed\"}", "created_at": "",
                    "_additional": {"id": "0000", "distance": 0.2}
                },
                {
                    "chunk_id": "", "text": "other", "source": "", "category": "pitch",
                    "metadata": "not json",
                    "_additional": {"id": "1111", "distance": 1.4}
                }
            ]}
        });

        let hits = parse_get_response(&data, "PitchCorpus").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "c-9");
        assert_eq!(hits[0].metadata["stage"], "seed");
        assert!((hits[0].score - 0.8).abs() < 1e-6);
        assert_eq!(hits[1].id, "1111");
        assert_eq!(hits[1].score, 0.0);
        assert!(hits[1].metadata.is_empty());
    }

    #[test]
    fn test_graphql_errors_surface() {
        let payload = serde_json::json!({
            "errors": [{"message": "Cannot query field \"PitchCorpus\""}]
        });
        assert!(matches!(graphql_data(payload), Err(StoreError::Remote(_))));

        let data = serde_json::json!({"Aggregate": {"PitchCorpus": [{"meta": {"count": 42}}]}});
        assert_eq!(parse_aggregate_count(&data, "PitchCorpus").unwrap(), 42);
    }

    #[test]
    fn test_unreachable_store_errors_instead_of_empty() {
        let store = WeaviateStore::new(unreachable_client(), "pitch", 2).unwrap();

        assert!(matches!(
            store.search(&[0.1, 0.2], 5, None),
            Err(StoreError::Connection { .. })
        ));
        assert!(matches!(store.count(), Err(StoreError::Connection { .. })));
        assert!(store.add(&[vec![0.1, 0.2]], &[chunk("a")]).is_err());
    }

    #[test]
    fn test_add_validates_before_network() {
        let store = WeaviateStore::new(unreachable_client(), "pitch", 384).unwrap();
        let result = store.add(&[vec![0.0; 512]], &[chunk("a")]);
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(WeaviateClient::new("localhost:8080", None, Duration::from_secs(1), 10).is_err());
    }
}
