//! Client for the managed query agent layered over Weaviate collections.
//!
//! The agent takes a natural-language query, runs its own retrieval over the
//! named collections and may synthesize an answer. It is read-only from our
//! side: nothing is embedded or inserted through it.

use super::{decode_metadata, similarity_from_cosine, MetadataFilter, Metadata, SearchHit, StoreError};
use crate::config::QueryAgentConfig;
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Structured agent output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentResponse {
    pub answer: Option<String>,
    pub hits: Vec<SearchHit>,
}

pub struct QueryAgentRetriever {
    client: Client,
    endpoint: String,
    cluster_url: String,
}

#[derive(Serialize)]
struct AgentRequest<'a> {
    query: &'a str,
    collections: &'a [String],
    limit: usize,
    cluster_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AgentPayload {
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    objects: Vec<AgentObject>,
}

#[derive(Debug, Deserialize)]
struct AgentObject {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    #[serde(default)]
    distance: Option<f32>,
}

impl QueryAgentRetriever {
    pub fn new(
        url: &str,
        api_key: &str,
        cluster_url: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        if api_key.trim().is_empty() {
            return Err(StoreError::Config("missing query agent API key".to_string()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| StoreError::Config("invalid query agent API key".to_string()))?,
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/query", url.trim_end_matches('/')),
            cluster_url: cluster_url.to_string(),
        })
    }

    /// Build from configuration; the API key env var must be set
    pub fn from_config(config: &QueryAgentConfig, cluster_url: &str) -> Result<Self, StoreError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            StoreError::Config(format!(
                "Environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            &config.url,
            &api_key,
            cluster_url,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Retrieve (and possibly answer) over `collections`
    pub fn ask(
        &self,
        query: &str,
        collections: &[String],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<AgentResponse, StoreError> {
        let filters = filter.filter(|f| !f.is_empty()).map(|f| {
            Value::Object(
                f.conditions()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            )
        });
        let request = AgentRequest {
            query,
            collections,
            limit,
            cluster_url: &self.cluster_url,
            filters,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Unavailable(format!("query agent timed out: {}", e))
                } else {
                    StoreError::Connection {
                        url: self.endpoint.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("query agent failed ({}): {}", status, body);
            return Err(if status == StatusCode::SERVICE_UNAVAILABLE {
                StoreError::Unavailable(message)
            } else {
                StoreError::Remote(message)
            });
        }

        let payload: AgentPayload = response
            .json()
            .map_err(|e| StoreError::Remote(format!("invalid query agent response: {}", e)))?;

        let mut parsed = payload.into_response();
        if let Some(f) = filter {
            parsed.hits.retain(|hit| f.matches(hit));
        }
        parsed.hits.truncate(limit);
        Ok(parsed)
    }
}

impl AgentPayload {
    fn into_response(self) -> AgentResponse {
        let hits = self
            .objects
            .into_iter()
            .map(|object| {
                let field = |key: &str| {
                    object
                        .properties
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };

                let metadata: Metadata = match object.properties.get("metadata") {
                    Some(Value::String(raw)) => decode_metadata(raw).unwrap_or_default(),
                    Some(Value::Object(map)) => map.clone(),
                    _ => Metadata::new(),
                };
                let chunk_id = field("chunk_id");
                let distance = object.distance.unwrap_or(0.0);

                SearchHit {
                    id: if chunk_id.is_empty() {
                        object.uuid.clone()
                    } else {
                        chunk_id
                    },
                    content: field("text"),
                    source: field("source"),
                    category: field("category"),
                    metadata,
                    score: similarity_from_cosine(distance),
                    distance,
                }
            })
            .collect();

        AgentResponse {
            answer: self.final_answer.filter(|a| !a.trim().is_empty()),
            hits,
        }
    }
}
