//! OpenAI-compatible embeddings API client.

use super::{EmbeddingError, EmbeddingProvider};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blocking embeddings client for `/embeddings` endpoints.
///
/// Failed calls are returned to the caller unchanged; retry policy belongs to
/// whoever drives the provider.
pub struct RemoteEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl RemoteEmbeddingProvider {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::InitializationError(
                "missing embeddings API key".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::InitializationError(
                "missing embeddings model name".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingError::InitializationError("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| EmbeddingError::RequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::RequestError(format!(
                "embeddings request failed ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::RequestError(format!("invalid response: {}", e)))?;
        parsed.into_ordered(texts.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    /// The API may return entries out of order; `index` is authoritative
    fn into_ordered(mut self, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.data.len() != expected {
            return Err(EmbeddingError::GenerationError(format!(
                "API returned {} embeddings for {} inputs",
                self.data.len(),
                expected
            )));
        }
        self.data.sort_by_key(|entry| entry.index);
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
