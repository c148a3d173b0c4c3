//! Vector stores
//!
//! Every backend implements the same `VectorStore` capability
//! (`add`/`search`/`count`); the concrete struct is picked once at
//! construction from a `StoreKind`.

mod filter;
mod local;
mod query_agent;
mod weaviate;

pub use filter::MetadataFilter;
pub use local::LocalVectorStore;
pub use query_agent::{AgentResponse, QueryAgentRetriever};
pub use weaviate::{BatchReport, ObjectError, StoredObject, WeaviateClient, WeaviateStore};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Arbitrary per-chunk metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which store implementation backs retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Flat index persisted under the local index directory
    Local,
    /// Weaviate collection, vectors supplied by us
    Weaviate,
    /// Managed query agent over Weaviate collections (read only)
    QueryAgent,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {vectors} vectors for {records} metadata records")]
    LengthMismatch { vectors: usize, records: usize },

    /// 503-class responses and timeouts; worth retrying later
    #[error("Vector store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot reach vector store at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Persistence error at {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Operation not supported by {kind:?} store: {operation}")]
    Unsupported {
        kind: StoreKind,
        operation: &'static str,
    },

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A unit of retrievable text and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Nearest-neighbour match, nearest first in any result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub source: String,
    pub category: String,
    pub metadata: Metadata,
    /// Higher is closer, in `[0, 1]`
    pub score: f32,
    /// Raw backend distance
    pub distance: f32,
}

/// Capability shared by every vector store backend
pub trait VectorStore: Send + Sync {
    /// Append records; `vectors[i]` belongs to `chunks[i]`
    ///
    /// Records with an empty vector are skipped. Any other vector whose
    /// length differs from `dimension()` rejects the whole call before
    /// anything is written. Returns the number of records committed.
    fn add(&self, vectors: &[Vec<f32>], chunks: &[DocumentChunk]) -> Result<usize, StoreError>;

    /// Up to `top_k` hits ordered nearest first
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Number of stored records, as the backend reports it
    fn count(&self) -> Result<u64, StoreError>;

    fn dimension(&self) -> usize;

    fn kind(&self) -> StoreKind;

    /// Persist pending state; a no-op for remote stores
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Shared `add` preconditions; returns indices of records to keep
pub(crate) fn accepted_records(
    dimension: usize,
    vectors: &[Vec<f32>],
    chunks: &[DocumentChunk],
) -> Result<Vec<usize>, StoreError> {
    if vectors.len() != chunks.len() {
        return Err(StoreError::LengthMismatch {
            vectors: vectors.len(),
            records: chunks.len(),
        });
    }

    let mut keep = Vec::with_capacity(vectors.len());
    for (i, vector) in vectors.iter().enumerate() {
        if vector.is_empty() {
            tracing::warn!(chunk_id = %chunks[i].chunk_id, "Skipping record with empty vector");
            continue;
        }
        if vector.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        keep.push(i);
    }
    Ok(keep)
}

/// Collection name for an agent category: `competitive` -> `CompetitiveCorpus`
pub fn collection_name(category: &str) -> Result<String, StoreError> {
    let valid = !category.is_empty()
        && category.starts_with(|c: char| c.is_ascii_alphabetic())
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidCollection(category.to_string()));
    }

    let mut name = String::with_capacity(category.len() + 6);
    for part in category.split('_').filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.push(first.to_ascii_uppercase());
            name.extend(chars.map(|c| c.to_ascii_lowercase()));
        }
    }
    name.push_str("Corpus");
    Ok(name)
}

/// Collection name for a source table: `pitch_corpus` -> `PitchCorpus`
pub fn collection_for_table(table: &str) -> Result<String, StoreError> {
    let category = table
        .strip_suffix("_corpus")
        .ok_or_else(|| StoreError::InvalidCollection(table.to_string()))?;
    collection_name(category)
}

/// Stable object id, so re-sending a chunk overwrites instead of duplicating
pub fn object_id(collection: &str, chunk_id: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}/{}", collection, chunk_id).as_bytes(),
    )
}

/// Metadata as stored in a flat text property
pub fn encode_metadata(metadata: &Metadata) -> String {
    serde_json::Value::Object(metadata.clone()).to_string()
}

/// Inverse of `encode_metadata`; blank input is an empty map
pub fn decode_metadata(raw: &str) -> Result<Metadata, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_str(raw)
}

/// `1 / (1 + d)`: distance 0 scores 1.0
pub fn similarity_from_l2(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// `1 - |d|` for cosine distance, clamped to `[0, 1]`
pub fn similarity_from_cosine(distance: f32) -> f32 {
    (1.0 - distance.abs()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_naming() {
        assert_eq!(collection_name("pitch").unwrap(), "PitchCorpus");
        assert_eq!(
            collection_name("competitive_analysis").unwrap(),
            "CompetitiveAnalysisCorpus"
        );
        assert_eq!(collection_for_table("policy_corpus").unwrap(), "PolicyCorpus");
        assert!(collection_name("").is_err());
        assert!(collection_name("9lives").is_err());
        assert!(collection_name("drop table").is_err());
        assert!(collection_for_table("pitch").is_err());
    }

    #[test]
    fn test_object_id_is_stable() {
        let a = object_id("PitchCorpus", "chunk-1");
        assert_eq!(a, object_id("PitchCorpus", "chunk-1"));
        assert_ne!(a, object_id("PitchCorpus", "chunk-2"));
        assert_ne!(a, object_id("TeamCorpus", "chunk-1"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = json!({
            "source": "yc_library",
            "tags": ["seed", "saas"],
            "nested": {"page": 3, "score": 0.75},
            "empty": null
        });
        let metadata = metadata.as_object().unwrap().clone();

        let stored = encode_metadata(&metadata);
        assert_eq!(decode_metadata(&stored).unwrap(), metadata);
        assert!(decode_metadata("").unwrap().is_empty());
        assert!(decode_metadata("{not json").is_err());
    }

    #[test]
    fn test_similarity_formulas() {
        assert_eq!(similarity_from_l2(0.0), 1.0);
        assert!(similarity_from_l2(3.0) < similarity_from_l2(1.0));
        assert_eq!(similarity_from_cosine(0.25), 0.75);
        assert_eq!(similarity_from_cosine(1.6), 0.0);
        assert!((similarity_from_cosine(-0.1) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_accepted_records() {
        let chunks: Vec<DocumentChunk> = (0..3)
            .map(|i| DocumentChunk {
                chunk_id: i.to_string(),
                text: "t".to_string(),
                source: String::new(),
                category: String::new(),
                metadata: Metadata::new(),
                created_at: None,
            })
            .collect();

        let vectors = vec![vec![1.0, 0.0], vec![], vec![0.0, 1.0]];
        assert_eq!(accepted_records(2, &vectors, &chunks).unwrap(), vec![0, 2]);

        let bad = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.0, 1.0]];
        assert!(matches!(
            accepted_records(2, &bad, &chunks),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            accepted_records(2, &vectors[..2], &chunks),
            Err(StoreError::LengthMismatch { .. })
        ));
    }
}
