//! Agent-facing retrieval
//!
//! `Retriever::retrieve` is the one call the agent layer makes: category +
//! query in, ranked context out. The backend is fixed at construction.

use crate::config::Config;
use crate::embedding::{provider_from_config, EmbeddingError, EmbeddingProvider};
use crate::error::{LaunchpadError, Result};
use crate::store::{
    collection_name, LocalVectorStore, Metadata, MetadataFilter, QueryAgentRetriever, SearchHit,
    StoreError, StoreKind, VectorStore, WeaviateClient, WeaviateStore,
};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// One piece of retrieved context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub id: String,
    pub text: String,
    /// Chunk metadata plus `source` and `category`
    pub metadata: Metadata,
    pub distance: f32,
    pub relevance: f32,
}

impl From<SearchHit> for RetrievedDoc {
    fn from(hit: SearchHit) -> Self {
        let mut metadata = hit.metadata;
        metadata
            .entry("source")
            .or_insert_with(|| hit.source.into());
        metadata
            .entry("category")
            .or_insert_with(|| hit.category.into());

        Self {
            id: hit.id,
            text: hit.content,
            metadata,
            distance: hit.distance,
            relevance: hit.score,
        }
    }
}

/// Ranked context plus the agent's answer when the backend produces one
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub documents: Vec<RetrievedDoc>,
    pub answer: Option<String>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

enum Backend {
    Vector {
        embedder: Arc<dyn EmbeddingProvider>,
        stores: AHashMap<String, Arc<dyn VectorStore>>,
    },
    QueryAgent {
        agent: QueryAgentRetriever,
        categories: Vec<String>,
    },
}

pub struct Retriever {
    backend: Backend,
}

impl Retriever {
    /// Embed-then-search over one store per category
    pub fn with_stores(
        embedder: Arc<dyn EmbeddingProvider>,
        stores: impl IntoIterator<Item = (String, Arc<dyn VectorStore>)>,
    ) -> Self {
        Self {
            backend: Backend::Vector {
                embedder,
                stores: stores.into_iter().collect(),
            },
        }
    }

    /// Delegate everything to the managed query agent
    pub fn with_query_agent(agent: QueryAgentRetriever, categories: Vec<String>) -> Self {
        Self {
            backend: Backend::QueryAgent { agent, categories },
        }
    }

    /// Build the configured backend; missing URLs or keys fail here
    pub fn from_config(config: &Config) -> Result<Self> {
        let categories = &config.retrieval.categories;

        match config.retrieval.store {
            StoreKind::QueryAgent => {
                let agent = QueryAgentRetriever::from_config(&config.query_agent, &config.weaviate.url)?;
                Ok(Self::with_query_agent(agent, categories.clone()))
            }
            StoreKind::Local => {
                let embedder = provider_from_config(&config.embedding)?;
                let index_dir = Config::expand_path(&config.storage.index_dir)?;
                let mut stores: Vec<(String, Arc<dyn VectorStore>)> = Vec::new();
                for category in categories {
                    let store =
                        LocalVectorStore::open(&index_dir, category, config.embedding.dimension)?;
                    stores.push((category.clone(), Arc::new(store)));
                }
                Ok(Self::with_stores(embedder, stores))
            }
            StoreKind::Weaviate => {
                let embedder = provider_from_config(&config.embedding)?;
                let client = WeaviateClient::from_config(&config.weaviate)?;
                let mut stores: Vec<(String, Arc<dyn VectorStore>)> = Vec::new();
                for category in categories {
                    let store =
                        WeaviateStore::new(client.clone(), category, config.embedding.dimension)?;
                    stores.push((category.clone(), Arc::new(store)));
                }
                Ok(Self::with_stores(embedder, stores))
            }
        }
    }

    pub fn kind(&self) -> StoreKind {
        match &self.backend {
            Backend::Vector { stores, .. } => stores
                .values()
                .next()
                .map(|s| s.kind())
                .unwrap_or(StoreKind::Local),
            Backend::QueryAgent { .. } => StoreKind::QueryAgent,
        }
    }

    /// Store serving `category`, when the backend is vector based
    pub fn store(&self, category: &str) -> Option<&Arc<dyn VectorStore>> {
        match &self.backend {
            Backend::Vector { stores, .. } => stores.get(category),
            Backend::QueryAgent { .. } => None,
        }
    }

    pub fn has_category(&self, category: &str) -> bool {
        match &self.backend {
            Backend::Vector { stores, .. } => stores.contains_key(category),
            Backend::QueryAgent { categories, .. } => categories.iter().any(|c| c == category),
        }
    }

    /// Fetch context for `query`; an unconfigured category yields no documents
    pub fn retrieve(
        &self,
        category: &str,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> std::result::Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if !self.has_category(category) {
            tracing::debug!("No collection configured for category {}", category);
            return Ok(Retrieval::default());
        }

        match &self.backend {
            Backend::Vector { embedder, stores } => {
                let Some(store) = stores.get(category) else {
                    return Ok(Retrieval::default());
                };
                let query_vector = embedder.embed(query)?;
                let hits = store.search(&query_vector, top_k, filter)?;
                Ok(Retrieval {
                    documents: hits.into_iter().map(RetrievedDoc::from).collect(),
                    answer: None,
                })
            }
            Backend::QueryAgent { agent, .. } => {
                let collections = vec![collection_name(category)?];
                let response = agent.ask(query, &collections, top_k, filter)?;
                Ok(Retrieval {
                    documents: response.hits.into_iter().map(RetrievedDoc::from).collect(),
                    answer: response.answer,
                })
            }
        }
    }

    /// `retrieve` for the agent boundary: failures are logged and become empty context
    pub fn retrieve_or_empty(
        &self,
        category: &str,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Retrieval {
        match self.retrieve(category, query, top_k, filter) {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::error!(
                    category = %category,
                    "Retrieval failed, continuing without context: {}",
                    e
                );
                Retrieval::default()
            }
        }
    }

    /// Document count for a category's store
    pub fn count(&self, category: &str) -> Result<u64> {
        match &self.backend {
            Backend::Vector { stores, .. } => {
                let store = stores.get(category).ok_or_else(|| {
                    LaunchpadError::Config(format!("No collection configured for {}", category))
                })?;
                Ok(store.count()?)
            }
            Backend::QueryAgent { .. } => Err(StoreError::Unsupported {
                kind: StoreKind::QueryAgent,
                operation: "count",
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentChunk;
    use tempfile::TempDir;

    struct AxisEmbedder;

    impl EmbeddingProvider for AxisEmbedder {
        fn embed_chunk(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("fund") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn doc(id: &str, text: &str) -> DocumentChunk {
        DocumentChunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source: "library".to_string(),
            category: "pitch".to_string(),
            metadata: Metadata::new(),
            created_at: None,
        }
    }

    fn pitch_retriever(temp: &TempDir) -> Retriever {
        let store = LocalVectorStore::open(temp.path(), "pitch", 2).unwrap();
        store
            .add(
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[doc("a", "fundraising basics"), doc("b", "team hiring")],
            )
            .unwrap();
        Retriever::with_stores(
            Arc::new(AxisEmbedder),
            vec![("pitch".to_string(), Arc::new(store) as Arc<dyn VectorStore>)],
        )
    }

    #[test]
    fn test_retrieve_ranks_nearest_first() {
        let temp = TempDir::new().unwrap();
        let retriever = pitch_retriever(&temp);

        let result = retriever
            .retrieve("pitch", "how do I fundraise", 2, None)
            .unwrap();
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.documents[0].id, "a");
        assert_eq!(result.documents[0].metadata["source"], "library");
        assert_eq!(result.documents[0].relevance, 1.0);
        assert!(result.answer.is_none());
    }

    #[test]
    fn test_unknown_category_is_empty() {
        let temp = TempDir::new().unwrap();
        let retriever = pitch_retriever(&temp);

        let result = retriever.retrieve("patent", "claims", 3, None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_store_failure_degrades_to_empty() {
        let client = WeaviateClient::new(
            "http://127.0.0.1:9",
            None,
            std::time::Duration::from_secs(2),
            10,
        )
        .unwrap();
        let store = WeaviateStore::new(client, "pitch", 2).unwrap();
        let retriever = Retriever::with_stores(
            Arc::new(AxisEmbedder),
            vec![("pitch".to_string(), Arc::new(store) as Arc<dyn VectorStore>)],
        );

        assert!(matches!(
            retriever.retrieve("pitch", "fundraise", 3, None),
            Err(RetrievalError::Store(StoreError::Connection { .. }))
        ));
        assert!(retriever
            .retrieve_or_empty("pitch", "fundraise", 3, None)
            .is_empty());
    }

    #[test]
    fn test_empty_query_rejected() {
        let temp = TempDir::new().unwrap();
        let retriever = pitch_retriever(&temp);
        assert!(matches!(
            retriever.retrieve("pitch", "  ", 3, None),
            Err(RetrievalError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_count_per_category() {
        let temp = TempDir::new().unwrap();
        let retriever = pitch_retriever(&temp);
        assert_eq!(retriever.count("pitch").unwrap(), 2);
        assert!(retriever.count("team").is_err());
        assert_eq!(retriever.kind(), StoreKind::Local);
    }
}
