use launchpad::config::Config;
use launchpad::embedding::{EmbeddingError, EmbeddingProvider};
use launchpad::retrieval::{RetrievalError, Retriever};
use launchpad::store::{
    DocumentChunk, LocalVectorStore, Metadata, MetadataFilter, StoreError, StoreKind,
    VectorStore, WeaviateClient, WeaviateStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Bag-of-letters embedder: stable and cheap
struct LetterEmbedder;

impl EmbeddingProvider for LetterEmbedder {
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 26];
                for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        26
    }

    fn model_name(&self) -> &str {
        "letters"
    }
}

fn chunk(id: &str, text: &str, source: &str, category: &str) -> DocumentChunk {
    DocumentChunk {
        chunk_id: id.to_string(),
        text: text.to_string(),
        source: source.to_string(),
        category: category.to_string(),
        metadata: Metadata::new(),
        created_at: None,
    }
}

fn build(temp: &TempDir) -> Retriever {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LetterEmbedder);
    let mut stores: Vec<(String, Arc<dyn VectorStore>)> = Vec::new();

    for (category, docs) in [
        (
            "pitch",
            vec![
                chunk("p1", "traction traction traction", "deck", "pitch"),
                chunk("p2", "zzz quiz jazz", "blog", "pitch"),
            ],
        ),
        (
            "team",
            vec![chunk("t1", "hiring a cofounder", "handbook", "team")],
        ),
    ] {
        let store = LocalVectorStore::open(temp.path(), category, 26).unwrap();
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts, 8).unwrap();
        store.add(&vectors, &docs).unwrap();
        stores.push((category.to_string(), Arc::new(store)));
    }

    Retriever::with_stores(embedder, stores)
}

#[test]
fn test_retrieve_returns_ranked_documents() {
    let temp = TempDir::new().unwrap();
    let retriever = build(&temp);

    let result = retriever.retrieve("pitch", "show traction", 5, None).unwrap();
    assert_eq!(result.documents.len(), 2);
    assert_eq!(result.documents[0].id, "p1");
    assert!(result.documents[0].relevance > result.documents[1].relevance);
    assert_eq!(result.documents[0].metadata["category"], "pitch");
    assert_eq!(retriever.kind(), StoreKind::Local);
}

#[test]
fn test_filter_and_unknown_category() {
    let temp = TempDir::new().unwrap();
    let retriever = build(&temp);

    let filter = MetadataFilter::new().with("source", "blog");
    let result = retriever
        .retrieve("pitch", "show traction", 5, Some(&filter))
        .unwrap();
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].id, "p2");

    assert!(retriever
        .retrieve("patent", "prior art", 5, None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_unreachable_remote_store_raises() {
    let client = WeaviateClient::new("http://127.0.0.1:9", None, Duration::from_secs(2), 10).unwrap();
    let store = WeaviateStore::new(client, "pitch", 26).unwrap();

    // "store unreachable" must never look like "no matches"
    let result = store.search(&[0.1; 26], 3, None);
    assert!(matches!(result, Err(StoreError::Connection { .. })));
    assert!(store.count().is_err());

    let retriever = Retriever::with_stores(
        Arc::new(LetterEmbedder),
        vec![("pitch".to_string(), Arc::new(store) as Arc<dyn VectorStore>)],
    );
    assert!(matches!(
        retriever.retrieve("pitch", "traction", 3, None),
        Err(RetrievalError::Store(_))
    ));
    assert!(retriever
        .retrieve_or_empty("pitch", "traction", 3, None)
        .is_empty());
}

#[test]
fn test_query_agent_from_config_fails_fast_on_missing_key() {
    let mut config = Config::default();
    config.retrieval.store = StoreKind::QueryAgent;
    config.query_agent.enabled = true;
    config.query_agent.api_key_env = "LAUNCHPAD_TEST_UNSET_AGENT_KEY".to_string();

    assert!(Retriever::from_config(&config).is_err());
}
