use launchpad::store::{
    decode_metadata, encode_metadata, DocumentChunk, LocalVectorStore, Metadata, MetadataFilter,
    StoreError, VectorStore,
};
use serde_json::json;
use tempfile::TempDir;

/// Deterministic pseudo-random vectors
fn vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            (0..dim)
                .map(|_| {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
                })
                .collect()
        })
        .collect()
}

fn chunks(n: usize, category: &str) -> Vec<DocumentChunk> {
    (0..n)
        .map(|i| {
            let mut metadata = Metadata::new();
            metadata.insert("position".to_string(), json!(i));
            DocumentChunk {
                chunk_id: format!("{}-{}", category, i),
                text: format!("document {}", i),
                source: if i % 2 == 0 { "deck" } else { "blog" }.to_string(),
                category: category.to_string(),
                metadata,
                created_at: None,
            }
        })
        .collect()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[test]
fn test_add_increases_count_by_accepted_records() {
    let temp = TempDir::new().unwrap();
    let store = LocalVectorStore::open(temp.path(), "pitch", 8).unwrap();

    let mut data = vectors(20, 8, 7);
    data[3] = Vec::new();
    data[11] = Vec::new();

    let before = store.count().unwrap();
    let added = store.add(&data, &chunks(20, "pitch")).unwrap();
    assert_eq!(added, 18);
    assert_eq!(store.count().unwrap(), before + 18);
}

#[test]
fn test_nearest_neighbour_is_exact() {
    let temp = TempDir::new().unwrap();
    let store = LocalVectorStore::open(temp.path(), "competitive", 16).unwrap();
    let data = vectors(200, 16, 42);
    store.add(&data, &chunks(200, "competitive")).unwrap();

    for query in vectors(10, 16, 99) {
        let hits = store.search(&query, 1, None).unwrap();
        let best = data
            .iter()
            .map(|v| squared_l2(v, &query))
            .fold(f32::INFINITY, f32::min);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].distance - best).abs() <= 1e-4 * best.max(1.0));
        assert!((hits[0].score - 1.0 / (1.0 + hits[0].distance)).abs() < 1e-6);
    }
}

#[test]
fn test_results_sorted_and_bounded() {
    let temp = TempDir::new().unwrap();
    let store = LocalVectorStore::open(temp.path(), "team", 4).unwrap();
    assert!(store.search(&[0.0; 4], 5, None).unwrap().is_empty());

    store.add(&vectors(3, 4, 1), &chunks(3, "team")).unwrap();
    let hits = store.search(&[0.0; 4], 5, None).unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_wrong_dimension_inserts_nothing() {
    let temp = TempDir::new().unwrap();
    let store = LocalVectorStore::open(temp.path(), "patent", 384).unwrap();

    let mut data = vectors(3, 384, 5);
    data.push(vec![0.1; 512]);
    let result = store.add(&data, &chunks(4, "patent"));

    assert!(matches!(
        result,
        Err(StoreError::DimensionMismatch {
            expected: 384,
            actual: 512
        })
    ));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_restart_restores_pairs() {
    let temp = TempDir::new().unwrap();
    let data = vectors(12, 6, 3);
    {
        let store = LocalVectorStore::open(temp.path(), "marketing", 6).unwrap();
        store.add(&data, &chunks(12, "marketing")).unwrap();
        store.flush().unwrap();
    }

    let store = LocalVectorStore::open(temp.path(), "marketing", 6).unwrap();
    assert_eq!(store.count().unwrap(), 12);
    for (i, vector) in data.iter().enumerate() {
        let hits = store.search(vector, 1, None).unwrap();
        assert_eq!(hits[0].id, format!("marketing-{}", i));
        assert_eq!(hits[0].metadata["position"], json!(i));
    }
}

#[test]
fn test_filter_restricts_results() {
    let temp = TempDir::new().unwrap();
    let store = LocalVectorStore::open(temp.path(), "policy", 4).unwrap();
    store.add(&vectors(10, 4, 11), &chunks(10, "policy")).unwrap();

    let filter = MetadataFilter::new().with("source", "blog");
    let hits = store.search(&[0.0; 4], 10, Some(&filter)).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|h| h.source == "blog"));
}

#[test]
fn test_metadata_string_round_trip() {
    let mut metadata = Metadata::new();
    metadata.insert("title".to_string(), json!("Seed deck"));
    metadata.insert("tags".to_string(), json!(["b2b", "saas"]));
    metadata.insert("nested".to_string(), json!({"page": 3, "score": 0.5}));

    let encoded = encode_metadata(&metadata);
    assert_eq!(decode_metadata(&encoded).unwrap(), metadata);
}
