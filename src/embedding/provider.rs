/// Embedding provider trait and FastEmbed implementation
use super::Device;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Embedding request failed: {0}")]
    RequestError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Implementors only supply `embed_chunk`; single and batched embedding are
/// built on top of it and keep output order equal to input order.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one group of texts with a single backend call
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embedding = self
            .embed_chunk(&[text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))?;

        check_dimension(self.dimension(), &embedding)?;
        Ok(embedding)
    }

    /// Generate embeddings for many texts, `batch_size` texts per backend call
    fn embed_batch(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Dropping empties would shift every later embedding onto the wrong text
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Empty text at position {}",
                position
            )));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            let batch = self.embed_chunk(chunk)?;
            if batch.len() != chunk.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    chunk.len(),
                    batch.len()
                )));
            }
            for embedding in &batch {
                check_dimension(self.dimension(), embedding)?;
            }
            embeddings.extend(batch);
        }

        Ok(embeddings)
    }
}

pub(crate) fn check_dimension(expected: usize, embedding: &[f32]) -> Result<(), EmbeddingError> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// FastEmbed provider for local embedding generation
///
/// Uses all-MiniLM-L6-v2 model (384 dimensions) by default.
/// Optimized for offline operation with no API calls.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider on the CPU
    ///
    /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
    /// on first use. The smallest model (all-MiniLM-L6-v2) is ~90MB.
    /// Larger models:
    /// - all-MiniLM-L6-v2: 90MB (384 dims) - recommended for most use cases
    /// - bge-small-en-v1.5: 130MB (384 dims) - better accuracy
    /// - bge-base-en-v1.5: 440MB (768 dims) - highest accuracy
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        Self::with_device(model_name, Device::Cpu)
    }

    /// Create a provider on a specific device
    ///
    /// `Gpu`/`Auto` fail with `InitializationError` when the crate was built
    /// without the `cuda` feature or the CUDA runtime cannot be loaded.
    pub fn with_device(model_name: &str, device: Device) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = resolve_model(model_name)?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, device {:?})",
            model_name,
            dimension,
            device
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let init_options = match device {
            Device::Cpu => init_options,
            Device::Gpu | Device::Auto => accelerated_options(init_options)?,
        };

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2")
    }
}

fn resolve_model(model_name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    match model_name {
        "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        _ => Err(EmbeddingError::InitializationError(format!(
            "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
            model_name
        ))),
    }
}

#[cfg(feature = "cuda")]
fn accelerated_options(options: InitOptions) -> Result<InitOptions, EmbeddingError> {
    use ort::execution_providers::CUDAExecutionProvider;

    Ok(options.with_execution_providers(vec![CUDAExecutionProvider::default()
        .build()
        .error_on_failure()]))
}

#[cfg(not(feature = "cuda"))]
fn accelerated_options(_options: InitOptions) -> Result<InitOptions, EmbeddingError> {
    Err(EmbeddingError::InitializationError(
        "built without the `cuda` feature".to_string(),
    ))
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic character-histogram embedder
    struct HistogramEmbedder;

    impl EmbeddingProvider for HistogramEmbedder {
        fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 4];
                    for b in t.bytes() {
                        v[(b % 4) as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "histogram"
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let texts: Vec<String> = (0..7).map(|i| "x".repeat(i + 1)).collect();
        let batched = HistogramEmbedder.embed_batch(&texts, 3).unwrap();

        assert_eq!(batched.len(), 7);
        for (text, embedding) in texts.iter().zip(&batched) {
            assert_eq!(embedding, &HistogramEmbedder.embed(text).unwrap());
        }
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(HistogramEmbedder.embed("   ").is_err());

        let texts = vec!["ok".to_string(), String::new()];
        let err = HistogramEmbedder.embed_batch(&texts, 8).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }

    #[test]
    fn test_unsupported_model() {
        assert!(FastEmbedProvider::new("word2vec").is_err());
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_provider_creation() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        assert_eq!(provider.dimension(), 384);
        assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_deterministic_embedding() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        let text = "Seed-stage fintech pitch deck";

        let first = provider.embed(text).unwrap();
        let second = provider.embed(text).unwrap();
        assert_eq!(first.len(), 384);
        assert_eq!(first, second);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_semantic_similarity() {
        let provider = FastEmbedProvider::with_default_model().unwrap();

        let emb1 = provider.embed("Our startup raises a seed round.").unwrap();
        let emb2 = provider.embed("The company is fundraising from angel investors.").unwrap();
        let emb3 = provider.embed("Patent claims for a battery electrode.").unwrap();

        assert!(cosine_similarity(&emb1, &emb2) > cosine_similarity(&emb1, &emb3));
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (mag_a * mag_b)
    }
}
