//! Text embedding
//!
//! - `EmbeddingProvider` trait for abstraction
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - `RemoteEmbeddingProvider` for OpenAI-compatible embedding APIs
//! - `DeviceFallbackProvider` tries an accelerated backend and drops to CPU

mod fallback;
mod provider;
mod remote;

pub use fallback::DeviceFallbackProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use remote::RemoteEmbeddingProvider;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Compute device for local embedding models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerated only; falls back to CPU on any failure
    Gpu,
    /// Same as `Gpu`, named for configs that don't care
    Auto,
}

/// Build the embedding provider described by the configuration
///
/// Missing API keys for the remote backend are reported here rather than on
/// the first request.
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Remote => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                EmbeddingError::InitializationError(format!(
                    "Environment variable {} is not set",
                    config.api_key_env
                ))
            })?;
            let provider = RemoteEmbeddingProvider::new(
                &api_key,
                &config.api_base_url,
                &config.model,
                config.dimension,
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(provider))
        }
        EmbeddingBackend::Local => match config.device {
            Device::Cpu => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
            Device::Gpu | Device::Auto => {
                let model = config.model.clone();
                let cpu_model = config.model.clone();
                let provider = DeviceFallbackProvider::new(
                    move || {
                        FastEmbedProvider::with_device(&model, Device::Gpu)
                            .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>)
                    },
                    move || {
                        FastEmbedProvider::new(&cpu_model)
                            .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>)
                    },
                )?;
                Ok(Arc::new(provider))
            }
        },
    }
}
