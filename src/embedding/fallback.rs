//! Accelerated-first embedding with transparent CPU fallback

use super::{EmbeddingError, EmbeddingProvider};
use std::sync::{Arc, RwLock};

type ProviderFactory =
    Box<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync>;

/// Wraps an accelerated provider and a lazily built CPU provider
///
/// If the accelerated provider fails to initialize, or any later call on it
/// fails, it is dropped for the rest of the process and the CPU provider
/// serves the request instead.
pub struct DeviceFallbackProvider {
    accelerated: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
    cpu: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
    cpu_factory: ProviderFactory,
    model_name: String,
    dimension: usize,
}

impl DeviceFallbackProvider {
    pub fn new<A, C>(accelerated: A, cpu_factory: C) -> Result<Self, EmbeddingError>
    where
        A: FnOnce() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError>,
        C: Fn() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync + 'static,
    {
        match accelerated() {
            Ok(provider) => {
                tracing::info!("Using accelerated embedding backend");
                Ok(Self {
                    model_name: provider.model_name().to_string(),
                    dimension: provider.dimension(),
                    accelerated: RwLock::new(Some(provider)),
                    cpu: RwLock::new(None),
                    cpu_factory: Box::new(cpu_factory),
                })
            }
            Err(e) => {
                tracing::warn!("Accelerated embedding unavailable, falling back to CPU: {}", e);
                let cpu = cpu_factory()?;
                Ok(Self {
                    model_name: cpu.model_name().to_string(),
                    dimension: cpu.dimension(),
                    accelerated: RwLock::new(None),
                    cpu: RwLock::new(Some(cpu)),
                    cpu_factory: Box::new(cpu_factory),
                })
            }
        }
    }

    /// Whether calls still go to the accelerated backend
    pub fn is_accelerated(&self) -> bool {
        self.accelerated
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn cpu_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        if let Some(cpu) = self.cpu.read().map_err(lock_poisoned)?.as_ref() {
            return Ok(cpu.clone());
        }

        let mut guard = self.cpu.write().map_err(lock_poisoned)?;
        if let Some(cpu) = guard.as_ref() {
            return Ok(cpu.clone());
        }
        let cpu = (self.cpu_factory)()?;
        *guard = Some(cpu.clone());
        Ok(cpu)
    }
}

fn lock_poisoned<T>(_: T) -> EmbeddingError {
    EmbeddingError::GenerationError("embedding provider lock poisoned".to_string())
}

impl EmbeddingProvider for DeviceFallbackProvider {
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let accelerated = self.accelerated.read().map_err(lock_poisoned)?.clone();

        if let Some(provider) = accelerated {
            match provider.embed_chunk(texts) {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!("Accelerated embedding failed, switching to CPU: {}", e);
                    *self.accelerated.write().map_err(lock_poisoned)? = None;
                }
            }
        }

        self.cpu_provider()?.embed_chunk(texts)
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        value: f32,
        fail: bool,
    }

    impl EmbeddingProvider for Fixed {
        fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::GenerationError("device lost".to_string()));
            }
            Ok(texts.iter().map(|_| vec![self.value; 2]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn cpu() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        Ok(Arc::new(Fixed {
            value: 0.0,
            fail: false,
        }))
    }

    #[test]
    fn test_init_failure_falls_back() {
        let provider = DeviceFallbackProvider::new(
            || Err(EmbeddingError::InitializationError("no cuda".to_string())),
            cpu,
        )
        .unwrap();

        assert!(!provider.is_accelerated());
        assert_eq!(provider.embed("hello").unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_runtime_failure_falls_back_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let provider = DeviceFallbackProvider::new(
            || {
                Ok(Arc::new(Fixed {
                    value: 1.0,
                    fail: true,
                }) as Arc<dyn EmbeddingProvider>)
            },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                cpu()
            },
        )
        .unwrap();

        assert!(provider.is_accelerated());
        assert_eq!(provider.embed("a").unwrap(), vec![0.0, 0.0]);
        assert!(!provider.is_accelerated());
        assert_eq!(provider.embed("b").unwrap(), vec![0.0, 0.0]);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_healthy_accelerated_path() {
        let provider = DeviceFallbackProvider::new(
            || {
                Ok(Arc::new(Fixed {
                    value: 1.0,
                    fail: false,
                }) as Arc<dyn EmbeddingProvider>)
            },
            cpu,
        )
        .unwrap();

        assert_eq!(provider.embed("a").unwrap(), vec![1.0, 1.0]);
        assert!(provider.is_accelerated());
    }
}
