use crate::config::{Config, EmbeddingBackend};
use crate::error::{LaunchpadError, Result, ValidationError};
use crate::store::StoreKind;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_migration(config, &mut errors);
        Self::validate_indexing(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LaunchpadError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.index_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.index_dir",
                "Index directory cannot be empty",
            ));
        }

        if config.storage.checkpoint_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.checkpoint_dir",
                "Checkpoint directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if embedding.backend == EmbeddingBackend::Remote && !is_http_url(&embedding.api_base_url)
        {
            errors.push(ValidationError::new(
                "embedding.api_base_url",
                format!("Must be an http(s) URL, got '{}'", embedding.api_base_url),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        for category in &config.retrieval.categories {
            let valid = !category.is_empty()
                && category
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                errors.push(ValidationError::new(
                    "retrieval.categories",
                    format!("Invalid category name: '{}'", category),
                ));
            }
        }

        match config.retrieval.store {
            StoreKind::Local => {}
            StoreKind::Weaviate => {
                if !is_http_url(&config.weaviate.url) {
                    errors.push(ValidationError::new(
                        "weaviate.url",
                        format!("Must be an http(s) URL, got '{}'", config.weaviate.url),
                    ));
                }
            }
            StoreKind::QueryAgent => {
                if !config.query_agent.enabled {
                    errors.push(ValidationError::new(
                        "query_agent.enabled",
                        "retrieval.store is query_agent but the query agent is disabled",
                    ));
                }
                if !is_http_url(&config.query_agent.url) {
                    errors.push(ValidationError::new(
                        "query_agent.url",
                        format!("Must be an http(s) URL, got '{}'", config.query_agent.url),
                    ));
                }
            }
        }

        if config.weaviate.batch_size == 0 {
            errors.push(ValidationError::new(
                "weaviate.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_migration(config: &Config, errors: &mut Vec<ValidationError>) {
        let migration = &config.migration;

        if migration.chunk_size == 0 {
            errors.push(ValidationError::new(
                "migration.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if migration.checkpoint_every_chunks == 0 {
            errors.push(ValidationError::new(
                "migration.checkpoint_every_chunks",
                "Checkpoint frequency must be greater than 0",
            ));
        }

        if migration.database_url_env.is_empty() {
            errors.push(ValidationError::new(
                "migration.database_url_env",
                "Database URL environment variable name cannot be empty",
            ));
        }

        let schema_ok = !migration.schema.is_empty()
            && migration
                .schema
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !schema_ok {
            errors.push(ValidationError::new(
                "migration.schema",
                format!("Invalid schema name: '{}'", migration.schema),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.max_workers == 0 {
            errors.push(ValidationError::new(
                "indexing.max_workers",
                "Worker count must be greater than 0",
            ));
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_dimension() {
        let mut config = Config::default();
        config.embedding.dimension = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_weaviate_requires_url() {
        let mut config = Config::default();
        config.retrieval.store = StoreKind::Weaviate;
        config.weaviate.url = String::new();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_query_agent_must_be_enabled() {
        let mut config = Config::default();
        config.retrieval.store = StoreKind::QueryAgent;
        assert!(ConfigValidator::validate(&config).is_err());

        config.query_agent.enabled = true;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.migration.chunk_size = 0;
        config.indexing.max_workers = 0;
        config.retrieval.categories.push("Bad Name".to_string());

        match ConfigValidator::validate(&config) {
            Err(LaunchpadError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}
