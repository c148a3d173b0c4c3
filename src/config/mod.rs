//! Configuration management for Launchpad
//!
//! Handles loading, validation, profiles and environment overrides for the
//! retrieval core, the bulk indexer and the corpus migration.

use crate::embedding::Device;
use crate::error::{LaunchpadError, Result};
use crate::store::StoreKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub weaviate: WeaviateConfig,
    pub query_agent: QueryAgentConfig,
    pub retrieval: RetrievalConfig,
    pub migration: MigrationConfig,
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Local flat index files, one pair per category
    pub index_dir: PathBuf,
    /// Migration checkpoint files, one per source table
    pub checkpoint_dir: PathBuf,
}

/// Which embedding implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Model loaded in-process through fastembed
    Local,
    /// OpenAI-compatible `/embeddings` endpoint
    Remote,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub device: Device,
    pub api_base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

/// Remote vector database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaviateConfig {
    pub url: String,
    /// Optional; anonymous access when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl WeaviateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Managed retrieval/answer service layered over Weaviate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAgentConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

/// Agent-facing retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub store: StoreKind,
    pub top_k: usize,
    /// Agent categories that own a collection
    pub categories: Vec<String>,
}

/// PostgreSQL -> Weaviate migration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub database_url_env: String,
    pub schema: String,
    pub chunk_size: usize,
    pub checkpoint_every_chunks: usize,
    pub checkpoint_interval_secs: u64,
    pub unavailable_backoff_secs: u64,
    pub max_unavailable_retries: usize,
    pub max_object_errors: usize,
    pub verify_recheck_secs: u64,
}

/// Bulk indexing of JSONL corpora
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub corpus_dir: PathBuf,
    pub parallel: bool,
    pub max_workers: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_backend: Option<EmbeddingBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_device: Option<Device>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LaunchpadError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LaunchpadError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LaunchpadError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LaunchpadError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(store) = overrides.store {
            self.retrieval.store = store;
        }
        if let Some(backend) = overrides.embedding_backend {
            self.embedding.backend = backend;
        }
        if let Some(device) = overrides.embedding_device {
            self.embedding.device = device;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LAUNCHPAD_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LAUNCHPAD_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "WEAVIATE__URL" => {
                self.weaviate.url = value.to_string();
            }
            "QUERY_AGENT__URL" => {
                self.query_agent.url = value.to_string();
            }
            "QUERY_AGENT__ENABLED" => {
                self.query_agent.enabled = parse_env(path, value)?;
            }
            "RETRIEVAL__STORE" => {
                self.retrieval.store = parse_enum(path, value)?;
            }
            "RETRIEVAL__TOP_K" => {
                self.retrieval.top_k = parse_env(path, value)?;
            }
            "EMBEDDING__BACKEND" => {
                self.embedding.backend = parse_enum(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DEVICE" => {
                self.embedding.device = parse_enum(path, value)?;
            }
            "MIGRATION__CHUNK_SIZE" => {
                self.migration.chunk_size = parse_env(path, value)?;
            }
            "STORAGE__CHECKPOINT_DIR" => {
                self.storage.checkpoint_dir = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            LaunchpadError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("launchpad").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| LaunchpadError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".launchpad"))
    }

    /// Resolve `~/` in a configured path
    pub fn expand_path(path: &Path) -> Result<PathBuf> {
        let path_str = path
            .to_str()
            .ok_or_else(|| LaunchpadError::Config("Invalid path encoding".to_string()))?;

        if let Some(stripped) = path_str.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| {
                LaunchpadError::Config("Cannot determine home directory".to_string())
            })?;
            Ok(home.join(stripped))
        } else {
            Ok(path.to_path_buf())
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| LaunchpadError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a lowercase enum value the same way the TOML file spells it
fn parse_enum<T: serde::de::DeserializeOwned>(path: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase())).map_err(|e| {
        LaunchpadError::InvalidConfigValue {
            path: path.to_string(),
            message: e.to_string(),
        }
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.launchpad");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                index_dir: data_dir.join("indexes"),
                checkpoint_dir: data_dir.join("checkpoints"),
            },
            embedding: EmbeddingConfig {
                backend: EmbeddingBackend::Local,
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
                device: Device::Cpu,
                api_base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                timeout_secs: 30,
            },
            weaviate: WeaviateConfig {
                url: "http://localhost:8080".to_string(),
                api_key_env: None,
                timeout_secs: 60,
                batch_size: 100,
            },
            query_agent: QueryAgentConfig {
                enabled: false,
                url: "https://api.agents.weaviate.io/v1".to_string(),
                api_key_env: "WEAVIATE_API_KEY".to_string(),
                timeout_secs: 60,
            },
            retrieval: RetrievalConfig {
                store: StoreKind::Local,
                top_k: 5,
                categories: ["pitch", "marketing", "patent", "policy", "team", "competitive"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            },
            migration: MigrationConfig {
                database_url_env: "DATABASE_URL".to_string(),
                schema: "public".to_string(),
                chunk_size: 1000,
                checkpoint_every_chunks: 10,
                checkpoint_interval_secs: 300,
                unavailable_backoff_secs: 30,
                max_unavailable_retries: 10,
                max_object_errors: 10,
                verify_recheck_secs: 5,
            },
            indexing: IndexingConfig {
                corpus_dir: data_dir.join("corpus"),
                parallel: false,
                max_workers: 4,
            },
            profiles: HashMap::new(),
        }
    }
}
