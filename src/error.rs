use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::migration::MigrationError;
use crate::retrieval::RetrievalError;
use crate::store::StoreError;

/// Main error type for Launchpad
#[derive(Error, Debug)]
pub enum LaunchpadError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LaunchpadError {
    /// True when the run stopped because of SIGINT/SIGTERM
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            LaunchpadError::Migration(MigrationError::Interrupted { .. })
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Launchpad operations
pub type Result<T> = std::result::Result<T, LaunchpadError>;
