//! Per-table resume markers

use super::MigrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Last source id whose chunk was fully handed to the destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub table: String,
    pub last_id: i64,
    /// Objects committed for this table up to `last_id`, across runs
    #[serde(default)]
    pub inserted: u64,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(table: impl Into<String>, last_id: i64) -> Self {
        Self {
            table: table.into(),
            last_id,
            inserted: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_inserted(mut self, inserted: u64) -> Self {
        self.inserted = inserted;
        self
    }
}

/// One JSON file per source table under a directory
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf) -> Result<Self, MigrationError> {
        fs::create_dir_all(&dir).map_err(|e| MigrationError::Io {
            source: e,
            context: format!("Failed to create checkpoint directory: {}", dir.display()),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", table))
    }

    pub fn load(&self, table: &str) -> Result<Option<Checkpoint>, MigrationError> {
        let path = self.path(table);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| MigrationError::Io {
            source: e,
            context: format!("Failed to read checkpoint: {}", path.display()),
        })?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| MigrationError::Checkpoint {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if checkpoint.table != table {
            return Err(MigrationError::Checkpoint {
                path,
                message: format!("file belongs to table {}", checkpoint.table),
            });
        }
        Ok(Some(checkpoint))
    }

    /// Persist atomically; refuses to move a table's cursor backwards
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), MigrationError> {
        if let Some(existing) = self.load(&checkpoint.table)? {
            if existing.last_id > checkpoint.last_id {
                return Err(MigrationError::Checkpoint {
                    path: self.path(&checkpoint.table),
                    message: format!(
                        "refusing to rewind from {} to {}",
                        existing.last_id, checkpoint.last_id
                    ),
                });
            }
        }

        let path = self.path(&checkpoint.table);
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(checkpoint).map_err(|e| {
            MigrationError::Checkpoint {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;

        let mut file = fs::File::create(&temp_path).map_err(|e| MigrationError::Io {
            source: e,
            context: format!("Failed to create {}", temp_path.display()),
        })?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| MigrationError::Io {
                source: e,
                context: format!("Failed to write {}", temp_path.display()),
            })?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| MigrationError::Io {
            source: e,
            context: format!("Failed to move checkpoint into place: {}", path.display()),
        })?;

        tracing::debug!(table = %checkpoint.table, last_id = checkpoint.last_id, "Checkpoint saved");
        Ok(())
    }

    pub fn clear(&self, table: &str) -> Result<(), MigrationError> {
        let path = self.path(table);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| MigrationError::Io {
                source: e,
                context: format!("Failed to remove checkpoint: {}", path.display()),
            })?;
        }
        Ok(())
    }
}
