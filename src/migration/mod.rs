//! PostgreSQL -> Weaviate corpus migration
//!
//! Per table: create the target collection, then page through rows with a
//! keyset cursor (`id > last_id`), insert each page, advance the cursor and
//! checkpoint it. After the last page the destination count is verified and
//! the checkpoint removed.

mod checkpoint;
mod migrator;
mod source;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use migrator::{MigrationOptions, MigrationTarget, Migrator, TableReport};
pub use source::{
    parse_metadata, parse_vector, validate_table, CorpusSource, PostgresSource, SourceRow,
};

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Invalid source table name: {0}")]
    InvalidTable(String),

    #[error("Checkpoint error at {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{collection} still unavailable after {attempts} attempts: {source}")]
    RetriesExhausted {
        collection: String,
        attempts: usize,
        #[source]
        source: StoreError,
    },

    #[error("Migration of {table} interrupted; resume from id {last_id}")]
    Interrupted { table: String, last_id: i64 },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Source error: {0}")]
    Source(String),
}
