//! Table-by-table migration loop

use super::source::{parse_vector, validate_table, CorpusSource};
use super::{Checkpoint, CheckpointStore, MigrationError};
use crate::config::MigrationConfig;
use crate::signals::InterruptFlag;
use crate::store::{collection_for_table, BatchReport, StoreError, StoredObject, WeaviateClient};
use serde::Serialize;
use std::time::{Duration, Instant};

/// How many rejected objects per table are logged in full
const VERBOSE_ERRORS: usize = 5;

/// Destination of a migration
pub trait MigrationTarget {
    /// Create `collection` unless present; true when it was created
    fn ensure_collection(&self, collection: &str) -> Result<bool, StoreError>;

    fn insert_batch(
        &self,
        collection: &str,
        objects: &[StoredObject],
    ) -> Result<BatchReport, StoreError>;

    /// Authoritative object count
    fn count(&self, collection: &str) -> Result<u64, StoreError>;

    /// Objects per insert request
    fn batch_size(&self) -> usize;
}

impl MigrationTarget for WeaviateClient {
    fn ensure_collection(&self, collection: &str) -> Result<bool, StoreError> {
        WeaviateClient::ensure_collection(self, collection)
    }

    fn insert_batch(
        &self,
        collection: &str,
        objects: &[StoredObject],
    ) -> Result<BatchReport, StoreError> {
        self.insert_objects(collection, objects)
    }

    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        WeaviateClient::count(self, collection)
    }

    fn batch_size(&self) -> usize {
        WeaviateClient::batch_size(self)
    }
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub chunk_size: usize,
    /// Start from the table's checkpoint when one exists
    pub resume: bool,
    pub checkpoint_every_chunks: usize,
    pub checkpoint_interval: Duration,
    /// Pause before retrying a chunk the destination refused with 503
    pub unavailable_backoff: Duration,
    pub max_unavailable_retries: usize,
    /// Rejected objects tolerated per chunk before the rest of that chunk is dropped
    pub max_object_errors: usize,
    /// Wait before recounting after a verification shortfall
    pub verify_recheck: Duration,
    /// Rows whose vector has another length are skipped
    pub expected_dimension: Option<usize>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            resume: true,
            checkpoint_every_chunks: 10,
            checkpoint_interval: Duration::from_secs(300),
            unavailable_backoff: Duration::from_secs(30),
            max_unavailable_retries: 10,
            max_object_errors: 10,
            verify_recheck: Duration::from_secs(5),
            expected_dimension: None,
        }
    }
}

impl MigrationOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            resume: true,
            checkpoint_every_chunks: config.checkpoint_every_chunks,
            checkpoint_interval: Duration::from_secs(config.checkpoint_interval_secs),
            unavailable_backoff: Duration::from_secs(config.unavailable_backoff_secs),
            max_unavailable_retries: config.max_unavailable_retries,
            max_object_errors: config.max_object_errors,
            verify_recheck: Duration::from_secs(config.verify_recheck_secs),
            expected_dimension: None,
        }
    }
}

/// What happened to one table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub collection: String,
    /// Cursor position the run started from
    pub resumed_from: i64,
    pub last_id: i64,
    pub rows_read: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub destination_count: Option<u64>,
    pub verified: bool,
}

struct ChunkOutcome {
    inserted: usize,
    failed: usize,
}

pub struct Migrator<S, T> {
    source: S,
    target: T,
    checkpoints: CheckpointStore,
    options: MigrationOptions,
    interrupt: InterruptFlag,
}

impl<S: CorpusSource, T: MigrationTarget> Migrator<S, T> {
    pub fn new(
        source: S,
        target: T,
        checkpoints: CheckpointStore,
        options: MigrationOptions,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            source,
            target,
            checkpoints,
            options,
            interrupt,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Migrate `tables`, or every discovered `*_corpus` table when empty
    pub fn run(&mut self, tables: &[String]) -> Result<Vec<TableReport>, MigrationError> {
        let tables = if tables.is_empty() {
            let found = self.source.discover_tables()?;
            tracing::info!("Discovered {} corpus tables", found.len());
            found
        } else {
            tables.to_vec()
        };

        let mut reports = Vec::with_capacity(tables.len());
        for table in &tables {
            reports.push(self.migrate_table(table)?);
        }
        Ok(reports)
    }

    pub fn migrate_table(&mut self, table: &str) -> Result<TableReport, MigrationError> {
        validate_table(table)?;
        let collection = collection_for_table(table)?;

        // Inserts committed by earlier runs, up to the cursor
        let (start_id, committed_before) = match self.checkpoints.load(table)? {
            Some(checkpoint) if self.options.resume => {
                tracing::info!(table = %table, last_id = checkpoint.last_id, "Resuming from checkpoint");
                (checkpoint.last_id, checkpoint.inserted)
            }
            Some(_) => {
                self.checkpoints.clear(table)?;
                (0, 0)
            }
            None => (0, 0),
        };

        self.with_unavailable_retry(table, start_id, &collection, |target| {
            target.ensure_collection(&collection)
        })?;

        let mut report = TableReport {
            table: table.to_string(),
            collection: collection.clone(),
            resumed_from: start_id,
            last_id: start_id,
            ..TableReport::default()
        };
        tracing::info!(table = %table, collection = %collection, "Migrating table");

        let mut chunks_since_checkpoint = 0;
        let mut last_checkpoint_at = Instant::now();
        let chunk_size = self.options.chunk_size.max(1);

        loop {
            let committed = committed_before + report.inserted as u64;
            if self.interrupt.is_set() {
                return Err(self.interrupted(table, report.last_id, committed));
            }

            let rows = match self.source.fetch_after(table, report.last_id, chunk_size) {
                Ok(rows) => rows,
                Err(e) => {
                    self.preserve_checkpoint(table, report.last_id, committed);
                    return Err(e);
                }
            };
            let Some(chunk_last_id) = rows.last().map(|row| row.id) else {
                break;
            };

            let mut objects = Vec::with_capacity(rows.len());
            for row in &rows {
                report.rows_read += 1;
                let Some(raw) = row.embedding.as_deref() else {
                    tracing::warn!(table = %table, row_id = row.id, "Skipping row without a vector");
                    report.skipped += 1;
                    continue;
                };
                let vector = match parse_vector(raw) {
                    Ok(v) if v.is_empty() => {
                        tracing::warn!(table = %table, row_id = row.id, "Skipping row with an empty vector");
                        report.skipped += 1;
                        continue;
                    }
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(table = %table, row_id = row.id, "Skipping unparseable vector: {}", e);
                        report.skipped += 1;
                        continue;
                    }
                };
                if let Some(expected) = self.options.expected_dimension {
                    if vector.len() != expected {
                        tracing::warn!(
                            table = %table,
                            row_id = row.id,
                            "Skipping {}-dimensional vector, expected {}",
                            vector.len(),
                            expected
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
                objects.push(StoredObject::new(&collection, row.to_chunk(table), vector));
            }

            let outcome = match self.insert_chunk(table, &collection, report.last_id, &objects) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.preserve_checkpoint(table, report.last_id, committed);
                    return Err(e);
                }
            };
            report.inserted += outcome.inserted;
            report.failed += outcome.failed;
            report.last_id = chunk_last_id;
            chunks_since_checkpoint += 1;

            tracing::debug!(
                table = %table,
                last_id = report.last_id,
                inserted = report.inserted,
                "Chunk committed"
            );

            if chunks_since_checkpoint >= self.options.checkpoint_every_chunks.max(1)
                || last_checkpoint_at.elapsed() >= self.options.checkpoint_interval
            {
                let committed = committed_before + report.inserted as u64;
                self.checkpoints
                    .save(&Checkpoint::new(table, report.last_id).with_inserted(committed))?;
                tracing::info!(table = %table, last_id = report.last_id, "Checkpoint written");
                chunks_since_checkpoint = 0;
                last_checkpoint_at = Instant::now();
            }
        }

        if report.failed > VERBOSE_ERRORS {
            tracing::warn!(
                table = %table,
                "{} objects rejected in total ({} not logged)",
                report.failed,
                report.failed - VERBOSE_ERRORS
            );
        }

        self.verify(&mut report, committed_before);
        self.checkpoints.clear(table)?;

        tracing::info!(
            table = %table,
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            "Table migrated"
        );
        Ok(report)
    }

    /// Insert one chunk, retrying the whole chunk while the destination is unavailable
    ///
    /// Once more than `max_object_errors` objects are rejected the chunk's
    /// remaining batches are not sent; they count as failed and the cursor
    /// still moves past the chunk.
    fn insert_chunk(
        &self,
        table: &str,
        collection: &str,
        last_id: i64,
        objects: &[StoredObject],
    ) -> Result<ChunkOutcome, MigrationError> {
        self.with_unavailable_retry(table, last_id, collection, |target| {
            let mut outcome = ChunkOutcome {
                inserted: 0,
                failed: 0,
            };

            let mut sent = 0;
            for batch in objects.chunks(target.batch_size().max(1)) {
                let report = target.insert_batch(collection, batch)?;
                sent += batch.len();
                outcome.inserted += report.inserted;

                for error in &report.errors {
                    outcome.failed += 1;
                    if outcome.failed <= VERBOSE_ERRORS {
                        tracing::warn!(
                            collection = %collection,
                            chunk_id = %error.chunk_id,
                            "Object rejected: {}",
                            error.message
                        );
                    }
                }
                if outcome.failed > self.options.max_object_errors {
                    let dropped = objects.len() - sent;
                    tracing::warn!(
                        table = %table,
                        collection = %collection,
                        rejected = outcome.failed,
                        dropped,
                        "Too many rejected objects, aborting the rest of this chunk"
                    );
                    outcome.failed += dropped;
                    break;
                }
            }
            Ok(outcome)
        })
    }

    /// Run `op`, sleeping and retrying while the destination reports 503-class errors
    fn with_unavailable_retry<R>(
        &self,
        table: &str,
        last_id: i64,
        collection: &str,
        mut op: impl FnMut(&T) -> Result<R, StoreError>,
    ) -> Result<R, MigrationError> {
        let mut attempts = 0;
        loop {
            match op(&self.target) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unavailable() => {
                    attempts += 1;
                    if attempts > self.options.max_unavailable_retries {
                        return Err(MigrationError::RetriesExhausted {
                            collection: collection.to_string(),
                            attempts,
                            source: e,
                        });
                    }
                    tracing::warn!(
                        collection = %collection,
                        attempt = attempts,
                        "Destination unavailable, retrying in {:?}: {}",
                        self.options.unavailable_backoff,
                        e
                    );
                    if self.interrupt.sleep(self.options.unavailable_backoff) {
                        return Err(MigrationError::Interrupted {
                            table: table.to_string(),
                            last_id,
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Compare committed inserts with the destination's own count
    ///
    /// The expectation covers earlier runs only up to their checkpoint, so
    /// chunks re-sent after a crash are not counted twice. A shortfall gets
    /// one delayed recount; a remaining gap is logged and never fails the run.
    fn verify(&self, report: &mut TableReport, committed_before: u64) {
        let expected = committed_before + report.inserted as u64;
        let recount = || self.target.count(&report.collection);

        let mut count = match recount() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(collection = %report.collection, "Could not verify count: {}", e);
                return;
            }
        };

        if count < expected && !self.options.verify_recheck.is_zero() {
            tracing::info!(
                collection = %report.collection,
                "Count {} below expected {}, re-checking in {:?}",
                count,
                expected,
                self.options.verify_recheck
            );
            self.interrupt.sleep(self.options.verify_recheck);
            match recount() {
                Ok(c) => count = c,
                Err(e) => tracing::warn!(collection = %report.collection, "Recount failed: {}", e),
            }
        }

        report.destination_count = Some(count);
        report.verified = count >= expected;
        if report.verified {
            tracing::info!(collection = %report.collection, count, "Count verified");
        } else {
            tracing::warn!(
                collection = %report.collection,
                "Count mismatch: destination holds {}, expected at least {}",
                count,
                expected
            );
        }
    }

    fn interrupted(&self, table: &str, last_id: i64, committed: u64) -> MigrationError {
        self.preserve_checkpoint(table, last_id, committed);
        MigrationError::Interrupted {
            table: table.to_string(),
            last_id,
        }
    }

    /// Best-effort checkpoint on the way out of a failed or interrupted table
    fn preserve_checkpoint(&self, table: &str, last_id: i64, committed: u64) {
        if last_id <= 0 {
            return;
        }
        match self
            .checkpoints
            .save(&Checkpoint::new(table, last_id).with_inserted(committed))
        {
            Ok(()) => tracing::info!(table = %table, last_id, "Checkpoint preserved"),
            Err(e) => tracing::error!(table = %table, "Failed to preserve checkpoint: {}", e),
        }
    }
}
