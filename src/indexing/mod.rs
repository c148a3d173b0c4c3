//! Bulk indexing of per-category JSONL corpora into collections
//!
//! Each category maps to `<corpus_dir>/<category>.jsonl` and to its own
//! store. In parallel mode every worker thread owns one category end to end,
//! including its store handle; nothing mutable is shared between workers.

use crate::embedding::EmbeddingProvider;
use crate::error::{LaunchpadError, Result};
use crate::signals::InterruptFlag;
use crate::store::{DocumentChunk, Metadata, StoreError, VectorStore};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// One line of a corpus file
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusDocument {
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl CorpusDocument {
    fn into_chunk(self, category: &str, line: usize) -> DocumentChunk {
        DocumentChunk {
            chunk_id: self
                .chunk_id
                .unwrap_or_else(|| format!("{}-{}", category, line)),
            text: self.text,
            source: self.source,
            category: self.category.unwrap_or_else(|| category.to_string()),
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}

/// Result of indexing one category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub category: String,
    pub documents: usize,
    pub indexed: usize,
    /// Lines that could not be parsed or had no text
    pub skipped: usize,
    /// Documents whose embedding failed
    pub failed: usize,
    pub duration_ms: u64,
}

/// Opens the store a worker writes one category into
pub type StoreFactory<'a> =
    dyn Fn(&str) -> std::result::Result<Arc<dyn VectorStore>, StoreError> + Sync + 'a;

pub struct BulkIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    corpus_dir: PathBuf,
    batch_size: usize,
    max_workers: usize,
    interrupt: InterruptFlag,
}

impl BulkIndexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        corpus_dir: PathBuf,
        batch_size: usize,
        max_workers: usize,
    ) -> Self {
        Self {
            provider,
            corpus_dir,
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            interrupt: InterruptFlag::new(),
        }
    }

    /// Stop between batches once `interrupt` is raised
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn corpus_path(&self, category: &str) -> PathBuf {
        self.corpus_dir.join(format!("{}.jsonl", category))
    }

    /// Index every category, one worker per category when `parallel`
    ///
    /// All categories are attempted; the first failure is returned after
    /// the rest have finished.
    pub fn run(
        &self,
        categories: &[String],
        parallel: bool,
        open_store: &StoreFactory<'_>,
    ) -> Result<Vec<IndexReport>> {
        let results: Vec<Result<IndexReport>> = if parallel && categories.len() > 1 {
            info!(
                "Indexing {} categories with up to {} workers",
                categories.len(),
                self.max_workers
            );
            let mut results = Vec::with_capacity(categories.len());
            for group in categories.chunks(self.max_workers) {
                thread::scope(|scope| {
                    let handles: Vec<_> = group
                        .iter()
                        .map(|category| {
                            scope.spawn(move || self.index_with_factory(category, open_store))
                        })
                        .collect();
                    for (category, handle) in group.iter().zip(handles) {
                        results.push(handle.join().unwrap_or_else(|_| {
                            Err(LaunchpadError::Config(format!(
                                "Indexing worker for {} panicked",
                                category
                            )))
                        }));
                    }
                });
            }
            results
        } else {
            categories
                .iter()
                .map(|category| self.index_with_factory(category, open_store))
                .collect()
        };

        let mut reports = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (category, result) in categories.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(category = %category, "Indexing failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    fn index_with_factory(&self, category: &str, open_store: &StoreFactory<'_>) -> Result<IndexReport> {
        let store = open_store(category)?;
        self.index_category(category, store.as_ref())
    }

    /// Embed and add one category's corpus file, then flush the store
    pub fn index_category(&self, category: &str, store: &dyn VectorStore) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let path = self.corpus_path(category);
        let mut report = IndexReport {
            category: category.to_string(),
            ..IndexReport::default()
        };

        let chunks = read_corpus(&path, category, &mut report)?;
        info!(
            category = %category,
            documents = chunks.len(),
            "Indexing {}",
            path.display()
        );

        for batch in chunks.chunks(self.batch_size) {
            if self.interrupt.is_set() {
                warn!(category = %category, "Indexing interrupted");
                break;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.provider.embed_batch(&texts, self.batch_size) {
                Ok(vectors) => vectors,
                Err(e) => {
                    warn!(category = %category, "Failed to embed batch: {}", e);
                    report.failed += batch.len();
                    continue;
                }
            };

            let added = store.add(&vectors, batch)?;
            report.indexed += added;
            // rejected by the store inside an accepted batch
            report.failed += batch.len().saturating_sub(added);
            debug!(category = %category, "Indexed batch of {}", added);
        }

        store.flush()?;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            category = %category,
            "Indexing complete: {} indexed, {} failed, {} skipped, {}ms",
            report.indexed,
            report.failed,
            report.skipped,
            report.duration_ms
        );
        Ok(report)
    }
}

fn read_corpus(path: &Path, category: &str, report: &mut IndexReport) -> Result<Vec<DocumentChunk>> {
    let file = File::open(path).map_err(|e| LaunchpadError::Io {
        source: e,
        context: format!("Failed to open corpus file: {}", path.display()),
    })?;

    let mut chunks = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| LaunchpadError::Io {
            source: e,
            context: format!("Failed to read {}:{}", path.display(), line_no),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        report.documents += 1;

        match serde_json::from_str::<CorpusDocument>(&line) {
            Ok(doc) if doc.text.trim().is_empty() => {
                warn!("Skipping {}:{}: empty text", path.display(), line_no);
                report.skipped += 1;
            }
            Ok(doc) => chunks.push(doc.into_chunk(category, line_no)),
            Err(e) => {
                warn!("Skipping {}:{}: {}", path.display(), line_no, e);
                report.skipped += 1;
            }
        }
    }
    Ok(chunks)
}
