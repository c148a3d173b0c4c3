//! Exact (flat) L2 index with a parallel metadata list, persisted per category

use super::{
    accepted_records, similarity_from_l2, DocumentChunk, MetadataFilter, SearchHit, StoreError,
    StoreKind, VectorStore,
};
use ndarray::{Array2, ArrayView1};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const MAGIC: &[u8; 4] = b"LPFI";
const FORMAT_VERSION: u32 = 1;
// magic + version + dimension + rows + blake3 digest of the metadata file
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 32;

/// Row `i` of `vectors` always belongs to `records[i]`
struct FlatIndex {
    vectors: Array2<f32>,
    records: Vec<DocumentChunk>,
}

impl FlatIndex {
    fn empty(dimension: usize) -> Self {
        Self {
            vectors: Array2::zeros((0, dimension)),
            records: Vec::new(),
        }
    }
}

/// Single-process, single-writer local vector store
///
/// Files: `<dir>/<category>.vectors` (zstd-compressed header + f32 rows)
/// and `<dir>/<category>.meta.json`.
pub struct LocalVectorStore {
    category: String,
    dimension: usize,
    vectors_path: PathBuf,
    meta_path: PathBuf,
    index: RwLock<FlatIndex>,
}

impl LocalVectorStore {
    /// Open the store for `category`, restoring saved state when present
    pub fn open(dir: &Path, category: &str, dimension: usize) -> Result<Self, StoreError> {
        let store = Self {
            category: category.to_string(),
            dimension,
            vectors_path: dir.join(format!("{}.vectors", category)),
            meta_path: dir.join(format!("{}.meta.json", category)),
            index: RwLock::new(FlatIndex::empty(dimension)),
        };

        match (store.vectors_path.exists(), store.meta_path.exists()) {
            (false, false) => {
                tracing::debug!("No saved index for {}, starting empty", category);
            }
            (true, true) => {
                store.load()?;
                tracing::info!(
                    "Restored local index for {} ({} vectors)",
                    category,
                    store.len()
                );
            }
            (true, false) | (false, true) => {
                return Err(StoreError::Persistence {
                    path: dir.to_path_buf(),
                    message: format!(
                        "only one of {}.vectors / {}.meta.json exists",
                        category, category
                    ),
                });
            }
        }

        Ok(store)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write vectors and metadata to disk
    pub fn save(&self) -> Result<(), StoreError> {
        let index = self.index.read().map_err(|_| self.poisoned())?;

        let meta_bytes = serde_json::to_vec(&index.records).map_err(|e| StoreError::Persistence {
            path: self.meta_path.clone(),
            message: e.to_string(),
        })?;
        let digest = blake3::hash(&meta_bytes);

        let rows = index.records.len();
        let mut raw = Vec::with_capacity(HEADER_LEN + rows * self.dimension * 4);
        raw.extend_from_slice(MAGIC);
        raw.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        raw.extend_from_slice(&(rows as u64).to_le_bytes());
        raw.extend_from_slice(digest.as_bytes());
        for value in index.vectors.iter() {
            raw.extend_from_slice(&value.to_le_bytes());
        }

        let compressed = zstd::encode_all(&raw[..], 3).map_err(|e| StoreError::Io {
            source: e,
            context: "Failed to compress vector file".to_string(),
        })?;

        if let Some(parent) = self.vectors_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                source: e,
                context: format!("Failed to create index directory: {}", parent.display()),
            })?;
        }

        write_atomic(&self.meta_path, &meta_bytes)?;
        write_atomic(&self.vectors_path, &compressed)?;

        tracing::debug!("Saved local index for {} ({} vectors)", self.category, rows);
        Ok(())
    }

    /// Replace in-memory state with what is on disk
    pub fn load(&self) -> Result<(), StoreError> {
        let compressed = fs::read(&self.vectors_path).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to read {}", self.vectors_path.display()),
        })?;
        let raw = zstd::decode_all(&compressed[..]).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to decompress {}", self.vectors_path.display()),
        })?;

        let header = Header::parse(&raw).map_err(|message| self.corrupt(&self.vectors_path, message))?;
        if header.dimension != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: header.dimension,
            });
        }

        let body = &raw[HEADER_LEN..];
        let body_len = header
            .rows
            .checked_mul(header.dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                self.corrupt(
                    &self.vectors_path,
                    format!("implausible row count {}", header.rows),
                )
            })?;
        if body.len() != body_len {
            return Err(self.corrupt(
                &self.vectors_path,
                format!("expected {} rows, file is truncated", header.rows),
            ));
        }

        let meta_bytes = fs::read(&self.meta_path).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to read {}", self.meta_path.display()),
        })?;
        if blake3::hash(&meta_bytes).as_bytes() != &header.digest {
            return Err(self.corrupt(
                &self.meta_path,
                "metadata does not belong to this vector file".to_string(),
            ));
        }

        let records: Vec<DocumentChunk> =
            serde_json::from_slice(&meta_bytes).map_err(|e| self.corrupt(&self.meta_path, e.to_string()))?;
        if records.len() != header.rows {
            return Err(self.corrupt(
                &self.meta_path,
                format!("{} records for {} vectors", records.len(), header.rows),
            ));
        }

        let values: Vec<f32> = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let vectors = Array2::from_shape_vec((header.rows, header.dimension), values)
            .map_err(|e| self.corrupt(&self.vectors_path, e.to_string()))?;

        let mut index = self.index.write().map_err(|_| self.poisoned())?;
        *index = FlatIndex { vectors, records };
        Ok(())
    }

    fn corrupt(&self, path: &Path, message: String) -> StoreError {
        StoreError::Persistence {
            path: path.to_path_buf(),
            message,
        }
    }

    fn poisoned(&self) -> StoreError {
        StoreError::Persistence {
            path: self.vectors_path.clone(),
            message: "index lock poisoned".to_string(),
        }
    }
}

struct Header {
    dimension: usize,
    rows: usize,
    digest: [u8; 32],
}

impl Header {
    fn parse(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < HEADER_LEN || &raw[..4] != MAGIC {
            return Err("not a launchpad vector file".to_string());
        }
        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }
        let dimension = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize;
        let mut rows = [0u8; 8];
        rows.copy_from_slice(&raw[12..20]);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&raw[20..HEADER_LEN]);

        Ok(Self {
            dimension,
            rows: u64::from_le_bytes(rows) as usize,
            digest,
        })
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to create {}", temp_path.display()),
    })?;
    file.write_all(data).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to write {}", temp_path.display()),
    })?;
    file.sync_all().map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to sync {}", temp_path.display()),
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| StoreError::Io {
        source: e,
        context: format!(
            "Failed to rename {} -> {}",
            temp_path.display(),
            path.display()
        ),
    })
}

impl VectorStore for LocalVectorStore {
    fn add(&self, vectors: &[Vec<f32>], chunks: &[DocumentChunk]) -> Result<usize, StoreError> {
        let keep = accepted_records(self.dimension, vectors, chunks)?;

        let mut index = self.index.write().map_err(|_| self.poisoned())?;
        for &i in &keep {
            index
                .vectors
                .push_row(ArrayView1::from(&vectors[i][..]))
                .map_err(|_| StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vectors[i].len(),
                })?;
            index.records.push(chunks[i].clone());
        }

        Ok(keep.len())
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let index = self.index.read().map_err(|_| self.poisoned())?;
        if top_k == 0 || index.records.is_empty() {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(query);
        let mut distances: Vec<(usize, f32)> = index
            .vectors
            .outer_iter()
            .enumerate()
            .map(|(i, row)| {
                let diff = &row - &query;
                (i, diff.dot(&diff))
            })
            .collect();
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));

        let hits = distances
            .into_iter()
            .map(|(i, distance)| {
                let record = &index.records[i];
                SearchHit {
                    id: record.chunk_id.clone(),
                    content: record.text.clone(),
                    source: record.source.clone(),
                    category: record.category.clone(),
                    metadata: record.metadata.clone(),
                    score: similarity_from_l2(distance),
                    distance,
                }
            })
            .filter(|hit| filter.map_or(true, |f| f.matches(hit)))
            .take(top_k)
            .collect();

        Ok(hits)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let index = self.index.read().map_err(|_| self.poisoned())?;
        Ok(index.records.len() as u64)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.save()
    }
}
