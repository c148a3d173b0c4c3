//! Relational corpus tables, read with a keyset cursor

use super::MigrationError;
use crate::store::{DocumentChunk, Metadata};
use regex::Regex;
use std::sync::OnceLock;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, NoTls};

fn table_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*_corpus$").ok())
        .as_ref()
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").ok())
        .as_ref()
}

/// Table names end up in SQL text, so only plain `*_corpus` identifiers pass
pub fn validate_table(table: &str) -> Result<(), MigrationError> {
    if table_pattern().is_some_and(|p| p.is_match(table)) {
        Ok(())
    } else {
        Err(MigrationError::InvalidTable(table.to_string()))
    }
}

/// One raw corpus row as stored in the relational source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub id: i64,
    pub chunk_id: String,
    pub text: String,
    /// pgvector text form, e.g. `[0.1,0.2,0.3]`
    pub embedding: Option<String>,
    /// JSON object text
    pub metadata: Option<String>,
    pub created_at: Option<String>,
}

impl SourceRow {
    /// Chunk destined for the `table`'s collection
    pub fn to_chunk(&self, table: &str) -> DocumentChunk {
        let category = table.strip_suffix("_corpus").unwrap_or(table).to_string();
        let metadata = match self.metadata.as_deref() {
            Some(raw) => parse_metadata(raw).unwrap_or_else(|e| {
                tracing::warn!(row_id = self.id, "Unreadable metadata, storing none: {}", e);
                Metadata::new()
            }),
            None => Metadata::new(),
        };
        let source = metadata
            .get("source")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(table)
            .to_string();
        let chunk_id = if self.chunk_id.is_empty() {
            format!("{}-{}", table, self.id)
        } else {
            self.chunk_id.clone()
        };

        DocumentChunk {
            chunk_id,
            text: self.text.clone(),
            source,
            category,
            metadata,
            created_at: self.created_at.clone(),
        }
    }
}

/// Parse a stored vector: bracketed, comma separated floats
///
/// `[]` parses to an empty vector; callers decide what to do with it.
pub fn parse_vector(raw: &str) -> Result<Vec<f32>, String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("not a bracketed vector: {:.40}", trimmed))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .enumerate()
        .map(|(i, part)| {
            let value: f32 = part
                .trim()
                .parse()
                .map_err(|_| format!("component {} is not a number: '{}'", i, part.trim()))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(format!("component {} is not finite", i))
            }
        })
        .collect()
}

/// Parse stored metadata JSON; `null` and blank text are empty metadata
pub fn parse_metadata(raw: &str) -> Result<Metadata, String> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(serde_json::Value::Null) => Ok(Metadata::new()),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

/// Paged, read-only access to corpus tables
pub trait CorpusSource {
    /// All migratable tables, in a stable order
    fn discover_tables(&mut self) -> Result<Vec<String>, MigrationError>;

    /// Up to `limit` rows with `id > after_id`, ascending by id
    fn fetch_after(
        &mut self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<SourceRow>, MigrationError>;
}

/// PostgreSQL source driven synchronously through a private runtime
pub struct PostgresSource {
    runtime: Runtime,
    client: Client,
    schema: String,
}

impl PostgresSource {
    pub fn connect(database_url: &str, schema: &str) -> Result<Self, MigrationError> {
        if !identifier_pattern().is_some_and(|p| p.is_match(schema)) {
            return Err(MigrationError::Source(format!("invalid schema name '{}'", schema)));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MigrationError::Io {
                source: e,
                context: "Failed to build database runtime".to_string(),
            })?;

        let (client, connection) = runtime.block_on(tokio_postgres::connect(database_url, NoTls))?;
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        tracing::info!(schema = %schema, "Connected to PostgreSQL");
        Ok(Self {
            runtime,
            client,
            schema: schema.to_string(),
        })
    }

    /// Connect using the URL held in environment variable `env`
    pub fn from_env(env: &str, schema: &str) -> Result<Self, MigrationError> {
        let url = std::env::var(env).map_err(|_| {
            MigrationError::Source(format!("Environment variable {} is not set", env))
        })?;
        Self::connect(&url, schema)
    }
}

impl CorpusSource for PostgresSource {
    fn discover_tables(&mut self) -> Result<Vec<String>, MigrationError> {
        let rows = self.runtime.block_on(self.client.query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             AND table_name LIKE '%\\_corpus' ORDER BY table_name",
            &[&self.schema],
        ))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            if validate_table(&name).is_ok() {
                tables.push(name);
            } else {
                tracing::warn!("Ignoring table with unsupported name: {}", name);
            }
        }
        Ok(tables)
    }

    fn fetch_after(
        &mut self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<SourceRow>, MigrationError> {
        validate_table(table)?;
        let sql = format!(
            "SELECT id::bigint, chunk_id::text, text::text, embedding::text, \
             metadata::text, created_at::text \
             FROM {}.{} WHERE id > $1 ORDER BY id LIMIT $2",
            self.schema, table
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .runtime
            .block_on(self.client.query(sql.as_str(), &[&after_id, &limit]))?;

        rows.into_iter()
            .map(|row| {
                Ok(SourceRow {
                    id: row.try_get(0)?,
                    chunk_id: row.try_get::<_, Option<String>>(1)?.unwrap_or_default(),
                    text: row.try_get::<_, Option<String>>(2)?.unwrap_or_default(),
                    embedding: row.try_get(3)?,
                    metadata: row.try_get(4)?,
                    created_at: row.try_get(5)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("[0.1, 0.2,0.3]").unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(parse_vector(" [1,-2e-1] ").unwrap(), vec![1.0, -0.2]);
        assert!(parse_vector("[]").unwrap().is_empty());
        assert!(parse_vector("[ ]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_vector_rejects_garbage() {
        assert!(parse_vector("0.1,0.2").is_err());
        assert!(parse_vector("[0.1,abc]").is_err());
        assert!(parse_vector("[0.1,,0.2]").is_err());
        assert!(parse_vector("[NaN]").is_err());
        assert!(parse_vector("").is_err());
    }

    #[test]
    fn test_parse_metadata() {
        let map = parse_metadata(r#"{"source": "deck", "page": 3}"#).unwrap();
        assert_eq!(map["page"], 3);
        assert!(parse_metadata("null").unwrap().is_empty());
        assert!(parse_metadata("  ").unwrap().is_empty());
        assert!(parse_metadata("[1,2]").is_err());
        assert!(parse_metadata("{oops").is_err());
    }

    #[test]
    fn test_table_validation() {
        assert!(validate_table("pitch_corpus").is_ok());
        assert!(validate_table("go_to_market_corpus").is_ok());
        assert!(validate_table("corpus").is_err());
        assert!(validate_table("pitch_corpus; DROP TABLE x").is_err());
        assert!(validate_table("Pitch_corpus").is_err());
    }

    #[test]
    fn test_row_to_chunk() {
        let row = SourceRow {
            id: 7,
            chunk_id: "p-7".to_string(),
            text: "Lead with the problem".to_string(),
            embedding: Some("[0.5]".to_string()),
            metadata: Some(r#"{"source": "yc-library", "slide": 1}"#.to_string()),
            created_at: Some("2024-03-01 10:00:00".to_string()),
        };
        let chunk = row.to_chunk("pitch_corpus");
        assert_eq!(chunk.category, "pitch");
        assert_eq!(chunk.source, "yc-library");
        assert_eq!(chunk.metadata["slide"], 1);

        let bare = SourceRow {
            chunk_id: String::new(),
            metadata: Some("not json".to_string()),
            ..row
        };
        let chunk = bare.to_chunk("pitch_corpus");
        assert_eq!(chunk.chunk_id, "pitch_corpus-7");
        assert_eq!(chunk.source, "pitch_corpus");
        assert!(chunk.metadata.is_empty());
    }

    #[test]
    #[ignore] // Requires a PostgreSQL instance in LAUNCHPAD_TEST_DATABASE_URL
    fn test_postgres_discovery() {
        let mut source = PostgresSource::from_env("LAUNCHPAD_TEST_DATABASE_URL", "public").unwrap();
        let tables = source.discover_tables().unwrap();
        assert!(tables.iter().all(|t| t.ends_with("_corpus")));
    }
}
