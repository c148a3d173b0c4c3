//! Equality filters over chunk metadata

use super::SearchHit;
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys matched against the hit itself rather than its metadata
const FIELD_KEYS: [&str; 3] = ["chunk_id", "source", "category"];

/// Flat `key == value` filter; every entry must match
///
/// `chunk_id`, `source` and `category` match the hit's own fields, any other
/// key is looked up in the chunk metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Parse `key=value`
    ///
    /// Values for the chunk's own text fields stay strings; any other value is
    /// read as JSON when it parses, as a plain string otherwise.
    pub fn parse_pair(pair: &str) -> Result<(String, Value), String> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in '{}'", pair));
        }
        let value = if FIELD_KEYS.contains(&key) {
            Value::String(raw.to_string())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Ok((key.to_string(), value))
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut filter = Self::new();
        for pair in pairs {
            let (key, value) = Self::parse_pair(pair)?;
            filter.conditions.insert(key, value);
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn matches(&self, hit: &SearchHit) -> bool {
        self.conditions.iter().all(|(key, expected)| match key.as_str() {
            "chunk_id" => expected.as_str() == Some(hit.id.as_str()),
            "source" => expected.as_str() == Some(hit.source.as_str()),
            "category" => expected.as_str() == Some(hit.category.as_str()),
            _ => hit.metadata.get(key) == Some(expected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metadata;
    use serde_json::json;

    fn hit(source: &str, stage: &str) -> SearchHit {
        let mut metadata = Metadata::new();
        metadata.insert("stage".to_string(), json!(stage));
        metadata.insert("year".to_string(), json!(2023));
        SearchHit {
            id: "1".to_string(),
            content: "text".to_string(),
            source: source.to_string(),
            category: "pitch".to_string(),
            metadata,
            score: 1.0,
            distance: 0.0,
        }
    }

    #[test]
    fn test_matches_fields_and_metadata() {
        let filter = MetadataFilter::new()
            .with("source", "yc")
            .with("stage", "seed");

        assert!(filter.matches(&hit("yc", "seed")));
        assert!(!filter.matches(&hit("a16z", "seed")));
        assert!(!filter.matches(&hit("yc", "series_a")));
        assert!(MetadataFilter::new().matches(&hit("any", "any")));
    }

    #[test]
    fn test_chunk_id_matches_hit_id() {
        let mut numbered = hit("123", "seed");
        numbered.id = "c-9".to_string();

        assert!(MetadataFilter::new().with("chunk_id", "c-9").matches(&numbered));
        assert!(!MetadataFilter::new().with("chunk_id", "c-8").matches(&numbered));

        let filter = MetadataFilter::from_pairs(["source=123", "chunk_id=c-9"]).unwrap();
        assert!(filter.matches(&numbered));
    }

    #[test]
    fn test_parse_pairs() {
        let filter = MetadataFilter::from_pairs(["year=2023", "category=pitch"]).unwrap();
        assert!(filter.matches(&hit("yc", "seed")));

        let (key, value) = MetadataFilter::parse_pair("stage=pre seed").unwrap();
        assert_eq!(key, "stage");
        assert_eq!(value, json!("pre seed"));

        // field values never turn into numbers
        let (_, value) = MetadataFilter::parse_pair("source=123").unwrap();
        assert_eq!(value, json!("123"));
        let (_, value) = MetadataFilter::parse_pair("chunk_id=42").unwrap();
        assert_eq!(value, json!("42"));

        assert!(MetadataFilter::parse_pair("no_equals").is_err());
        assert!(MetadataFilter::parse_pair("=x").is_err());
    }
}
