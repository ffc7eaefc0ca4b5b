
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

use super::StoreError;
use crate::embeddings::normalized;

/// Validated store identifier, the only source of table and index names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StoreName(String);

impl StoreName {
    /// Leaves room for the longest derived index name within Postgres' 63 byte limit
    pub const MAX_LEN: usize = 40;

    #[inline]
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        if Self::is_valid(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidStoreName(name.to_string()))
        }
    }

    #[inline]
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        name.len() <= Self::MAX_LEN
            && first.is_ascii_lowercase()
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn table_name(&self) -> String {
        format!("embeddings_{}", self.0)
    }

    #[inline]
    pub fn hnsw_index_name(&self) -> String {
        format!("hnsw_idx_{}", self.0)
    }

    #[inline]
    pub fn filename_index_name(&self) -> String {
        format!("idx_{}_metadata_filename", self.0)
    }

    #[inline]
    pub fn content_text_index_name(&self) -> String {
        format!("idx_{}_content_text", self.0)
    }

    #[inline]
    pub fn unique_index_name(&self) -> String {
        format!("idx_{}_unique_content", self.0)
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StoreName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StoreName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Record metadata: `filename` and `line_number` drive dedup and context windows,
/// anything else is carried through untouched in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordMetadata {
    #[inline]
    pub fn for_line(filename: impl Into<String>, line_number: i64) -> Self {
        Self {
            filename: Some(filename.into()),
            line_number: Some(line_number),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    #[inline]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Non-empty source filename, if any
    #[inline]
    pub fn source_filename(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }

    /// 1-based line position, if present and positive
    #[inline]
    pub fn source_line(&self) -> Option<i64> {
        self.line_number.filter(|line| *line > 0)
    }

    /// Decode a stored JSON document; non-object documents become empty metadata
    #[inline]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from(map),
            _ => Self::default(),
        }
    }
}

/// Known keys are decoded one by one; a value of an unexpected type stays in
/// `extra` under its original key
impl From<Map<String, Value>> for RecordMetadata {
    #[inline]
    fn from(mut map: Map<String, Value>) -> Self {
        let filename = take_string(&mut map, "filename");
        let line_number = take_line_number(&mut map);
        let document_type = take_string(&mut map, "document_type");
        let kind = take_string(&mut map, "type");
        Self {
            filename,
            line_number,
            document_type,
            kind,
            extra: map,
        }
    }
}

impl<'de> Deserialize<'de> for RecordMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Self::from)
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => {
            map.insert(key.to_string(), other);
            None
        }
    }
}

fn take_line_number(map: &mut Map<String, Value>) -> Option<i64> {
    let value = map.remove("line_number")?;
    let parsed = match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() && !value.is_null() {
        map.insert("line_number".to_string(), value);
    }
    parsed
}

/// A unit of ingestion: one embedded piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl EmbeddingRecord {
    #[inline]
    pub fn new(content: impl Into<String>, embedding: Vec<f32>, metadata: RecordMetadata) -> Self {
        Self {
            content: content.into(),
            embedding,
            metadata,
        }
    }

    #[inline]
    pub fn validate(&self, dimension: usize) -> Result<(), StoreError> {
        if self.content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        validate_vector(&self.embedding, dimension)
    }

    /// pgvector literal of the unit-length embedding
    #[inline]
    pub fn vector_literal(&self) -> String {
        vector_literal(&normalized(&self.embedding))
    }
}

pub(crate) fn validate_vector(vector: &[f32], dimension: usize) -> Result<(), StoreError> {
    if vector.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::NonFiniteVector);
    }
    Ok(())
}

/// pgvector text representation, e.g. `[0.1,0.2,0.3]`
#[inline]
pub fn vector_literal(vector: &[f32]) -> String {
    format!("[{}]", vector.iter().join(","))
}

/// A row as read back from a store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub content: String,
    pub metadata: RecordMetadata,
}

/// A stored row together with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: StoredRecord,
    pub similarity: f64,
}
