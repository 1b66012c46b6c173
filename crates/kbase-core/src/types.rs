//! Domain types shared by the loader, the stores and the pipelines.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type ChunkId = String;

/// Metadata key that every stored chunk carries.
pub const SOURCE_FILE: &str = "source_file";

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self { Self::Str(s.to_string()) }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<u32> for MetaValue {
    fn from(i: u32) -> Self { Self::Int(i64::from(i)) }
}

impl From<usize> for MetaValue {
    fn from(i: usize) -> Self { Self::Int(i64::try_from(i).unwrap_or(i64::MAX)) }
}

impl From<f64> for MetaValue {
    fn from(x: f64) -> Self { Self::Float(x) }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

/// Provenance attached to a chunk at ingestion time.
///
/// `source_file` is the display name of the originating document (never a
/// filesystem path). Loader and pipeline specific fields such as `page` or
/// `chunk_index` live in `extra` and serialize flat next to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, MetaValue>,
}

impl ChunkMetadata {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self { source_file: source_file.into(), extra: BTreeMap::new() }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field. `source_file` is routed to the mandatory field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        let key = key.into();
        let value = value.into();
        if key == SOURCE_FILE {
            self.source_file = value.to_string();
        } else {
            self.extra.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<MetaValue> {
        if key == SOURCE_FILE {
            return Some(MetaValue::Str(self.source_file.clone()));
        }
        self.extra.get(key).cloned()
    }

    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter.conditions().all(|(key, expected)| match self.get(key) {
            Some(actual) => values_equal(&actual, expected),
            None => false,
        })
    }

    /// Checked at write time: the one field every chunk must carry.
    pub fn validate(&self) -> Result<()> {
        if self.source_file.trim().is_empty() {
            return Err(Error::InvalidInput("chunk metadata is missing source_file".to_string()));
        }
        Ok(())
    }
}

// Integers and floats compare numerically so a filter built from `2` matches a stored `2.0`.
#[allow(clippy::cast_precision_loss)]
fn values_equal(a: &MetaValue, b: &MetaValue) -> bool {
    match (a, b) {
        (MetaValue::Int(x), MetaValue::Float(y)) | (MetaValue::Float(y), MetaValue::Int(x)) => {
            (*x as f64 - y).abs() < f64::EPSILON
        }
        _ => a == b,
    }
}

/// The atomic unit of storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Assigned by the store on upsert when `None`.
    pub id: Option<ChunkId>,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, vector: Vec<f32>, metadata: ChunkMetadata) -> Self {
        Self { id: None, text: text.into(), vector, metadata }
    }
}

/// One nearest-neighbour result. Lower `distance` is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

impl SearchHit {
    /// Cosine similarity recovered from the cosine distance.
    pub fn similarity(&self) -> f32 { 1.0 - self.distance }
}

/// Conjunction of `key == value` conditions over chunk metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, MetaValue>,
}

impl MetadataFilter {
    pub fn new() -> Self { Self::default() }

    pub fn source_file(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new().and(SOURCE_FILE, name)
    }

    #[must_use]
    pub fn and(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> { self.conditions.get(key) }

    pub fn is_empty(&self) -> bool { self.conditions.is_empty() }
}

/// Collection names double as directory names on disk, so they are kept to
/// a portable alphabet.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    let starts_alnum = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if name.is_empty() || name.len() > 63 || !valid_chars || !starts_alnum {
        return Err(Error::InvalidInput(format!(
            "invalid collection name '{name}': use 1-63 characters from [A-Za-z0-9_.-], starting with a letter or digit"
        )));
    }
    Ok(())
}
