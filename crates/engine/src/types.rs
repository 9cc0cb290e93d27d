use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Store-assigned record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Raw counter value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-length embedding produced by the face extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for EmbeddingVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Allowed metadata value kinds
///
/// The engine stores and returns these but never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Opaque key-value payload stored alongside an embedding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text value
    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), MetadataValue::Text(value.into()));
        self
    }

    /// Add a numeric value
    pub fn with_number(mut self, key: impl Into<String>, value: f64) -> Self {
        self.0.insert(key.into(), MetadataValue::Number(value));
        self
    }

    /// Add a timestamp
    pub fn with_time(mut self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.0.insert(key.into(), MetadataValue::Time(value));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

/// A stored embedding with its identifier and payload
///
/// Immutable once created. Only the store builds records.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    id: RecordId,
    vector: EmbeddingVector,
    metadata: Metadata,
}

impl EmbeddingRecord {
    pub(crate) fn new(id: RecordId, vector: EmbeddingVector, metadata: Metadata) -> Self {
        Self {
            id,
            vector,
            metadata,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn vector(&self) -> &EmbeddingVector {
        &self.vector
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Why a submission was rejected before any search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Vector length differs from the configured dimension
    DimensionMismatch { expected: usize, actual: usize },
    /// Upstream extraction found no face
    NoEmbeddingProvided,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch (expected {}, got {})", expected, actual)
            }
            Self::NoEmbeddingProvided => write!(f, "no embedding provided"),
        }
    }
}

/// Outcome of a dedup submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResult {
    /// No match; the embedding was appended
    Stored {
        id: RecordId,
        max_similarity_found: f32,
    },

    /// A prior record scored above threshold; nothing was written
    Duplicate {
        matched_id: RecordId,
        score: f32,
        max_similarity_found: f32,
    },

    /// Validation failed; no search or insert was attempted
    Rejected { reason: RejectReason },
}

impl SubmitResult {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Highest similarity seen during the search, if one ran
    pub fn max_similarity_found(&self) -> Option<f32> {
        match self {
            Self::Stored {
                max_similarity_found,
                ..
            }
            | Self::Duplicate {
                max_similarity_found,
                ..
            } => Some(*max_similarity_found),
            Self::Rejected { .. } => None,
        }
    }
}
