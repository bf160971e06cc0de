use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form key/value metadata attached to documents and chunks.
pub type Metadata = BTreeMap<String, String>;

/// A raw document handed to the pipeline. Immutable once stored;
/// re-ingesting the same source supersedes earlier chunks rather than
/// mutating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
    pub source: String,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(raw_text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            raw_text: raw_text.into(),
            source: source.into(),
            metadata: Metadata::new(),
            ingested_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The unit of retrieval. `chunk_index` values are contiguous from 0
/// within a document; the embedding stays `None` until computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
}

/// One entry of the fused candidate list produced by hybrid retrieval.
/// A missing component score means the chunk surfaced from only one
/// modality; it contributes 0 to the fused score but is never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub vector_score: Option<f64>,
    pub lexical_score: Option<f64>,
    pub fused_score: f64,
    pub rank: usize,
}

/// Final query-path output: a chunk plus the score that produced its
/// position (rerank score, or fused score when reranking fell back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Equality predicates over chunk metadata, applied by the vector
/// store when querying nearest neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}
