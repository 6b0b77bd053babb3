//! Narrow interface to the external vector database.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Chunk, DocumentMetadata, Span};
use crate::http::HttpError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("index not found: {0}")]
    NotFound(String),

    #[error("index already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Http(err) => err.is_not_found(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
}

/// What the backend reports about an existing index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescription {
    pub dimension: usize,
    pub ready: bool,
    pub record_count: Option<u64>,
}

/// Payload stored next to every vector; enough to rebuild the chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl From<&Chunk> for RecordPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            source: chunk.metadata.source.clone(),
            page: chunk.metadata.page,
            index: chunk.index,
            start: chunk.span.start,
            end: chunk.span.end,
        }
    }
}

impl From<RecordPayload> for Chunk {
    fn from(payload: RecordPayload) -> Self {
        Chunk {
            text: payload.text,
            metadata: DocumentMetadata {
                source: payload.source,
                page: payload.page,
            },
            index: payload.index,
            span: Span {
                start: payload.start,
                end: payload.end,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexRecord {
    /// Opaque identifier, a UUID string
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub payload: RecordPayload,
}

/// Operations the index lifecycle and retrieval need from a vector database.
pub trait VectorStore: Send + Sync {
    fn create(&self, name: &str, dimension: usize, distance: Distance) -> Result<(), StoreError>;

    fn delete_index(&self, name: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when the index does not exist.
    fn describe(&self, name: &str) -> Result<Option<IndexDescription>, StoreError>;

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), StoreError>;

    fn delete_all(&self, name: &str) -> Result<(), StoreError>;

    /// Up to `k` records, most similar first.
    fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError>;
}
