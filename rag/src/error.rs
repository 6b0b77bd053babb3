use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::embed_chunks::EmbeddingError;
use crate::generate::GenerationError;
use crate::load_documents::LoadError;
use crate::vector_store::StoreError;

/// Errors surfaced by the ingestion and query entry points.
#[derive(Error, Debug)]
pub enum RagError {
    /// The ingestion source does not exist on disk
    #[error("path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    /// A single file could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The index was created but never reported ready
    #[error("index '{name}' was not ready after {waited:?}")]
    IndexProvisioningTimeout { name: String, waited: Duration },

    /// The index is missing or cannot serve queries yet
    #[error("index '{name}' is unavailable: {reason}")]
    IndexUnavailable { name: String, reason: String },

    /// A batch write failed part way; earlier batches stay written
    #[error("index write failed after {written} of {total} records: {reason}")]
    IndexWrite {
        written: usize,
        total: usize,
        reason: String,
    },

    #[error("failed to clear index '{name}': {source}")]
    IndexClear { name: String, source: StoreError },

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The language model call failed; never retried internally
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("question is empty")]
    EmptyQuestion,

    /// Wraps a failure with the ingestion step it happened in
    #[error(
        "ingestion failed during {stage} ({documents} documents loaded, \
         {chunks_written} chunks written): {source}"
    )]
    Ingest {
        stage: IngestStage,
        documents: usize,
        chunks_written: usize,
        source: Box<RagError>,
    },

    #[error("configuration validation failed: {}", join_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("index lifecycle lock poisoned")]
    Lock,
}

impl RagError {
    /// Step of an ingestion run that failed, if this is an ingestion error.
    pub fn stage(&self) -> Option<IngestStage> {
        match self {
            RagError::Ingest { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, skipping any ingestion stage wrapper.
    pub fn root(&self) -> &RagError {
        match self {
            RagError::Ingest { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Ingestion steps in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Load,
    Provision,
    Clear,
    Write,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Load => "load",
            IngestStage::Provision => "index provisioning",
            IngestStage::Clear => "index clear",
            IngestStage::Write => "index write",
        };
        f.write_str(name)
    }
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Environment variable that failed validation
    pub key: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, RagError>;
