use serde::{Deserialize, Serialize};

/// Where a piece of text came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    /// 1-based page number for paged formats (PDF)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Raw text produced by the loader, one per file or per PDF page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                page,
            },
        }
    }
}

/// Character offsets of a chunk inside its parent document, `start..end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Position of this chunk within its document
    pub index: usize,
    pub span: Span,
}

impl Chunk {
    /// Length in characters, the unit the chunk size bound is expressed in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
