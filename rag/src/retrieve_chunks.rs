use std::sync::Arc;

use crate::document::{Chunk, ScoredChunk};
use crate::embed_chunks::Embedder;
use crate::error::{RagError, Result};
use crate::manage_index::IndexHandle;
use crate::vector_store::VectorStore;

/// Top-K similarity search over an opened index.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    handle: IndexHandle,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        handle: IndexHandle,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            handle,
            top_k,
        }
    }

    pub fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve_top(query, self.top_k)
    }

    /// Up to `k` chunks, scores non-increasing. An empty index gives an
    /// empty result.
    pub fn retrieve_top(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(vec![]);
        }
        let vector = self.embedder.embed(query)?;
        let mut hits = self
            .store
            .query(&self.handle.name, &vector, k)
            .map_err(|err| {
                if err.is_not_found() {
                    RagError::IndexUnavailable {
                        name: self.handle.name.clone(),
                        reason: "index disappeared after it was opened".to_string(),
                    }
                } else {
                    RagError::Store(err)
                }
            })?;
        // Backends already rank by score; a stable sort keeps that order and
        // guarantees monotonic scores if one does not.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);

        tracing::debug!(
            "Retrieved {} chunks from '{}' (top score {:?})",
            hits.len(),
            self.handle.name,
            hits.first().map(|h| h.score)
        );
        Ok(hits
            .into_iter()
            .map(|hit| ScoredChunk {
                score: hit.score,
                chunk: Chunk::from(hit.payload),
            })
            .collect())
    }
}
