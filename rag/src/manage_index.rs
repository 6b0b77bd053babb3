use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::document::Chunk;
use crate::embed_chunks::{Embedder, EmbeddingError};
use crate::error::{RagError, Result};
use crate::vector_store::{Distance, IndexDescription, IndexRecord, RecordPayload, VectorStore};

/// How long to wait for a new index to become usable, and how often to ask.
#[derive(Clone, Copy, Debug)]
pub struct ProvisionPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ProvisionPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            timeout: cfg.index_ready_timeout,
            poll_interval: cfg.index_poll_interval,
        }
    }
}

/// Proof that the named index existed, was ready and had the right
/// dimension when it was opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
}

/// Diagnostics for the `status` command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub name: String,
    pub exists: bool,
    pub ready: bool,
    pub dimension: Option<usize>,
    pub expected_dimension: usize,
    pub dimension_matches: bool,
    pub record_count: Option<u64>,
    /// Length of a vector actually returned by the embedding provider
    pub embedder_dimension: Option<usize>,
    /// Why the provider check failed, if it did
    pub embedder_error: Option<String>,
}

/// Owns the lifecycle of the one named index: Absent -> Provisioning -> Ready,
/// and back to Provisioning when the embedding dimension changes.
pub struct IndexManager {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    name: String,
    policy: ProvisionPolicy,
    batch_size: usize,
}

impl IndexManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        name: impl Into<String>,
        policy: ProvisionPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            name: name.into(),
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the index if absent and rebuilds it if its dimension differs
    /// from the embedder's. Rebuilding drops every stored record.
    pub fn ensure_ready(&self) -> Result<IndexHandle> {
        let dimension = self.embedder.dimension();
        match self.store.describe(&self.name)? {
            None => {
                tracing::info!("Creating index '{}' ({}D, cosine)", self.name, dimension);
                self.store.create(&self.name, dimension, Distance::Cosine)?;
                self.wait_until_ready()?;
            }
            Some(desc) if desc.dimension != dimension => {
                tracing::warn!(
                    "Index '{}' has dimension {} but the embedder produces {}; \
                     deleting and recreating it, {} stored records will be lost",
                    self.name,
                    desc.dimension,
                    dimension,
                    desc.record_count.map_or_else(|| "all".to_string(), |n| n.to_string())
                );
                self.store.delete_index(&self.name)?;
                self.wait_until_absent()?;
                self.store.create(&self.name, dimension, Distance::Cosine)?;
                self.wait_until_ready()?;
            }
            Some(desc) if !desc.ready => {
                tracing::info!("Index '{}' exists but is still provisioning", self.name);
                self.wait_until_ready()?;
            }
            Some(_) => {
                tracing::debug!("Index '{}' is ready", self.name);
            }
        }
        Ok(IndexHandle {
            name: self.name.clone(),
            dimension,
        })
    }

    /// Removes every record but keeps the index itself.
    pub fn clear(&self) -> Result<()> {
        self.store.delete_all(&self.name).map_err(|source| {
            tracing::error!("Failed to clear index '{}': {}", self.name, source);
            RagError::IndexClear {
                name: self.name.clone(),
                source,
            }
        })?;
        tracing::info!("Cleared all records from index '{}'", self.name);
        Ok(())
    }

    /// Embeds and writes the chunks batch by batch, returning how many were
    /// written. Batches written before a failure are not rolled back.
    pub fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let total = chunks.len();
        let mut written = 0usize;
        for batch in chunks.chunks(self.batch_size) {
            let write_err = |reason: String| {
                tracing::error!(
                    "Index write failed after {} of {} records: {}",
                    written,
                    total,
                    reason
                );
                RagError::IndexWrite {
                    written,
                    total,
                    reason,
                }
            };

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .map_err(|e| write_err(format!("embedding failed: {}", e)))?;
            if vectors.len() != batch.len() {
                return Err(write_err(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            let records: Vec<IndexRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexRecord {
                    id: Uuid::new_v4().to_string(),
                    vector,
                    payload: RecordPayload::from(chunk),
                })
                .collect();
            self.store
                .upsert(&self.name, &records)
                .map_err(|e| write_err(e.to_string()))?;
            written += records.len();
            tracing::debug!("Wrote {}/{} records to '{}'", written, total, self.name);
        }

        tracing::info!("Indexed {} chunks into '{}'", written, self.name);
        Ok(written)
    }

    /// Handle for querying; the index must already exist, be ready and match
    /// the embedder's dimension.
    pub fn open(&self) -> Result<IndexHandle> {
        let unavailable = |reason: String| RagError::IndexUnavailable {
            name: self.name.clone(),
            reason,
        };
        let desc = self
            .store
            .describe(&self.name)?
            .ok_or_else(|| unavailable("index does not exist, run ingestion first".to_string()))?;
        if !desc.ready {
            return Err(unavailable("index is still provisioning".to_string()));
        }
        let dimension = self.embedder.dimension();
        if desc.dimension != dimension {
            return Err(unavailable(format!(
                "index dimension {} does not match embedding dimension {}, re-run ingestion",
                desc.dimension, dimension
            )));
        }
        Ok(IndexHandle {
            name: self.name.clone(),
            dimension,
        })
    }

    /// Reports the index as the backend sees it and embeds a short sentence
    /// to check that the provider is reachable and emits the configured size.
    pub fn status(&self) -> Result<IndexStatus> {
        let expected = self.embedder.dimension();
        let desc = self.store.describe(&self.name)?;
        let (embedder_dimension, embedder_error) = self.check_embedder(expected);
        Ok(IndexStatus {
            name: self.name.clone(),
            exists: desc.is_some(),
            ready: desc.as_ref().is_some_and(|d| d.ready),
            dimension: desc.as_ref().map(|d| d.dimension),
            expected_dimension: expected,
            dimension_matches: desc.as_ref().is_some_and(|d| d.dimension == expected),
            record_count: desc.and_then(|d| d.record_count),
            embedder_dimension,
            embedder_error,
        })
    }

    fn check_embedder(&self, expected: usize) -> (Option<usize>, Option<String>) {
        match self.embedder.embed("status check") {
            Ok(vector) if vector.len() == expected => (Some(vector.len()), None),
            Ok(vector) => {
                let err = EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                };
                tracing::warn!("Embedding provider check: {}", err);
                (Some(vector.len()), Some(err.to_string()))
            }
            Err(err @ EmbeddingError::DimensionMismatch { actual, .. }) => {
                tracing::warn!("Embedding provider check: {}", err);
                (Some(actual), Some(err.to_string()))
            }
            Err(err) => {
                tracing::warn!("Embedding provider check failed: {}", err);
                (None, Some(err.to_string()))
            }
        }
    }

    fn wait_until_ready(&self) -> Result<IndexDescription> {
        self.poll(|desc| desc.as_ref().filter(|d| d.ready).cloned())
    }

    fn wait_until_absent(&self) -> Result<()> {
        self.poll(|desc| desc.is_none().then_some(()))
    }

    fn poll<T>(&self, mut done: impl FnMut(&Option<IndexDescription>) -> Option<T>) -> Result<T> {
        let started = Instant::now();
        loop {
            let desc = self.store.describe(&self.name)?;
            if let Some(value) = done(&desc) {
                tracing::debug!("Index '{}' settled after {:?}", self.name, started.elapsed());
                return Ok(value);
            }
            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                tracing::error!("Index '{}' did not settle within {:?}", self.name, waited);
                return Err(RagError::IndexProvisioningTimeout {
                    name: self.name.clone(),
                    waited,
                });
            }
            thread::sleep(self.policy.poll_interval.min(self.policy.timeout - waited));
        }
    }
}
