use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::vector_store::{
    Distance, IndexDescription, IndexRecord, ScoredRecord, StoreError, VectorStore,
};

/// In-process vector store with exact (brute force) cosine search.
///
/// Serves the `VECTOR_BACKEND=memory` mode and stands in for Qdrant in tests.
/// A provisioning delay can be configured so freshly created indexes report
/// not-ready for a number of `describe` calls.
#[derive(Default)]
pub struct MemoryStore {
    indexes: RwLock<HashMap<String, MemoryIndex>>,
    provisioning_polls: usize,
}

struct MemoryIndex {
    dimension: usize,
    // Keyed by id so upserts replace, ordered for deterministic ties.
    records: BTreeMap<String, IndexRecord>,
    pending_polls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// New indexes stay "provisioning" for the first `polls` describe calls.
    /// `usize::MAX` makes them never become ready.
    pub fn with_provisioning_delay(polls: usize) -> Self {
        Self {
            indexes: RwLock::default(),
            provisioning_polls: polls,
        }
    }

    pub fn len(&self, name: &str) -> usize {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        indexes.get(name).map_or(0, |idx| idx.records.len())
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }
}

impl VectorStore for MemoryStore {
    fn create(&self, name: &str, dimension: usize, _distance: Distance) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        if indexes.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        indexes.insert(
            name.to_string(),
            MemoryIndex {
                dimension,
                records: BTreeMap::new(),
                pending_polls: self.provisioning_polls,
            },
        );
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn describe(&self, name: &str) -> Result<Option<IndexDescription>, StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        Ok(indexes.get_mut(name).map(|idx| {
            let ready = idx.pending_polls == 0;
            if !ready && idx.pending_polls != usize::MAX {
                idx.pending_polls -= 1;
            }
            IndexDescription {
                dimension: idx.dimension,
                ready,
                record_count: Some(idx.records.len() as u64),
            }
        }))
    }

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        let idx = indexes
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != idx.dimension) {
            return Err(StoreError::InvalidDimension {
                expected: idx.dimension,
                actual: bad.vector.len(),
            });
        }
        for record in records {
            idx.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    fn delete_all(&self, name: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        let idx = indexes
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        idx.records.clear();
        Ok(())
    }

    fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        let idx = indexes
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if vector.len() != idx.dimension {
            return Err(StoreError::InvalidDimension {
                expected: idx.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredRecord> = idx
            .records
            .values()
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                payload: record.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::RecordPayload;

    fn record(id: &str, vector: Vec<f32>) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            vector,
            payload: RecordPayload {
                text: id.to_string(),
                source: "test.txt".to_string(),
                page: None,
                index: 0,
                start: 0,
                end: id.len(),
            },
        }
    }

    #[test]
    fn query_ranks_by_cosine_similarity() {
        let store = MemoryStore::new();
        store.create("idx", 2, Distance::Cosine).unwrap();
        store
            .upsert(
                "idx",
                &[
                    record("orthogonal", vec![0.0, 1.0]),
                    record("same", vec![2.0, 0.0]),
                    record("close", vec![0.9, 0.1]),
                ],
            )
            .unwrap();

        let hits = store.query("idx", &[1.0, 0.0], 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["same", "close"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn provisioning_delay_counts_down() {
        let store = MemoryStore::with_provisioning_delay(2);
        store.create("idx", 3, Distance::Cosine).unwrap();
        let readiness: Vec<bool> = (0..3)
            .map(|_| store.describe("idx").unwrap().unwrap().ready)
            .collect();
        assert_eq!(readiness, vec![false, false, true]);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let store = MemoryStore::new();
        store.create("idx", 3, Distance::Cosine).unwrap();
        let err = store.upsert("idx", &[record("a", vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDimension {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn missing_index_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.describe("nope").unwrap().is_none());
        assert!(store.delete_all("nope").unwrap_err().is_not_found());
        assert!(store.query("nope", &[1.0], 1).unwrap_err().is_not_found());
    }
}
