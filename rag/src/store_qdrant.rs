use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::http::{key_header, HttpClient, HttpError};
use crate::vector_store::{
    Distance, IndexDescription, IndexRecord, RecordPayload, ScoredRecord, StoreError, VectorStore,
};

/// Qdrant over its REST API. Each index is a collection with a single unnamed vector.
pub struct QdrantStore {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Serialize)]
struct Point<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a RecordPayload,
}

#[derive(Serialize)]
struct UpsertPoints<'a> {
    points: Vec<Point<'a>>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorSize,
}

#[derive(Deserialize)]
struct VectorSize {
    size: usize,
}

#[derive(Deserialize)]
struct QueryResult {
    points: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    id: Value,
    score: f32,
    payload: Option<RecordPayload>,
}

impl QdrantStore {
    pub fn new(cfg: &Config) -> Result<Self, StoreError> {
        let headers = match cfg.qdrant_api_key.as_deref() {
            Some(key) => key_header("api-key", key)?,
            None => Default::default(),
        };
        Ok(Self {
            http: HttpClient::new(cfg.http_timeout, headers)?,
            base_url: cfg.qdrant_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    fn map_missing(name: &str, err: HttpError) -> StoreError {
        if err.is_not_found() {
            StoreError::NotFound(name.to_string())
        } else {
            StoreError::Http(err)
        }
    }
}

impl VectorStore for QdrantStore {
    fn create(&self, name: &str, dimension: usize, distance: Distance) -> Result<(), StoreError> {
        let body = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance,
            },
        };
        let _ = self
            .http
            .put_json::<Value, _>(&self.collection_url(name), &body)
            .map_err(|err| {
                if err.status() == Some(409) {
                    StoreError::AlreadyExists(name.to_string())
                } else {
                    StoreError::Http(err)
                }
            })?;
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let _ = self
            .http
            .delete_json::<Value>(&self.collection_url(name))
            .map_err(|err| Self::map_missing(name, err))?;
        Ok(())
    }

    fn describe(&self, name: &str) -> Result<Option<IndexDescription>, StoreError> {
        match self
            .http
            .get_json::<QdrantResponse<CollectionInfo>>(&self.collection_url(name))
        {
            Ok(res) => Ok(Some(describe_collection(res.result))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(StoreError::Http(err)),
        }
    }

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let url = format!("{}/points?wait=true", self.collection_url(name));
        let body = UpsertPoints {
            points: records
                .iter()
                .map(|r| Point {
                    id: &r.id,
                    vector: &r.vector,
                    payload: &r.payload,
                })
                .collect(),
        };
        let _ = self
            .http
            .put_json::<Value, _>(&url, &body)
            .map_err(|err| Self::map_missing(name, err))?;
        Ok(())
    }

    fn delete_all(&self, name: &str) -> Result<(), StoreError> {
        let url = format!("{}/points/delete?wait=true", self.collection_url(name));
        // An empty filter matches every point.
        let body = json!({ "filter": {} });
        let _ = self
            .http
            .post_json::<Value, _>(&url, &body)
            .map_err(|err| Self::map_missing(name, err))?;
        Ok(())
    }

    fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if vector.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        let url = format!("{}/points/query", self.collection_url(name));
        let req = QueryRequest {
            query: vector,
            limit: k,
            with_payload: true,
        };
        let res = self
            .http
            .post_json::<QdrantResponse<QueryResult>, _>(&url, &req)
            .map_err(|err| Self::map_missing(name, err))?;
        Ok(scored_records(res.result))
    }
}

fn describe_collection(info: CollectionInfo) -> IndexDescription {
    IndexDescription {
        dimension: info.config.params.vectors.size,
        // yellow means optimizing; it already serves reads and writes.
        ready: matches!(info.status.as_str(), "green" | "yellow"),
        record_count: info.points_count,
    }
}

fn scored_records(result: QueryResult) -> Vec<ScoredRecord> {
    result
        .points
        .into_iter()
        .filter_map(|hit| {
            let id = match hit.id {
                Value::String(s) => s,
                other => other.to_string(),
            };
            match hit.payload {
                Some(payload) => Some(ScoredRecord {
                    id,
                    score: hit.score,
                    payload,
                }),
                None => {
                    tracing::warn!("Skipping point {} without payload", id);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_collection_description() {
        let raw = r#"{
            "result": {
                "status": "green",
                "points_count": 12,
                "config": { "params": { "vectors": { "size": 768, "distance": "Cosine" } } }
            },
            "status": "ok",
            "time": 0.001
        }"#;
        let res: QdrantResponse<CollectionInfo> = serde_json::from_str(raw).unwrap();
        let desc = describe_collection(res.result);
        assert_eq!(
            desc,
            IndexDescription {
                dimension: 768,
                ready: true,
                record_count: Some(12),
            }
        );
    }

    #[test]
    fn grey_collection_is_not_ready() {
        let raw = r#"{"result":{"status":"grey",
            "config":{"params":{"vectors":{"size":1536,"distance":"Cosine"}}}}}"#;
        let res: QdrantResponse<CollectionInfo> = serde_json::from_str(raw).unwrap();
        let desc = describe_collection(res.result);
        assert!(!desc.ready);
        assert_eq!(desc.record_count, None);
    }

    #[test]
    fn parses_query_hits_with_numeric_and_uuid_ids() {
        let raw = r#"{"result":{"points":[
            {"id":"5c56c793-69f3-4fbf-87e6-c4bf54c28c26","score":0.91,
             "payload":{"text":"Python, JavaScript, React","source":"jane.txt",
                        "index":0,"start":0,"end":25}},
            {"id":7,"score":0.42,
             "payload":{"text":"PTO policy","source":"policy.pdf","page":3,
                        "index":1,"start":800,"end":1800}},
            {"id":8,"score":0.1}
        ]}}"#;
        let res: QdrantResponse<QueryResult> = serde_json::from_str(raw).unwrap();
        let hits = scored_records(res.result);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "5c56c793-69f3-4fbf-87e6-c4bf54c28c26");
        assert_eq!(hits[1].id, "7");
        assert_eq!(hits[1].payload.page, Some(3));
    }

    #[test]
    fn create_body_uses_cosine() {
        let body = CreateCollection {
            vectors: VectorParams {
                size: 1536,
                distance: Distance::Cosine,
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"vectors": {"size": 1536, "distance": "Cosine"}})
        );
    }
}
