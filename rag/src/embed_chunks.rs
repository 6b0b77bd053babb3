use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, ProviderKind};
use crate::http::{bearer_headers, HttpClient, HttpError};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("no embeddings in response")]
    Missing,

    #[error("invalid embeddings format: {0}")]
    InvalidFormat(String),

    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Output dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::Missing)
    }
}

pub fn build_embedder(cfg: &Config) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Ok(match cfg.embed_provider {
        ProviderKind::Ollama => Arc::new(OllamaEmbedder::new(cfg)?),
        ProviderKind::OpenAi => Arc::new(OpenAiEmbedder::new(cfg)?),
    })
}

/// Ollama's `/api/embed`, falling back to the single-prompt `/api/embeddings`
/// route on servers that predate it.
pub struct OllamaEmbedder {
    http: HttpClient,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Serialize)]
struct EmbedLegacyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

impl OllamaEmbedder {
    pub fn new(cfg: &Config) -> Result<Self, EmbeddingError> {
        Ok(Self {
            http: HttpClient::new(cfg.http_timeout, Default::default())?,
            base_url: cfg.ollama_url.trim_end_matches('/').to_string(),
            model: cfg.ollama_embed_model.clone(),
            dimension: cfg.embedding_dimension,
        })
    }

    fn embed_legacy(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let req = EmbedLegacyRequest {
                model: &self.model,
                prompt: text,
            };
            let res = self.http.post_json::<Value, _>(&url, &req)?;
            out.extend(parse_embeddings(res)?);
        }
        Ok(out)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/api/embed", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let vectors = match self.http.post_json::<Value, _>(&url, &req) {
            Ok(res) => parse_embeddings(res)?,
            Err(err) if err.is_not_found() => {
                tracing::debug!("{} not available, using /api/embeddings", url);
                self.embed_legacy(texts)?
            }
            Err(err) => return Err(err.into()),
        };
        check_shape(vectors, texts.len(), self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: HttpClient,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &Config) -> Result<Self, EmbeddingError> {
        let api_key = cfg.openai_api_key.as_deref().unwrap_or_default();
        Ok(Self {
            http: HttpClient::new(cfg.http_timeout, bearer_headers(api_key)?)?,
            endpoint: format!("{}/embeddings", cfg.openai_base_url.trim_end_matches('/')),
            model: cfg.openai_embed_model.clone(),
            dimension: cfg.embedding_dimension,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        // Only the text-embedding-3 family accepts a target dimension.
        let dimensions = self
            .model
            .starts_with("text-embedding-3")
            .then_some(self.dimension);
        let req = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions,
        };
        let mut parsed: OpenAiEmbeddingResponse = self.http.post_json(&self.endpoint, &req)?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors = parsed.data.into_iter().map(|entry| entry.embedding).collect();
        check_shape(vectors, texts.len(), self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn check_shape(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

fn parse_embeddings(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if let Some(embeddings) = value.get("embeddings") {
        return parse_embeddings_value(embeddings);
    }
    if let Some(embedding) = value.get("embedding") {
        return parse_embeddings_value(embedding);
    }
    Err(EmbeddingError::Missing)
}

fn parse_embeddings_value(value: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let arr = value
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidFormat("expected an array".to_string()))?;
    match arr.first() {
        None => Ok(vec![]),
        Some(first) if first.is_array() => arr.iter().map(parse_vec).collect(),
        Some(_) => Ok(vec![parse_vec(value)?]),
    }
}

fn parse_vec(value: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let arr = value
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidFormat("embedding is not an array".to_string()))?;
    arr.iter()
        .map(|v| {
            v.as_f64().map(|n| n as f32).ok_or_else(|| {
                EmbeddingError::InvalidFormat("embedding value is not a number".to_string())
            })
        })
        .collect()
}
