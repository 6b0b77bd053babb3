#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rag::{
    Config, Distance, Embedder, EmbeddingError, GenerationError, Generator, IndexDescription,
    IndexRecord, MemoryStore, OllamaGenerator, Pipeline, ScoredRecord, StoreError, VectorBackend,
    VectorStore,
};

/// Bag-of-words vectors: each lowercase word is hashed into one bucket.
/// Texts that share words end up close under cosine similarity.
pub struct HashEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[fnv1a(&word.to_lowercase()) % self.dimension] += 1.0;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Claims `configured` dimensions but the model behind it emits `actual`,
/// like an Ollama model left on the OpenAI-sized default.
pub struct MisconfiguredEmbedder {
    pub configured: usize,
    pub actual: usize,
}

impl Embedder for MisconfiguredEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.5; self.actual]).collect())
    }

    fn dimension(&self) -> usize {
        self.configured
    }
}

fn fnv1a(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash as usize
}

/// Returns canned answers and records every prompt it was given.
pub struct ScriptedGenerator {
    reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl Generator for ScriptedGenerator {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// A real Ollama client pointed at a socket that accepts but never answers,
/// so every call ends in an HTTP timeout.
pub struct StalledGenerator {
    _listener: TcpListener,
    inner: OllamaGenerator,
}

impl StalledGenerator {
    pub fn new(timeout: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let cfg = Config {
            ollama_url: format!("http://{}", listener.local_addr().expect("addr")),
            http_timeout: timeout,
            ..Config::default()
        };
        Self {
            inner: OllamaGenerator::new(&cfg).expect("client"),
            _listener: listener,
        }
    }
}

impl Generator for StalledGenerator {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        self.inner.complete(prompt)
    }
}

/// Delegates to a `MemoryStore` but rejects upserts after `ok_upserts` calls.
pub struct FlakyStore {
    pub inner: MemoryStore,
    ok_upserts: usize,
    upserts: AtomicUsize,
    pub fail_clear: bool,
}

impl FlakyStore {
    pub fn failing_after(ok_upserts: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            ok_upserts,
            upserts: AtomicUsize::new(0),
            fail_clear: false,
        }
    }
}

impl VectorStore for FlakyStore {
    fn create(&self, name: &str, dimension: usize, distance: Distance) -> Result<(), StoreError> {
        self.inner.create(name, dimension, distance)
    }

    fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_index(name)
    }

    fn describe(&self, name: &str) -> Result<Option<IndexDescription>, StoreError> {
        self.inner.describe(name)
    }

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), StoreError> {
        if self.upserts.fetch_add(1, Ordering::SeqCst) >= self.ok_upserts {
            return Err(StoreError::Backend("write rejected".to_string()));
        }
        self.inner.upsert(name, records)
    }

    fn delete_all(&self, name: &str) -> Result<(), StoreError> {
        if self.fail_clear {
            return Err(StoreError::Backend("delete rejected".to_string()));
        }
        self.inner.delete_all(name)
    }

    fn query(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        self.inner.query(name, vector, k)
    }
}

pub const DIM: usize = 256;
pub const INDEX: &str = "hr-test";

pub fn test_config() -> Config {
    Config {
        index_name: INDEX.to_string(),
        embedding_dimension: DIM,
        vector_backend: VectorBackend::Memory,
        index_ready_timeout: Duration::from_millis(200),
        index_poll_interval: Duration::from_millis(2),
        ..Config::default()
    }
}

pub fn pipeline(
    cfg: Config,
    embedder: Arc<HashEmbedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
) -> Pipeline {
    Pipeline::new(cfg, embedder, store, generator)
}

pub const HR_REPLY: &str = "## Summary\nStrong backend candidate.\n\n\
## Key Insights\n- Python\n- React\n\n\
## Recommendations\nInterview for the platform team.\n\n\
## Skills Assessment\nPython: expert";
