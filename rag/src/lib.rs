//! Retrieval-augmented question answering over HR documents.
//!
//! Ingestion: files -> loader -> chunker -> embedder -> index manager -> vector store.
//! Query: question -> retriever -> vector store -> synthesizer -> language model.

mod build_prompt;
mod chunk_text;
mod config;
mod document;
mod embed_chunks;
mod error;
mod generate;
mod http;
mod load_documents;
mod manage_index;
mod retrieve_chunks;
mod store_memory;
mod store_qdrant;
mod synthesize_answer;
mod vector_store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;

pub use build_prompt::{
    build_prompt, build_prompt_with_context, format_context_from_hits, ANSWER_SECTIONS, NO_CONTEXT,
};
pub use chunk_text::Chunker;
pub use config::{known_embedding_dimension, Config, ProviderKind, VectorBackend};
pub use document::{Chunk, Document, DocumentMetadata, ScoredChunk, Span};
pub use embed_chunks::{build_embedder, Embedder, EmbeddingError, OllamaEmbedder, OpenAiEmbedder};
pub use error::{IngestStage, RagError, Result, ValidationError};
pub use generate::{build_generator, GenerationError, Generator, OllamaGenerator, OpenAiGenerator};
pub use http::HttpError;
pub use load_documents::{
    docx_xml_to_text, DocumentLoader, LoadError, LoadFailure, LoadOutcome, SUPPORTED_EXTENSIONS,
};
pub use manage_index::{IndexHandle, IndexManager, IndexStatus, ProvisionPolicy};
pub use retrieve_chunks::Retriever;
pub use store_memory::MemoryStore;
pub use store_qdrant::QdrantStore;
pub use synthesize_answer::{
    preview, render_markdown, Answer, AnswerSynthesizer, QueryResponse, SourceRef,
    SOURCE_PREVIEW_CHARS,
};
pub use vector_store::{
    Distance, IndexDescription, IndexRecord, RecordPayload, ScoredRecord, StoreError, VectorStore,
};

/// Outcome of an ingestion run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: PathBuf,
    pub files_seen: usize,
    pub documents: usize,
    pub failed_files: Vec<FailedFile>,
    pub chunks_written: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

/// Wires the components together behind the two entry points.
pub struct Pipeline {
    cfg: Config,
    loader: DocumentLoader,
    chunker: Chunker,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    manager: IndexManager,
    synthesizer: AnswerSynthesizer,
    // Ingestion holds the write side so queries never see a half-built index.
    lifecycle: RwLock<()>,
}

impl Pipeline {
    /// Builds the providers and vector store named in the config.
    pub fn from_config(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let embedder = build_embedder(&cfg)?;
        let generator = build_generator(&cfg)?;
        let store: Arc<dyn VectorStore> = match cfg.vector_backend {
            VectorBackend::Qdrant => Arc::new(QdrantStore::new(&cfg)?),
            VectorBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(cfg, embedder, store, generator))
    }

    pub fn new(
        cfg: Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let manager = IndexManager::new(
            store.clone(),
            embedder.clone(),
            cfg.index_name.clone(),
            ProvisionPolicy::from_config(&cfg),
            cfg.embed_batch_size,
        );
        Self {
            loader: DocumentLoader::from_config(&cfg),
            chunker: Chunker::from_config(&cfg),
            store,
            embedder,
            manager,
            synthesizer: AnswerSynthesizer::new(generator),
            lifecycle: RwLock::new(()),
            cfg,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn index(&self) -> &IndexManager {
        &self.manager
    }

    /// Replaces the index contents with the documents under `source`
    /// (the configured source path when `None`).
    ///
    /// Nothing is cleared when the source yields no chunks.
    pub fn index_corpus(&self, source: Option<&Path>) -> Result<IngestReport> {
        let source = source.unwrap_or(&self.cfg.source_path);
        if !source.exists() {
            return Err(RagError::PathNotFound(source.to_path_buf()));
        }
        let _guard = self.lifecycle.write().map_err(|_| RagError::Lock)?;

        tracing::info!("Ingesting documents from {}", source.display());
        let outcome = self.loader.load(source);
        let mut report = IngestReport {
            source: source.to_path_buf(),
            files_seen: outcome.files_seen,
            documents: outcome.documents.len(),
            failed_files: outcome
                .failures
                .iter()
                .map(|f| FailedFile {
                    path: f.path.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
            chunks_written: 0,
        };

        if outcome.documents.is_empty() {
            if let Some(first) = outcome.failures.into_iter().next() {
                return Err(stage_error(IngestStage::Load, &report, first.error.into()));
            }
            tracing::warn!("No documents found under {}", source.display());
            return Ok(report);
        }

        let chunks = self.chunker.split_documents(&outcome.documents);
        tracing::info!(
            "Split {} documents into {} chunks (size {}, overlap {})",
            report.documents,
            chunks.len(),
            self.chunker.size(),
            self.chunker.overlap()
        );
        if chunks.is_empty() {
            return Ok(report);
        }

        self.manager
            .ensure_ready()
            .map_err(|e| stage_error(IngestStage::Provision, &report, e))?;
        self.manager
            .clear()
            .map_err(|e| stage_error(IngestStage::Clear, &report, e))?;
        match self.manager.upsert(&chunks) {
            Ok(written) => report.chunks_written = written,
            Err(e) => {
                if let RagError::IndexWrite { written, .. } = &e {
                    report.chunks_written = *written;
                }
                return Err(stage_error(IngestStage::Write, &report, e));
            }
        }

        tracing::info!(
            "Ingestion complete: {} documents, {} chunks, {} failed files",
            report.documents,
            report.chunks_written,
            report.failed_files.len()
        );
        Ok(report)
    }

    /// Retrieves the top-K chunks for `question` and asks the model once.
    pub fn answer_query(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        let _guard = self.lifecycle.read().map_err(|_| RagError::Lock)?;

        let handle = self.manager.open()?;
        let retriever = Retriever::new(
            self.store.clone(),
            self.embedder.clone(),
            handle,
            self.cfg.top_k,
        );
        let sources = retriever.retrieve(question)?;
        self.synthesizer.synthesize(question, sources)
    }

    pub fn status(&self) -> Result<IndexStatus> {
        self.manager.status()
    }
}

fn stage_error(stage: IngestStage, report: &IngestReport, source: RagError) -> RagError {
    RagError::Ingest {
        stage,
        documents: report.documents,
        chunks_written: report.chunks_written,
        source: Box::new(source),
    }
}
