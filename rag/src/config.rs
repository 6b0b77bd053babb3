use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RagError, ValidationError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!("unknown provider '{}', expected openai or ollama", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant,
    Memory,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(VectorBackend::Qdrant),
            "memory" => Ok(VectorBackend::Memory),
            other => Err(format!("unknown vector backend '{}', expected qdrant or memory", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source_path: PathBuf,
    pub max_file_bytes: u64,
    pub index_name: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embed_batch_size: usize,
    pub index_ready_timeout: Duration,
    pub index_poll_interval: Duration,
    pub http_timeout: Duration,
    pub vector_backend: VectorBackend,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub embed_provider: ProviderKind,
    pub llm_provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_embed_model: String,
    pub openai_chat_model: String,
    pub temperature: f32,
    pub ollama_url: String,
    pub ollama_embed_model: String,
    pub ollama_chat_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("./documents"),
            max_file_bytes: 20 * 1024 * 1024,
            index_name: "hr-documents".to_string(),
            embedding_dimension: 1536,
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            embed_batch_size: 64,
            index_ready_timeout: Duration::from_secs(60),
            index_poll_interval: Duration::from_millis(500),
            http_timeout: Duration::from_secs(120),
            vector_backend: VectorBackend::Qdrant,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            embed_provider: ProviderKind::OpenAi,
            llm_provider: ProviderKind::OpenAi,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_embed_model: "text-embedding-3-small".to_string(),
            openai_chat_model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_embed_model: "nomic-embed-text".to_string(),
            ollama_chat_model: "llama3.1".to_string(),
        }
    }
}

impl Config {
    /// Reads the environment (and `.env`), reporting unparsable values
    /// together with any validation failures.
    pub fn from_env() -> Result<Self, RagError> {
        // Load .env if present so API keys work without exporting them first.
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        let mut errors = Vec::new();

        if let Ok(path) = env::var("FILE_PATH") {
            if !path.trim().is_empty() {
                cfg.source_path = PathBuf::from(path.trim());
            }
        }
        cfg.index_name = env::var("INDEX_NAME").unwrap_or(cfg.index_name);
        cfg.max_file_bytes = parsed("RAG_MAX_FILE_BYTES", cfg.max_file_bytes, &mut errors);
        cfg.chunk_size = parsed("RAG_CHUNK_SIZE", cfg.chunk_size, &mut errors);
        cfg.chunk_overlap = parsed("RAG_CHUNK_OVERLAP", cfg.chunk_overlap, &mut errors);
        cfg.top_k = parsed("RAG_TOP_K", cfg.top_k, &mut errors);
        cfg.embed_batch_size = parsed("RAG_EMBED_BATCH_SIZE", cfg.embed_batch_size, &mut errors);
        cfg.index_ready_timeout = Duration::from_secs(parsed(
            "INDEX_READY_TIMEOUT_SECS",
            cfg.index_ready_timeout.as_secs(),
            &mut errors,
        ));
        cfg.index_poll_interval = Duration::from_millis(parsed(
            "INDEX_POLL_INTERVAL_MS",
            cfg.index_poll_interval.as_millis() as u64,
            &mut errors,
        ));
        cfg.http_timeout = Duration::from_secs(parsed(
            "HTTP_TIMEOUT_SECS",
            cfg.http_timeout.as_secs(),
            &mut errors,
        ));
        cfg.vector_backend = parsed("VECTOR_BACKEND", cfg.vector_backend, &mut errors);
        cfg.qdrant_url = env::var("QDRANT_URL").unwrap_or(cfg.qdrant_url);
        cfg.qdrant_api_key = non_empty_var("QDRANT_API_KEY");
        cfg.embed_provider = parsed("EMBED_PROVIDER", cfg.embed_provider, &mut errors);
        cfg.llm_provider = parsed("LLM_PROVIDER", cfg.llm_provider, &mut errors);
        cfg.openai_api_key = non_empty_var("OPENAI_API_KEY");
        cfg.openai_base_url = env::var("OPENAI_BASE_URL").unwrap_or(cfg.openai_base_url);
        cfg.openai_embed_model = env::var("OPENAI_EMBED_MODEL").unwrap_or(cfg.openai_embed_model);
        cfg.openai_chat_model = env::var("OPENAI_CHAT_MODEL").unwrap_or(cfg.openai_chat_model);
        cfg.temperature = parsed("LLM_TEMPERATURE", cfg.temperature, &mut errors);
        cfg.ollama_url = env::var("OLLAMA_URL").unwrap_or(cfg.ollama_url);
        cfg.ollama_embed_model = env::var("OLLAMA_EMBED_MODEL").unwrap_or(cfg.ollama_embed_model);
        cfg.ollama_chat_model = env::var("OLLAMA_CHAT_MODEL").unwrap_or(cfg.ollama_chat_model);
        // Unset EMBED_DIMENSION follows the chosen model, so switching to Ollama
        // does not leave a 1536-d index behind a 768-d model.
        let model_dimension =
            known_embedding_dimension(cfg.embed_model()).unwrap_or(cfg.embedding_dimension);
        cfg.embedding_dimension = parsed("EMBED_DIMENSION", model_dimension, &mut errors);

        errors.extend(cfg.validation_errors());
        if errors.is_empty() {
            Ok(cfg)
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    /// Embedding model of the selected provider.
    pub fn embed_model(&self) -> &str {
        match self.embed_provider {
            ProviderKind::OpenAi => &self.openai_embed_model,
            ProviderKind::Ollama => &self.ollama_embed_model,
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    /// Collects every problem instead of stopping at the first one.
    fn validation_errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.chunk_size == 0 {
            errors.push(ValidationError::new("RAG_CHUNK_SIZE", "must be greater than 0"));
        } else if self.chunk_overlap >= self.chunk_size {
            errors.push(ValidationError::new(
                "RAG_CHUNK_OVERLAP",
                format!(
                    "overlap {} must be smaller than chunk size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            ));
        }
        if self.embedding_dimension == 0 {
            errors.push(ValidationError::new("EMBED_DIMENSION", "must be greater than 0"));
        }
        if self.top_k == 0 {
            errors.push(ValidationError::new("RAG_TOP_K", "must be greater than 0"));
        }
        if self.embed_batch_size == 0 {
            errors.push(ValidationError::new(
                "RAG_EMBED_BATCH_SIZE",
                "must be greater than 0",
            ));
        }
        if self.index_name.trim().is_empty() {
            errors.push(ValidationError::new("INDEX_NAME", "must not be empty"));
        }
        if self.index_poll_interval.is_zero() {
            errors.push(ValidationError::new(
                "INDEX_POLL_INTERVAL_MS",
                "must be greater than 0",
            ));
        }
        // OpenAI text-embedding-3 models can be shortened, Ollama models cannot.
        if self.embed_provider == ProviderKind::Ollama {
            if let Some(native) = known_embedding_dimension(&self.ollama_embed_model) {
                if native != self.embedding_dimension {
                    errors.push(ValidationError::new(
                        "EMBED_DIMENSION",
                        format!(
                            "{} produces {}-d vectors but {} is configured",
                            self.ollama_embed_model, native, self.embedding_dimension
                        ),
                    ));
                }
            }
        }
        let needs_openai_key = self.embed_provider == ProviderKind::OpenAi
            || self.llm_provider == ProviderKind::OpenAi;
        if needs_openai_key && self.openai_api_key.is_none() {
            errors.push(ValidationError::new(
                "OPENAI_API_KEY",
                "required when EMBED_PROVIDER or LLM_PROVIDER is openai",
            ));
        }
        errors
    }
}

/// Native output size of common embedding models. Ollama tags (`:latest`)
/// are ignored.
pub fn known_embedding_dimension(model: &str) -> Option<usize> {
    let name = model.trim().split(':').next().unwrap_or_default();
    match name {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" | "snowflake-arctic-embed" | "bge-m3" => Some(1024),
        "all-minilm" => Some(384),
        _ => None,
    }
}

fn parsed<T: FromStr>(key: &str, default: T, errors: &mut Vec<ValidationError>) -> T
where
    T::Err: ToString,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(err) => {
                errors.push(ValidationError::new(
                    key,
                    format!("cannot parse '{}': {}", raw, err.to_string()),
                ));
                default
            }
        },
        _ => default,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> Config {
        Config {
            embed_provider: ProviderKind::Ollama,
            llm_provider: ProviderKind::Ollama,
            embedding_dimension: 768,
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.chunk_overlap, 200);
        assert_eq!(cfg.top_k, 5);
        assert_eq!(cfg.embedding_dimension, 1536);
    }

    #[test]
    fn offline_defaults_validate() {
        assert!(offline().validate().is_ok());
    }

    #[test]
    fn collects_all_validation_errors() {
        let cfg = Config {
            chunk_size: 100,
            chunk_overlap: 100,
            top_k: 0,
            index_name: " ".to_string(),
            ..offline()
        };
        match cfg.validate() {
            Err(RagError::ConfigValidation { errors }) => {
                let keys: Vec<&str> = errors.iter().map(|e| e.key.as_str()).collect();
                assert_eq!(keys, vec!["RAG_CHUNK_OVERLAP", "RAG_TOP_K", "INDEX_NAME"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn openai_providers_need_a_key() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn knows_native_model_dimensions() {
        assert_eq!(known_embedding_dimension("nomic-embed-text:latest"), Some(768));
        assert_eq!(known_embedding_dimension("text-embedding-3-large"), Some(3072));
        assert_eq!(known_embedding_dimension("my-custom-embedder"), None);
        assert_eq!(offline().embed_model(), "nomic-embed-text");
        assert_eq!(Config::default().embed_model(), "text-embedding-3-small");
    }

    #[test]
    fn ollama_model_must_match_configured_dimension() {
        let cfg = Config {
            embedding_dimension: 1536,
            ..offline()
        };
        match cfg.validate() {
            Err(RagError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].key, "EMBED_DIMENSION");
                assert!(errors[0].message.contains("768"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let unknown = Config {
            ollama_embed_model: "my-custom-embedder".to_string(),
            embedding_dimension: 1536,
            ..offline()
        };
        assert!(unknown.validate().is_ok());
    }

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!(" memory ".parse::<VectorBackend>(), Ok(VectorBackend::Memory));
        assert!("pinecone".parse::<VectorBackend>().is_err());
    }
}
