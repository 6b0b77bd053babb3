use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, ProviderKind};
use crate::http::{bearer_headers, HttpClient, HttpError};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("{0}")]
    Provider(String),
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Http(err) if err.is_timeout())
    }
}

/// Completes a prompt into free-form text.
pub trait Generator: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

pub fn build_generator(cfg: &Config) -> Result<Arc<dyn Generator>, GenerationError> {
    Ok(match cfg.llm_provider {
        ProviderKind::Ollama => Arc::new(OllamaGenerator::new(cfg)?),
        ProviderKind::OpenAi => Arc::new(OpenAiGenerator::new(cfg)?),
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct Message<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

pub struct OllamaGenerator {
    http: HttpClient,
    url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message<'a>],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OllamaGenerator {
    pub fn new(cfg: &Config) -> Result<Self, GenerationError> {
        Ok(Self {
            http: HttpClient::new(cfg.http_timeout, Default::default())?,
            url: format!("{}/api/chat", cfg.ollama_url.trim_end_matches('/')),
            model: cfg.ollama_chat_model.clone(),
            temperature: cfg.temperature,
        })
    }
}

impl Generator for OllamaGenerator {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let messages = [Message {
            role: "user",
            content: prompt,
        }];
        let req = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };
        let res = self.http.post_json::<ChatResponse, _>(&self.url, &req)?;
        non_empty(res.message.and_then(|m| m.content))
    }
}

/// OpenAI-compatible `/chat/completions`.
pub struct OpenAiGenerator {
    http: HttpClient,
    endpoint: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [Message<'a>],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(cfg: &Config) -> Result<Self, GenerationError> {
        let api_key = cfg.openai_api_key.as_deref().unwrap_or_default();
        Ok(Self {
            http: HttpClient::new(cfg.http_timeout, bearer_headers(api_key)?)?,
            endpoint: format!(
                "{}/chat/completions",
                cfg.openai_base_url.trim_end_matches('/')
            ),
            model: cfg.openai_chat_model.clone(),
            temperature: cfg.temperature,
        })
    }
}

impl Generator for OpenAiGenerator {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let messages = [Message {
            role: "user",
            content: prompt,
        }];
        let req = CompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: &messages,
        };
        let parsed: CompletionResponse = self.http.post_json(&self.endpoint, &req)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(GenerationError::Provider(
                "response withheld by content filter".to_string(),
            ));
        }
        non_empty(choice.message.content)
    }
}

fn non_empty(content: Option<String>) -> Result<String, GenerationError> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(GenerationError::EmptyResponse),
    }
}
