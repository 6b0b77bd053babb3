use std::sync::Arc;

use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;

use crate::build_prompt::build_prompt_with_context;
use crate::document::{DocumentMetadata, ScoredChunk};
use crate::error::Result;
use crate::generate::Generator;

/// Characters of chunk text shown per source in a `QueryResponse`.
pub const SOURCE_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    /// Model output as returned, markdown with the four HR sections
    pub markdown: String,
    /// `markdown` rendered for direct display
    pub html: String,
    pub sources: Vec<ScoredChunk>,
}

/// Caller-facing shape of a query result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceRef {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl From<&Answer> for QueryResponse {
    fn from(answer: &Answer) -> Self {
        Self {
            answer: answer.html.clone(),
            sources: answer
                .sources
                .iter()
                .map(|hit| SourceRef {
                    content: preview(&hit.chunk.text, SOURCE_PREVIEW_CHARS),
                    metadata: hit.chunk.metadata.clone(),
                })
                .collect(),
        }
    }
}

/// Fills the HR prompt, calls the model once and renders the result.
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub fn synthesize(&self, question: &str, sources: Vec<ScoredChunk>) -> Result<Answer> {
        let (prompt, context) = build_prompt_with_context(question, &sources);
        tracing::debug!(
            "Prompting model with {} sources ({} context chars)",
            sources.len(),
            context.chars().count()
        );
        let markdown = self.generator.complete(&prompt).map_err(|err| {
            if err.is_timeout() {
                tracing::error!("Model did not answer before the HTTP timeout: {}", err);
            } else {
                tracing::error!("Generation failed: {}", err);
            }
            err
        })?;
        Ok(Answer {
            html: render_markdown(&markdown),
            markdown,
            sources,
        })
    }
}

pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// First `max_chars` characters followed by `...` when the text is longer.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
