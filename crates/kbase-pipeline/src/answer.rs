//! Answer synthesis over retrieved chunks.
//!
//! A single chat-completion request against an OpenAI-compatible endpoint.
//! When no endpoint is configured the retrieved excerpts are returned as-is.

use std::env;
use std::fmt::Write as _;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use kbase_core::config::AnswerSettings;
use kbase_core::{Error, Result, SearchHit};

const SYSTEM_PROMPT: &str = "You answer questions using only the excerpts from the user's personal knowledge base. \
Cite the source file of every fact you use. If the excerpts do not contain the answer, say so.";

/// Characters of each excerpt kept in the fallback answer.
const EXCERPT_CHARS: usize = 500;

/// Turns a question and its retrieved context into prose.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn answer(&self, question: &str, context: &[SearchHit]) -> Result<String>;
}

/// The context block sent to the model: numbered excerpts with their sources.
pub fn format_context(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(out, "[{}] (source: {}", i + 1, hit.metadata.source_file);
        if let Some(page) = hit.metadata.get("page") {
            let _ = write!(out, ", page {page}");
        }
        let _ = writeln!(out, ")\n{}\n", hit.text.trim());
    }
    out
}

/// What `ask` returns when no model is configured.
pub fn excerpts_answer(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No relevant content was found in the knowledge base. Try another question or add more documents."
            .to_string();
    }
    let mut out = String::from("Relevant passages from the knowledge base:\n\n");
    for (i, hit) in hits.iter().enumerate() {
        let flat = hit.text.replace('\n', " ");
        let excerpt: String = flat.chars().take(EXCERPT_CHARS).collect();
        let ellipsis = if flat.chars().count() > EXCERPT_CHARS { "..." } else { "" };
        let _ = write!(out, "Passage {}:\n{excerpt}{ellipsis}\nSource: {}\n\n", i + 1, hit.metadata.source_file);
    }
    out.trim_end().to_string()
}

/// OpenAI-compatible `/chat/completions` client (DeepSeek, OpenAI, local
/// llama.cpp or vLLM servers).
pub struct ChatCompletionsAnswerer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsAnswerer {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }

    /// `None` unless both `base_url` and `model` are set. The key is read
    /// from the environment variable named by `api_key_env`.
    pub fn from_settings(settings: &AnswerSettings) -> Option<Self> {
        let (Some(base_url), Some(model)) = (&settings.base_url, &settings.model) else {
            return None;
        };
        let mut answerer = Self::new(base_url, model.clone());
        answerer.temperature = settings.temperature;
        answerer.max_tokens = settings.max_tokens;
        answerer.api_key = env::var(&settings.api_key_env).ok().filter(|k| !k.trim().is_empty());
        Some(answerer)
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client errors other than timeouts and throttling mean the request itself
/// is wrong (bad key, unknown model) and are not worth repeating.
fn status_error(endpoint: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("{endpoint} returned {status}: {body}");
    let retryable = matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS);
    if status.is_client_error() && !retryable {
        return Error::InvalidConfig(message);
    }
    Error::Answer(message)
}

fn user_prompt(question: &str, context: &[SearchHit]) -> String {
    format!("Knowledge base excerpts:\n\n{}\nQuestion: {question}", format_context(context))
}

#[async_trait]
impl AnswerGenerator for ChatCompletionsAnswerer {
    fn name(&self) -> &str { &self.model }

    async fn answer(&self, question: &str, context: &[SearchHit]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: user_prompt(question, context) },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Answer(format!("request to {} failed: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(status_error(&self.endpoint, status, &body));
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| Error::Answer(format!("unparseable completion: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Answer("completion had no content".to_string()))?;
        debug!(model = %self.model, chars = text.len(), "answer synthesized");
        Ok(text)
    }
}
