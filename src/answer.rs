//! Grounded completion: retrieved chunks → structured prompt → generated
//! answer.
//!
//! When retrieval produced chunks, a single system instruction embeds each
//! one labeled with its source file and similarity score, followed by the
//! behavioral rules (answer only from the given context, admit when the
//! answer is not there, keep a natural tone). When retrieval came back
//! empty, a distinct instruction asks the model to say plainly that no
//! relevant content was found, never to fabricate one.
//!
//! Prompt assembly is a pure function; the completion call goes through the
//! [`CompletionBackend`] seam with the same retry policy as the embedding
//! client.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::models::SearchResult;

/// Completion/provider error. Mirrors the embedding client's split between
/// rate limits (retryable) and everything else.
#[derive(Debug)]
pub enum CompletionError {
    RateLimited(String),
    /// `status: None` means a transport error or timeout (retryable).
    Provider { status: Option<u16>, body: String },
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::RateLimited(_) => true,
            CompletionError::Provider { status: None, .. } => true,
            CompletionError::Provider {
                status: Some(s), ..
            } => *s >= 500,
        }
    }
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionError::RateLimited(body) => {
                write!(f, "completion rate limit (429): {}", body)
            }
            CompletionError::Provider {
                status: Some(s),
                body,
            } => write!(f, "completion error {}: {}", s, body),
            CompletionError::Provider { status: None, body } => {
                write!(f, "completion request failed: {}", body)
            }
        }
    }
}

impl std::error::Error for CompletionError {}

/// One message in a conversation, in the shape the completion service
/// expects: `{role, content}` with role `system`, `user`, or `assistant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Trait for completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// One provider call, no retry.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError>;
}

/// Build the system instruction for a non-empty retrieval: each chunk
/// labeled with its source file and similarity, then the behavioral rules.
pub fn build_grounded_instruction(chunks: &[SearchResult]) -> String {
    let mut prompt = String::from(
        "You answer questions using only the document excerpts below. \
         Each excerpt is labeled with its source file and relevance score.\n\n",
    );

    for chunk in chunks {
        let _ = writeln!(
            prompt,
            "[source: {} (similarity {:.2})]\n{}\n",
            chunk.file_name, chunk.similarity, chunk.content
        );
    }

    prompt.push_str(
        "Answer only from the excerpts above. If the answer is not present \
         in them, say so plainly instead of guessing. Keep a natural, \
         conversational tone and use paragraph breaks where they help.",
    );

    prompt
}

/// System instruction for an empty retrieval: no fabrication.
pub fn build_no_context_instruction() -> String {
    "No relevant content was found in the uploaded documents for this \
     question. Tell the user plainly that the documents do not cover it. \
     Do not invent or assume an answer."
        .to_string()
}

/// Answer a conversation grounded in the retrieved chunks (or explicitly
/// ungrounded when there are none). Temperature and the generation cap come
/// from configuration.
pub async fn answer(
    backend: &dyn CompletionBackend,
    config: &CompletionConfig,
    conversation: &[ChatMessage],
    retrieved: &[SearchResult],
) -> Result<String, CompletionError> {
    let instruction = if retrieved.is_empty() {
        build_no_context_instruction()
    } else {
        build_grounded_instruction(retrieved)
    };

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(instruction));
    messages.extend_from_slice(conversation);

    complete_with_retry(
        backend,
        &messages,
        config.temperature,
        config.max_tokens,
        config.max_retries,
    )
    .await
}

/// Call the completion backend with exponential backoff on retryable
/// errors.
pub async fn complete_with_retry(
    backend: &dyn CompletionBackend,
    messages: &[ChatMessage],
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
) -> Result<String, CompletionError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match backend.complete(messages, temperature, max_tokens).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt = attempt + 1, error = %e, "completion call failed, backing off");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| CompletionError::Provider {
        status: None,
        body: "completion failed after retries".to_string(),
    }))
}

/// Completion client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Provider {
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();

        if status.as_u16() == 429 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(CompletionError::RateLimited(body_text));
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Provider {
                status: Some(status.as_u16()),
                body: body_text,
            });
        }

        let json: serde_json::Value =
            resp.json().await.map_err(|e| CompletionError::Provider {
                status: None,
                body: format!("invalid completion response: {}", e),
            })?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CompletionError::Provider {
                status: None,
                body: "completion response missing choices[0].message.content".to_string(),
            })
    }
}
