//! Embedding client for the external vector service.
//!
//! Defines the [`EmbeddingBackend`] trait and the [`HttpEmbeddingClient`]
//! implementation, which calls an OpenAI-compatible `/embeddings` endpoint
//! with an explicit timeout. Retry and concurrency live above the backend:
//! [`embed_with_retry`] applies exponential backoff to a single text, and
//! [`embed_all`] fans a batch out over a bounded worker pool, skipping
//! texts whose token estimate exceeds the provider ceiling before any call
//! is made.
//!
//! Also provides vector utilities shared with the store:
//! [`cosine_similarity`], [`vec_to_blob`], and [`blob_to_vec`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;

/// Rough token estimate without a real tokenizer: `ceil(len / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Embedding/provider error.
#[derive(Debug)]
pub enum EmbedError {
    /// HTTP 429 from the provider; retryable with backoff.
    RateLimited(String),
    /// Any other provider failure. `status: None` means a transport error
    /// or timeout (retryable); a 4xx status other than 429 is not.
    Provider { status: Option<u16>, body: String },
    /// The provider returned a vector of unexpected dimensionality.
    Dimensionality { expected: usize, actual: usize },
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::RateLimited(_) => true,
            EmbedError::Provider { status: None, .. } => true,
            EmbedError::Provider {
                status: Some(s), ..
            } => *s >= 500,
            EmbedError::Dimensionality { .. } => false,
        }
    }
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::RateLimited(body) => write!(f, "provider rate limit (429): {}", body),
            EmbedError::Provider {
                status: Some(s),
                body,
            } => write!(f, "provider error {}: {}", s, body),
            EmbedError::Provider { status: None, body } => {
                write!(f, "provider request failed: {}", body)
            }
            EmbedError::Dimensionality { expected, actual } => write!(
                f,
                "unexpected embedding dimensionality: expected {}, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Trait for embedding providers. The HTTP client implements it for the
/// real service; tests substitute deterministic or failing backends.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text. One provider call, no retry.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    /// Expected vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
}

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
}

impl HttpEmbeddingClient {
    /// Build a client from configuration. The API key is read from the
    /// environment variable the config names; all other options come from
    /// the config itself.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "encoding_format": "float",
        });

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider {
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();

        if status.as_u16() == 429 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbedError::RateLimited(body_text));
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Provider {
                status: Some(status.as_u16()),
                body: body_text,
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| EmbedError::Provider {
            status: None,
            body: format!("invalid embedding response: {}", e),
        })?;

        parse_embedding_response(&json)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Extract the first `data[].embedding` array from a provider response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Provider {
            status: None,
            body: "embedding response missing data[0].embedding".to_string(),
        })?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Embed one text with exponential backoff on retryable errors, rejecting
/// vectors whose dimensionality does not match the backend's contract.
pub async fn embed_with_retry(
    backend: &dyn EmbeddingBackend,
    text: &str,
    max_retries: u32,
) -> Result<Vec<f32>, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match backend.embed(text).await {
            Ok(vector) => {
                if vector.len() != backend.dims() {
                    return Err(EmbedError::Dimensionality {
                        expected: backend.dims(),
                        actual: vector.len(),
                    });
                }
                return Ok(vector);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt = attempt + 1, error = %e, "embedding call failed, backing off");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| EmbedError::Provider {
        status: None,
        body: "embedding failed after retries".to_string(),
    }))
}

/// Per-text outcome of a batch embedding run.
#[derive(Debug)]
pub enum ChunkEmbedding {
    Embedded(Vec<f32>),
    /// Token estimate exceeded the provider ceiling; no call was made.
    Skipped { estimated_tokens: usize },
    Failed(EmbedError),
}

/// Embed a batch of texts over a bounded worker pool.
///
/// Texts whose token estimate exceeds `max_input_tokens` are skipped
/// without a provider call. Each remaining text gets its own retry budget;
/// a text that exhausts it is reported as failed, not fatal to the batch.
/// Results come back in input order. `on_progress(done, total)` fires as
/// each outcome settles.
pub async fn embed_all(
    backend: Arc<dyn EmbeddingBackend>,
    texts: Vec<String>,
    concurrency: usize,
    max_retries: u32,
    max_input_tokens: usize,
    mut on_progress: impl FnMut(usize, usize),
) -> Vec<ChunkEmbedding> {
    enum Pending {
        Skipped(usize),
        Task(tokio::task::JoinHandle<Result<Vec<f32>, EmbedError>>),
    }

    let total = texts.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut pending = Vec::with_capacity(total);

    for text in texts {
        let estimated = estimate_tokens(&text);
        if estimated > max_input_tokens {
            tracing::warn!(
                estimated_tokens = estimated,
                ceiling = max_input_tokens,
                "chunk exceeds embedding token ceiling, skipping"
            );
            pending.push(Pending::Skipped(estimated));
            continue;
        }

        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        pending.push(Pending::Task(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            embed_with_retry(backend.as_ref(), &text, max_retries).await
        })));
    }

    let mut results = Vec::with_capacity(total);
    for (done, entry) in pending.into_iter().enumerate() {
        let outcome = match entry {
            Pending::Skipped(estimated_tokens) => ChunkEmbedding::Skipped { estimated_tokens },
            Pending::Task(handle) => match handle.await {
                Ok(Ok(vector)) => ChunkEmbedding::Embedded(vector),
                Ok(Err(e)) => ChunkEmbedding::Failed(e),
                Err(e) => ChunkEmbedding::Failed(EmbedError::Provider {
                    status: None,
                    body: format!("embedding task aborted: {}", e),
                }),
            },
        };
        on_progress(done + 1, total);
        results.push(outcome);
    }

    results
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths. Thresholds are configured in `[0, 1]`, so a
/// negatively-correlated chunk can never clear a valid threshold.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubBackend {
        dims: usize,
        fail_first: AtomicU32,
        rate_limited: bool,
    }

    impl StubBackend {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                fail_first: AtomicU32::new(0),
                rate_limited: true,
            }
        }

        fn failing_first(dims: usize, n: u32) -> Self {
            Self {
                dims,
                fail_first: AtomicU32::new(n),
                rate_limited: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for StubBackend {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return if self.rate_limited {
                    Err(EmbedError::RateLimited("slow down".to_string()))
                } else {
                    Err(EmbedError::Provider {
                        status: Some(400),
                        body: "bad request".to_string(),
                    })
                };
            }
            let seed = text.len() as f32;
            Ok((0..self.dims).map(|i| seed + i as f32).collect())
        }

        fn dims(&self) -> usize {
            self.dims
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_and_degenerate() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_rate_limits() {
        let backend = StubBackend::failing_first(4, 3);
        let vector = embed_with_retry(&backend, "hello", 5).await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_budget() {
        let backend = StubBackend::failing_first(4, 10);
        let err = embed_with_retry(&backend, "hello", 2).await.unwrap_err();
        assert!(matches!(err, EmbedError::RateLimited(_)));
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let backend = StubBackend {
            dims: 4,
            fail_first: AtomicU32::new(10),
            rate_limited: false,
        };
        let err = embed_with_retry(&backend, "hello", 5).await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::Provider {
                status: Some(400),
                ..
            }
        ));
        // Only one call was spent: the rest of the failure budget remains.
        assert_eq!(backend.fail_first.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn dimensionality_mismatch_is_rejected() {
        struct WrongDims;
        #[async_trait]
        impl EmbeddingBackend for WrongDims {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
                Ok(vec![0.5; 3])
            }
            fn dims(&self) -> usize {
                8
            }
            fn model_name(&self) -> &str {
                "wrong"
            }
        }
        let err = embed_with_retry(&WrongDims, "hello", 0).await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::Dimensionality {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_skips_oversize_and_keeps_order() {
        let backend = Arc::new(StubBackend::new(4));
        let texts = vec![
            "ok".to_string(),
            "x".repeat(100), // 25 estimated tokens, over the tiny ceiling
            "also ok".to_string(),
        ];
        let mut seen = Vec::new();
        let results = embed_all(backend, texts, 2, 0, 10, |done, total| {
            seen.push((done, total));
        })
        .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], ChunkEmbedding::Embedded(_)));
        assert!(matches!(
            results[1],
            ChunkEmbedding::Skipped {
                estimated_tokens: 25
            }
        ));
        assert!(matches!(results[2], ChunkEmbedding::Embedded(_)));
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_survives_flaky_provider() {
        // Fails the first 2 calls overall; per-text retry absorbs them.
        let backend = Arc::new(StubBackend::failing_first(4, 2));
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let results = embed_all(backend, texts, 2, 5, 1000, |_, _| {}).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, ChunkEmbedding::Embedded(_))));
    }
}
