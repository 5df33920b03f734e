//! Query-time retrieval: query text → embedding → similarity search →
//! enriched results.
//!
//! Retrieval is stateless and side-effect-free apart from the outbound
//! embedding call. Failures are typed: an empty result list is a valid,
//! non-error outcome, and callers must be able to tell it apart from a
//! failed search, so errors are never swallowed into an empty list.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding::{embed_with_retry, EmbedError, EmbeddingBackend};
use crate::models::{RetrievalQuery, RetrievalResponse, SearchResult};
use crate::store;

/// Retrieval error. `InvalidQuery` is a caller error; the other variants
/// wrap the failing stage.
#[derive(Debug)]
pub enum RetrieveError {
    /// Empty or whitespace-only query text.
    InvalidQuery,
    /// Embedding the query failed.
    Embedding(EmbedError),
    /// The store query failed.
    Storage(anyhow::Error),
}

impl std::fmt::Display for RetrieveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrieveError::InvalidQuery => write!(f, "query text is empty"),
            RetrieveError::Embedding(e) => write!(f, "failed to embed query: {}", e),
            RetrieveError::Storage(e) => write!(f, "search failed: {}", e),
        }
    }
}

impl std::error::Error for RetrieveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetrieveError::InvalidQuery => None,
            RetrieveError::Embedding(e) => Some(e),
            RetrieveError::Storage(e) => Some(e.as_ref()),
        }
    }
}

/// Run a retrieval query and enrich the matches with source-document
/// metadata. The document lookup is one batched query, not one per result.
pub async fn retrieve(
    pool: &SqlitePool,
    backend: &dyn EmbeddingBackend,
    query: &RetrievalQuery,
    max_retries: u32,
) -> Result<Vec<SearchResult>, RetrieveError> {
    if query.query.trim().is_empty() {
        return Err(RetrieveError::InvalidQuery);
    }

    let query_vector = embed_with_retry(backend, &query.query, max_retries)
        .await
        .map_err(RetrieveError::Embedding)?;

    let matches = store::similarity_search(
        pool,
        &query_vector,
        query.threshold,
        query.max_results,
        query.collection_id.as_deref(),
    )
    .await
    .map_err(RetrieveError::Storage)?;

    if matches.is_empty() {
        return Ok(Vec::new());
    }

    let mut document_ids: Vec<String> = matches.iter().map(|m| m.document_id.clone()).collect();
    document_ids.sort();
    document_ids.dedup();

    let names = store::fetch_document_names(pool, &document_ids)
        .await
        .map_err(RetrieveError::Storage)?;

    Ok(matches
        .into_iter()
        .map(|m| {
            let (file_name, file_size) = names
                .get(&m.document_id)
                .cloned()
                .unwrap_or_else(|| ("(unknown)".to_string(), 0));
            SearchResult {
                chunk_id: m.chunk_id,
                document_id: m.document_id,
                content: m.content,
                similarity: m.similarity,
                file_name,
                file_size,
            }
        })
        .collect())
}

/// Retrieval entry point for external callers: applies config defaults for
/// limit and threshold, and echoes the query and result count back.
pub async fn run_retrieval(
    pool: &SqlitePool,
    config: &Config,
    backend: &dyn EmbeddingBackend,
    query_text: &str,
    collection_id: Option<String>,
    max_results: Option<usize>,
    threshold: Option<f32>,
) -> Result<RetrievalResponse, RetrieveError> {
    let query = RetrievalQuery {
        query: query_text.to_string(),
        collection_id,
        max_results: max_results.unwrap_or(config.retrieval.max_results),
        threshold: threshold.unwrap_or(config.retrieval.threshold),
    };

    let results = retrieve(pool, backend, &query, config.embedding.max_retries).await?;

    Ok(RetrievalResponse {
        query: query.query,
        count: results.len(),
        results,
    })
}
