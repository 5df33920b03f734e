//! Core data models used throughout Ragline.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// An uploaded source document. Immutable once stored, except for deletion
/// (which cascades to its chunks).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Display name, typically the uploaded file name.
    pub name: String,
    pub byte_size: i64,
    pub media_type: String,
    /// Optional scope for retrieval (the owning collection).
    pub collection_id: Option<String>,
    /// SHA-256 of the sanitized text, for spotting identical re-uploads.
    pub content_hash: String,
    pub created_at: i64,
}

/// A chunk of a document's sanitized text, with its embedding vector.
/// `0 <= chunk_index < total_chunks`; chunks in ordinal order reconstruct
/// the sanitized text modulo whitespace and overlap duplication.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub created_at: i64,
}

/// Free-form provenance metadata stored alongside each chunk.
/// `total_chunks` is computed at chunk time, independent of how many
/// chunks ultimately survive embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub file_size: i64,
    pub chunk_index: i64,
    pub total_chunks: i64,
}

/// A retrieval query. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub query: String,
    pub collection_id: Option<String>,
    pub max_results: usize,
    pub threshold: f32,
}

/// An enriched search result returned to retrieval callers. Request-scoped.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub similarity: f32,
    pub file_name: String,
    pub file_size: i64,
}

/// Retrieval entry-point response: the enriched results plus echoes of the
/// query text and result count.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchResult>,
}
