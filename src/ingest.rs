//! Ingestion pipeline orchestration.
//!
//! One uploaded document flows through extract → sanitize → chunk →
//! embed → store as a single sequential run; only chunk embedding fans out,
//! over the bounded worker pool. Per-chunk embedding failures are logged
//! and dropped (the rest of the batch still lands) while extraction and
//! storage failures abort the run. The report says exactly what happened:
//! how many chunks were produced, embedded, skipped for size, and failed,
//! and whether that adds up to a complete or partial ingestion.
//!
//! Re-ingesting a document id replaces its previous chunks inside the same
//! transaction; duplicate chunk sets cannot occur.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{embed_all, ChunkEmbedding, EmbeddingBackend};
use crate::extract;
use crate::models::{ChunkMetadata, ChunkRecord, Document};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sanitize::sanitize;
use crate::store;

/// Ingestion request from the upload collaborator.
#[derive(Debug)]
pub struct IngestRequest {
    /// Stable document id from the caller; generated when absent. Passing
    /// the same id again replaces the previous ingestion.
    pub document_id: Option<String>,
    /// Display name, typically the uploaded file name.
    pub name: String,
    pub media_type: String,
    pub collection_id: Option<String>,
    pub payload: IngestPayload,
}

#[derive(Debug)]
pub enum IngestPayload {
    /// Text from a higher-fidelity client-side extractor; extraction is
    /// skipped and the text is sanitized and chunked directly.
    ExtractedText(String),
    /// Raw document bytes; full extraction runs.
    Bytes(Vec<u8>),
}

/// Whether every produced chunk made it into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Complete,
    /// Some chunks were skipped for size or failed to embed; the surviving
    /// chunks are stored and counted below.
    Partial,
}

/// What one ingestion run actually did.
#[derive(Debug)]
pub struct IngestReport {
    pub document_id: String,
    pub status: IngestStatus,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub chunks_skipped: usize,
    pub chunks_failed: usize,
    /// Extraction units dropped by the processing cap (PDF fallback only).
    pub units_skipped: usize,
    pub replaced_existing: bool,
}

/// Ingest one document. Extraction failures abort the run with a typed,
/// user-facing message; embedding failures drop only the affected chunks;
/// the final store write is all-or-nothing.
pub async fn ingest_document(
    pool: &SqlitePool,
    config: &Config,
    backend: Arc<dyn EmbeddingBackend>,
    request: IngestRequest,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let byte_size = match &request.payload {
        IngestPayload::ExtractedText(text) => text.len() as i64,
        IngestPayload::Bytes(bytes) => bytes.len() as i64,
    };

    let (raw_text, units_skipped) = match &request.payload {
        IngestPayload::ExtractedText(text) => (text.clone(), 0),
        IngestPayload::Bytes(bytes) => {
            progress.report(IngestProgressEvent::Extracting {
                document: request.name.clone(),
            });
            let extraction = extract::extract_text(bytes, &request.media_type)
                .with_context(|| format!("Failed to extract text from {}", request.name))?;
            if extraction.units_skipped > 0 {
                tracing::warn!(
                    document = %request.name,
                    skipped = extraction.units_skipped,
                    "extraction cap reached, some text units were not processed"
                );
            }
            (extraction.text, extraction.units_skipped)
        }
    };

    let text = sanitize(&raw_text);
    if text.is_empty() {
        bail!("{} contains no text after sanitization", request.name);
    }

    progress.report(IngestProgressEvent::Chunking {
        document: request.name.clone(),
    });
    let chunk_texts = chunk_text(
        &text,
        config.chunking.max_chunk_size,
        config.chunking.overlap,
    );
    let chunks_total = chunk_texts.len();

    let document_name = request.name.clone();
    let outcomes = embed_all(
        backend,
        chunk_texts.clone(),
        config.embedding.concurrency,
        config.embedding.max_retries,
        config.embedding.max_input_tokens,
        |n, total| {
            progress.report(IngestProgressEvent::Embedding {
                document: document_name.clone(),
                n: n as u64,
                total: total as u64,
            });
        },
    )
    .await;

    let document_id = request
        .document_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    let mut records = Vec::with_capacity(chunks_total);
    let mut chunks_skipped = 0usize;
    let mut chunks_failed = 0usize;

    for (index, (content, outcome)) in chunk_texts.into_iter().zip(outcomes).enumerate() {
        match outcome {
            ChunkEmbedding::Embedded(embedding) => records.push(ChunkRecord {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                chunk_index: index as i64,
                total_chunks: chunks_total as i64,
                content,
                embedding,
                metadata: ChunkMetadata {
                    file_name: request.name.clone(),
                    file_size: byte_size,
                    chunk_index: index as i64,
                    total_chunks: chunks_total as i64,
                },
                created_at: now,
            }),
            ChunkEmbedding::Skipped { estimated_tokens } => {
                chunks_skipped += 1;
                tracing::warn!(
                    document = %request.name,
                    chunk_index = index,
                    estimated_tokens,
                    "chunk over the embedding token ceiling, skipped"
                );
            }
            ChunkEmbedding::Failed(e) => {
                chunks_failed += 1;
                tracing::warn!(
                    document = %request.name,
                    chunk_index = index,
                    error = %e,
                    "chunk embedding failed, dropped from batch"
                );
            }
        }
    }

    progress.report(IngestProgressEvent::Storing {
        document: request.name.clone(),
        chunks: records.len() as u64,
    });

    let document = Document {
        id: document_id.clone(),
        name: request.name.clone(),
        byte_size,
        media_type: request.media_type.clone(),
        collection_id: request.collection_id.clone(),
        content_hash: hash_text(&text),
        created_at: now,
    };

    let replaced_existing = store::persist_document(pool, &document, &records)
        .await
        .with_context(|| format!("Failed to store chunks for {}", request.name))?;

    let chunks_embedded = records.len();
    let status = if chunks_embedded == chunks_total {
        IngestStatus::Complete
    } else {
        IngestStatus::Partial
    };

    tracing::info!(
        document = %request.name,
        document_id = %document_id,
        chunks_total,
        chunks_embedded,
        chunks_skipped,
        chunks_failed,
        replaced_existing,
        "ingestion finished"
    );

    Ok(IngestReport {
        document_id,
        status,
        chunks_total,
        chunks_embedded,
        chunks_skipped,
        chunks_failed,
        units_skipped,
        replaced_existing,
    })
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
