//! Persistent chunk + vector storage over SQLite.
//!
//! Chunks are written once at ingestion time and never mutated; the only
//! write paths are the transactional [`persist_document`] (which replaces
//! any prior chunk set for the document, so re-ingesting cannot duplicate)
//! and [`delete_document`] (which cascades to chunks via the foreign key).
//!
//! Similarity search fetches stored vectors and computes cosine similarity
//! in Rust, which is exact and plenty fast at this corpus scale. Results
//! are ordered by similarity descending with insertion order (rowid) as a
//! stable tie-break.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkRecord, Document};

/// A raw similarity match before document enrichment.
#[derive(Debug, Clone)]
pub struct RawMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub similarity: f32,
    pub metadata_json: String,
}

/// Store a document and its chunks in one transaction. Any chunks from a
/// previous ingestion of the same document id are replaced, never
/// duplicated. All-or-nothing: a failure mid-batch rolls the whole run
/// back. Returns `true` when an existing document was replaced.
pub async fn persist_document(
    pool: &SqlitePool,
    document: &Document,
    chunks: &[ChunkRecord],
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?")
        .bind(&document.id)
        .fetch_optional(&mut *tx)
        .await?;
    let replaced = existing.is_some();

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, name, byte_size, media_type, collection_id, content_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            byte_size = excluded.byte_size,
            media_type = excluded.media_type,
            collection_id = excluded.collection_id,
            content_hash = excluded.content_hash
        "#,
    )
    .bind(&document.id)
    .bind(&document.name)
    .bind(document.byte_size)
    .bind(&document.media_type)
    .bind(&document.collection_id)
    .bind(&document.content_hash)
    .bind(document.created_at)
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, total_chunks, content, embedding, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .bind(&chunk.content)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(metadata_json)
        .bind(chunk.created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.context("Failed to commit chunk batch")?;
    Ok(replaced)
}

/// Cosine similarity search over stored chunks.
///
/// Returns at most `top_k` matches with `similarity >= threshold`, ordered
/// by similarity descending; equal scores keep insertion order. An optional
/// `collection_id` restricts the search scope.
pub async fn similarity_search(
    pool: &SqlitePool,
    query_vector: &[f32],
    threshold: f32,
    top_k: usize,
    collection_id: Option<&str>,
) -> Result<Vec<RawMatch>> {
    let rows = if let Some(scope) = collection_id {
        sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.content, c.embedding, c.metadata_json
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection_id = ?
            ORDER BY c.rowid
            "#,
        )
        .bind(scope)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.content, c.embedding, c.metadata_json
            FROM chunks c
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(pool)
        .await?
    };

    let mut matches: Vec<RawMatch> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            RawMatch {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                content: row.get("content"),
                similarity: cosine_similarity(query_vector, &vector),
                metadata_json: row.get("metadata_json"),
            }
        })
        .filter(|m| m.similarity >= threshold)
        .collect();

    // Stable sort keeps rowid order for equal scores.
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(top_k);

    Ok(matches)
}

/// Delete a document; chunks go with it (FK cascade). Returns `true` when
/// a document was actually removed.
pub async fn delete_document(pool: &SqlitePool, document_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Batched lookup of document display names and sizes, for result
/// enrichment. One query regardless of how many ids are passed.
pub async fn fetch_document_names(
    pool: &SqlitePool,
    ids: &[String],
) -> Result<HashMap<String, (String, i64)>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, name, byte_size FROM documents WHERE id IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get::<String, _>("id"),
                (row.get::<String, _>("name"), row.get::<i64, _>("byte_size")),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("store.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    fn make_document(id: &str, collection: Option<&str>) -> Document {
        Document {
            id: id.to_string(),
            name: format!("{}.txt", id),
            byte_size: 100,
            media_type: "text/plain".to_string(),
            collection_id: collection.map(str::to_string),
            content_hash: "hash".to_string(),
            created_at: 1_700_000_000,
        }
    }

    fn make_chunk(id: &str, document_id: &str, index: i64, total: i64, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            content: format!("content of {}", id),
            embedding: vector,
            metadata: ChunkMetadata {
                file_name: format!("{}.txt", document_id),
                file_size: 100,
                chunk_index: index,
                total_chunks: total,
            },
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn self_match_scores_one_and_ranks_first() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks = vec![
            make_chunk("c1", "doc1", 0, 2, vec![1.0, 0.0, 0.0, 0.0]),
            make_chunk("c2", "doc1", 1, 2, vec![0.0, 1.0, 0.0, 0.0]),
        ];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0, 0.0, 0.0], 0.0, 10, None)
            .await
            .unwrap();
        assert_eq!(matches[0].chunk_id, "c1");
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn threshold_excludes_low_similarity() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks = vec![
            make_chunk("near", "doc1", 0, 2, vec![1.0, 0.0]),
            make_chunk("far", "doc1", 1, 2, vec![0.0, 1.0]),
        ];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        for threshold in [0.1, 0.3, 0.5, 0.9, 1.0] {
            let matches = similarity_search(&pool, &[1.0, 0.0], threshold, 10, None)
                .await
                .unwrap();
            assert!(
                matches.iter().all(|m| m.similarity >= threshold),
                "threshold {} leaked a lower match",
                threshold
            );
            assert!(matches.iter().all(|m| m.chunk_id != "far"));
        }
    }

    #[tokio::test]
    async fn top_k_limits_results() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks: Vec<ChunkRecord> = (0..10)
            .map(|i| make_chunk(&format!("c{}", i), "doc1", i, 10, vec![1.0, 0.0]))
            .collect();
        persist_document(&pool, &doc, &chunks).await.unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 3, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 3);
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks = vec![
            make_chunk("first", "doc1", 0, 3, vec![1.0, 0.0]),
            make_chunk("second", "doc1", 1, 3, vec![1.0, 0.0]),
            make_chunk("third", "doc1", 2, 3, vec![1.0, 0.0]),
        ];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 10, None)
            .await
            .unwrap();
        let order: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn empty_scope_returns_empty_without_error() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", Some("col-a"));
        let chunks = vec![make_chunk("c1", "doc1", 0, 1, vec![1.0, 0.0])];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 10, Some("col-b"))
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn scope_filter_restricts_to_collection() {
        let (_tmp, pool) = test_pool().await;
        persist_document(
            &pool,
            &make_document("doc-a", Some("col-a")),
            &[make_chunk("ca", "doc-a", 0, 1, vec![1.0, 0.0])],
        )
        .await
        .unwrap();
        persist_document(
            &pool,
            &make_document("doc-b", Some("col-b")),
            &[make_chunk("cb", "doc-b", 0, 1, vec![1.0, 0.0])],
        )
        .await
        .unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 10, Some("col-a"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk_id, "ca");
    }

    #[tokio::test]
    async fn cascade_delete_removes_chunks() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks = vec![make_chunk("c1", "doc1", 0, 1, vec![1.0, 0.0])];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        assert!(delete_document(&pool, "doc1").await.unwrap());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 10, None)
            .await
            .unwrap();
        assert!(matches.is_empty());

        assert!(!delete_document(&pool, "doc1").await.unwrap());
    }

    #[tokio::test]
    async fn reingest_replaces_instead_of_duplicating() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let first = vec![
            make_chunk("c1", "doc1", 0, 2, vec![1.0, 0.0]),
            make_chunk("c2", "doc1", 1, 2, vec![1.0, 0.0]),
        ];
        let replaced = persist_document(&pool, &doc, &first).await.unwrap();
        assert!(!replaced);

        let second = vec![make_chunk("c3", "doc1", 0, 1, vec![0.0, 1.0])];
        let replaced = persist_document(&pool, &doc, &second).await.unwrap();
        assert!(replaced);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind("doc1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn metadata_roundtrips() {
        let (_tmp, pool) = test_pool().await;
        let doc = make_document("doc1", None);
        let chunks = vec![make_chunk("c1", "doc1", 0, 1, vec![1.0, 0.0])];
        persist_document(&pool, &doc, &chunks).await.unwrap();

        let matches = similarity_search(&pool, &[1.0, 0.0], 0.0, 10, None)
            .await
            .unwrap();
        let metadata: ChunkMetadata = serde_json::from_str(&matches[0].metadata_json).unwrap();
        assert_eq!(metadata, chunks[0].metadata);
    }

    #[tokio::test]
    async fn batched_name_lookup() {
        let (_tmp, pool) = test_pool().await;
        persist_document(&pool, &make_document("doc-a", None), &[])
            .await
            .unwrap();
        persist_document(&pool, &make_document("doc-b", None), &[])
            .await
            .unwrap();

        let names = fetch_document_names(
            &pool,
            &["doc-a".to_string(), "doc-b".to_string(), "missing".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names["doc-a"].0, "doc-a.txt");
        assert_eq!(names["doc-b"].1, 100);
    }
}
