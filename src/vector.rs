//! Namespace-scoped vector store over SQLite.
//!
//! Each row in `documents` carries its chunk content, its owning namespace
//! (the repository id), and its embedding as an f32 BLOB. Similarity search
//! restricts to one namespace in SQL — tenant isolation happens at the
//! storage layer, not in query assembly — and ranks by cosine similarity
//! computed in Rust.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::ScoredChunk;

/// One chunk ready for persistence: sanitized content plus its embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Replace a namespace's records: delete everything the namespace owns,
/// then insert the new rows — all inside one transaction, so partial
/// creation is never observable and no stale chunks survive a reimport.
pub async fn replace_namespace(
    pool: &SqlitePool,
    namespace_id: &str,
    records: &[VectorRecord],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM documents WHERE namespace_id = ?")
        .bind(namespace_id)
        .execute(&mut *tx)
        .await?;

    for record in records {
        sqlx::query(
            "INSERT INTO documents (id, content, namespace_id, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.content)
        .bind(namespace_id)
        .bind(vec_to_blob(&record.embedding))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove all records for a namespace.
pub async fn delete_namespace(pool: &SqlitePool, namespace_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE namespace_id = ?")
        .bind(namespace_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Number of records stored for a namespace.
pub async fn count_namespace(pool: &SqlitePool, namespace_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE namespace_id = ?")
        .bind(namespace_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Top-`k` most similar chunks within one namespace, most-similar first.
/// Returns fewer than `k` results if fewer records exist.
pub async fn similarity_search(
    pool: &SqlitePool,
    namespace_id: &str,
    query_vector: &[f32],
    k: usize,
) -> Result<Vec<ScoredChunk>> {
    let rows = sqlx::query("SELECT content, embedding FROM documents WHERE namespace_id = ?")
        .bind(namespace_id)
        .fetch_all(pool)
        .await?;

    let mut scored: Vec<ScoredChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            ScoredChunk {
                content: row.get("content"),
                score: cosine_similarity(query_vector, &vector),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);

    Ok(scored)
}
