//! SQLite-backed [`Catalog`], [`DenseIndex`], and [`SparseIndex`].
//!
//! All three share one `SqlitePool`. The sparse index is an FTS5 virtual
//! table ranked by SQLite's built-in `bm25()`; the dense index stores
//! little-endian f32 BLOBs and computes cosine similarity in Rust.
//! Both query paths join on `chunks.status = 'committed'`, so chunks
//! mid-ingestion are never visible.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::{Chunk, ChunkStatus, DocumentRecord, DocumentStatus, PageDraft};

use super::{Catalog, DenseIndex, SearchHit, SparseIndex};

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let path_json: String = row.get("hierarchy_path");
    let hierarchy_path: Vec<String> = serde_json::from_str(&path_json).unwrap_or_default();
    let status: String = row.get("status");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        subject: row.get("subject"),
        chunk_index: row.get("chunk_index"),
        hierarchy_path,
        text: row.get("text"),
        char_len: row.get::<i64, _>("char_len") as usize,
        hash: row.get("hash"),
        status: ChunkStatus::parse(&status).unwrap_or(ChunkStatus::Pending),
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn replace_document(
        &self,
        doc: &DocumentRecord,
        pages: &[PageDraft],
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A re-ingested path keeps its prior document id's rows around
        // unless we clear them; look the old id up first.
        let old_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE subject = ? AND source_path = ?")
                .bind(&doc.subject)
                .bind(&doc.source_path)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(old_id) = old_id {
            sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
                .bind(&old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
                .bind(&old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                .bind(&old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM pages WHERE document_id = ?")
                .bind(&old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(&old_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (id, subject, title, source_path, page_count, dedup_hash, status, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.subject)
        .bind(&doc.title)
        .bind(&doc.source_path)
        .bind(doc.page_count as i64)
        .bind(&doc.dedup_hash)
        .bind(doc.status.as_str())
        .bind(doc.ingested_at)
        .execute(&mut *tx)
        .await?;

        for page in pages {
            sqlx::query(
                r#"
                INSERT INTO pages (document_id, page_no, method, layout, raw_text, char_count)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.id)
            .bind(page.page_no as i64)
            .bind(page.method.as_str())
            .bind(page.layout.as_str())
            .bind(&page.raw_text)
            .bind(page.raw_text.chars().count() as i64)
            .execute(&mut *tx)
            .await?;
        }

        for chunk in chunks {
            let path_json = serde_json::to_string(&chunk.hierarchy_path)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, subject, chunk_index, hierarchy_path, text, char_len, hash, status)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending')
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.subject)
            .bind(chunk.chunk_index)
            .bind(&path_json)
            .bind(&chunk.text)
            .bind(chunk.char_len as i64)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_chunk_status(&self, chunk_id: &str, status: ChunkStatus) -> Result<()> {
        sqlx::query("UPDATE chunks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_dedup_hash(&self, subject: &str, source_path: &str) -> Result<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT dedup_hash FROM documents WHERE subject = ? AND source_path = ?",
        )
        .bind(subject)
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            "SELECT id, document_id, subject, chunk_index, hierarchy_path, text, char_len, hash, status FROM chunks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(chunk_from_row))
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.get_chunk(id).await? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}

#[derive(Clone)]
pub struct SqliteDenseIndex {
    pool: SqlitePool,
}

impl SqliteDenseIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DenseIndex for SqliteDenseIndex {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<()> {
        let blob = embedding::vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, subject, model, dims, embedding, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.subject)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(blob)
        .bind(&chunk.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], subject: &str, k: usize) -> Result<Vec<SearchHit>> {
        // Fetch the subject partition's vectors and rank by cosine in Rust
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.subject = ? AND c.status = 'committed'
            "#,
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = embedding::blob_to_vec(&blob);
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    raw_score: embedding::cosine_similarity(vector, &stored) as f64,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[derive(Clone)]
pub struct SqliteSparseIndex {
    pool: SqlitePool,
}

impl SqliteSparseIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Rewrite free text into an FTS5 OR-query of quoted terms, so user
/// punctuation can't be parsed as FTS syntax.
fn fts_match_expr(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl SparseIndex for SqliteSparseIndex {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, subject, text) VALUES (?, ?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.subject)
            .bind(&chunk.text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, text: &str, subject: &str, k: usize) -> Result<Vec<SearchHit>> {
        let expr = match fts_match_expr(text) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id, rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? AND chunks_fts.subject = ? AND c.status = 'committed'
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(subject)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    raw_score: -rank, // bm25() is lower-is-better; negate so higher = better
                }
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_expr_quotes_and_joins_terms() {
        assert_eq!(
            fts_match_expr("Ohm's Law"),
            Some("\"Ohm\" OR \"s\" OR \"Law\"".to_string())
        );
    }

    #[test]
    fn fts_expr_empty_for_punctuation_only() {
        assert_eq!(fts_match_expr("?! --"), None);
    }
}
