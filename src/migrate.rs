use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            title TEXT NOT NULL,
            source_path TEXT NOT NULL,
            page_count INTEGER NOT NULL,
            dedup_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'complete',
            ingested_at INTEGER NOT NULL,
            UNIQUE(subject, source_path)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create pages table. Raw text is retained verbatim so cleaning
    // anomalies can be audited against the original extraction.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            document_id TEXT NOT NULL,
            page_no INTEGER NOT NULL,
            method TEXT NOT NULL,
            layout TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            char_count INTEGER NOT NULL,
            PRIMARY KEY (document_id, page_no),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            hierarchy_path TEXT NOT NULL DEFAULT '[]',
            text TEXT NOT NULL,
            char_len INTEGER NOT NULL,
            hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create FTS5 virtual table over chunks (the embedded sparse index)
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                subject UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    // Create dense index backing table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_subject_status ON chunks(subject, status)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_subject ON documents(subject)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_subject ON chunk_vectors(subject)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
