//! Database statistics and coverage overview.
//!
//! Summarizes what's indexed: document and chunk counts, extraction
//! method breakdown, embedding coverage, and per-subject rows. Used by
//! `lectern stats` to confirm ingestion worked as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-subject breakdown of document and chunk counts.
struct SubjectStats {
    subject: String,
    doc_count: i64,
    page_count: i64,
    ocr_pages: i64,
    unextractable_pages: i64,
    committed_chunks: i64,
    embedded_chunks: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let committed_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE status = 'committed'")
            .fetch_one(&pool)
            .await?;
    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lectern — Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {} ({} committed)", total_chunks, committed_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );

    let subject_rows = sqlx::query(
        r#"
        SELECT
            d.subject,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT p.document_id || ':' || p.page_no) AS page_count,
            COUNT(DISTINCT CASE WHEN p.method = 'ocr' THEN p.document_id || ':' || p.page_no END) AS ocr_pages,
            COUNT(DISTINCT CASE WHEN p.method = 'unextractable' THEN p.document_id || ':' || p.page_no END) AS unextractable_pages
        FROM documents d
        LEFT JOIN pages p ON p.document_id = d.id
        GROUP BY d.subject
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let chunk_rows = sqlx::query(
        r#"
        SELECT
            c.subject,
            COUNT(DISTINCT CASE WHEN c.status = 'committed' THEN c.id END) AS committed_chunks,
            COUNT(DISTINCT cv.chunk_id) AS embedded_chunks
        FROM chunks c
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        GROUP BY c.subject
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut subject_stats: Vec<SubjectStats> = Vec::new();
    for row in &subject_rows {
        let subject: String = row.get("subject");
        let chunk_row = chunk_rows.iter().find(|cr| {
            let cr_subject: String = cr.get("subject");
            cr_subject == subject
        });
        subject_stats.push(SubjectStats {
            subject,
            doc_count: row.get("doc_count"),
            page_count: row.get("page_count"),
            ocr_pages: row.get("ocr_pages"),
            unextractable_pages: row.get("unextractable_pages"),
            committed_chunks: chunk_row.map(|r| r.get("committed_chunks")).unwrap_or(0),
            embedded_chunks: chunk_row.map(|r| r.get("embedded_chunks")).unwrap_or(0),
        });
    }

    if !subject_stats.is_empty() {
        println!();
        println!("  By subject:");
        println!(
            "  {:<12} {:>5} {:>7} {:>5} {:>7} {:>8} {:>9}",
            "SUBJECT", "DOCS", "PAGES", "OCR", "FLAGGED", "CHUNKS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(60));
        for s in &subject_stats {
            println!(
                "  {:<12} {:>5} {:>7} {:>5} {:>7} {:>8} {:>9}",
                s.subject,
                s.doc_count,
                s.page_count,
                s.ocr_pages,
                s.unextractable_pages,
                s.committed_chunks,
                s.embedded_chunks
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
