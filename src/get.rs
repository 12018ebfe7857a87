//! Retrieve a chunk or document by id for inspection.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::models::Chunk;
use crate::store::sqlite::SqliteCatalog;
use crate::store::Catalog;

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let catalog = SqliteCatalog::new(pool.clone());

    if let Some(chunk) = catalog.get_chunk(id).await? {
        print_chunk(&chunk);
        pool.close().await;
        return Ok(());
    }

    let doc_row = sqlx::query(
        "SELECT id, subject, title, source_path, page_count, status, ingested_at FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    match doc_row {
        Some(row) => {
            let doc_id: String = row.get("id");
            let chunk_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                    .bind(&doc_id)
                    .fetch_one(&pool)
                    .await?;
            let page_rows = sqlx::query(
                "SELECT page_no, method, layout FROM pages WHERE document_id = ? ORDER BY page_no",
            )
            .bind(&doc_id)
            .fetch_all(&pool)
            .await?;

            println!("document: {}", doc_id);
            println!("  subject: {}", row.get::<String, _>("subject"));
            println!("  title: {}", row.get::<String, _>("title"));
            println!("  source: {}", row.get::<String, _>("source_path"));
            println!("  status: {}", row.get::<String, _>("status"));
            println!("  pages: {}", row.get::<i64, _>("page_count"));
            println!("  chunks: {}", chunk_count);
            for page in &page_rows {
                println!(
                    "    page {} — {} ({})",
                    page.get::<i64, _>("page_no"),
                    page.get::<String, _>("method"),
                    page.get::<String, _>("layout")
                );
            }
        }
        None => {
            println!("Not found: {}", id);
        }
    }

    pool.close().await;
    Ok(())
}

fn print_chunk(chunk: &Chunk) {
    println!("chunk: {}", chunk.id);
    println!("  document: {}", chunk.document_id);
    println!("  subject: {}", chunk.subject);
    println!("  section: {}", chunk.citation());
    println!("  status: {}", chunk.status.as_str());
    println!("  length: {} chars", chunk.char_len);
    println!();
    println!("{}", chunk.text);
}
