//! Batch ingestion pipeline.
//!
//! Walks a directory tree organized by subject (`root/<subject>/*.pdf`)
//! and runs each document through extract → clean → segment → index.
//! Documents share no mutable state, so they run concurrently up to a
//! configured cap; pages within one document stay sequential because
//! paragraph reconstruction at a page boundary needs the previous page's
//! trailing fragment.
//!
//! Failures are contained per page and per document: an unreadable page
//! becomes an `unextractable` entry in the report, a failed document is
//! counted and skipped, and only an unusable root directory fails the
//! batch.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::clean;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::extract;
use crate::index::{ChunkVectors, Indexer};
use crate::models::{CleanedPage, DocumentRecord, DocumentStatus};
use crate::ocr::{self, OcrEngine};
use crate::segment::{self, MarkerSet};
use crate::store::sqlite::{SqliteCatalog, SqliteDenseIndex, SqliteSparseIndex};
use crate::store::Catalog;

/// A page neither extraction tier could read, flagged for manual review.
#[derive(Debug, Clone)]
pub struct UnextractablePage {
    pub subject: String,
    pub document: String,
    pub page_no: usize,
}

/// Aggregate outcome of one ingestion batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_ok: u64,
    pub documents_incomplete: u64,
    pub documents_failed: u64,
    pub documents_skipped: u64,
    pub pages_total: u64,
    pub chunks_committed: u64,
    pub chunks_failed: u64,
    pub unextractable: Vec<UnextractablePage>,
}

struct DocOutcome {
    subject: String,
    document: String,
    pages: u64,
    unextractable: Vec<usize>,
    committed: u64,
    failed: u64,
    skipped: bool,
}

pub async fn run_ingest(
    config: &Config,
    root: &Path,
    subject_filter: Option<String>,
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<IngestReport> {
    if !root.is_dir() {
        bail!("Ingest root is not a directory: {}", root.display());
    }
    if let Some(ref s) = subject_filter {
        if !config.subjects.iter().any(|cs| cs == s) {
            bail!(
                "Unknown subject: '{}'. Configured subjects: {}",
                s,
                config.subjects.join(", ")
            );
        }
    }

    let globs = build_globset(&config.ingest.include_globs, &config.ingest.exclude_globs)?;
    let mut documents = discover_documents(root, &config.subjects, subject_filter.as_deref(), &globs);
    if let Some(lim) = limit {
        documents.truncate(lim);
    }

    if dry_run {
        println!("ingest {} (dry-run)", root.display());
        for subject in &config.subjects {
            let count = documents.iter().filter(|(s, _)| s == subject).count();
            if count > 0 {
                println!("  {}: {} documents", subject, count);
            }
        }
        println!("  total: {} documents", documents.len());
        return Ok(IngestReport::default());
    }

    let pool = db::connect(config).await?;
    let config = Arc::new(config.clone());
    let markers = Arc::new(MarkerSet::compile(&config.segmenter.markers)?);
    let ocr_engine: Arc<dyn OcrEngine> = Arc::from(ocr::create_engine(&config.ocr)?);
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);

    let mut report = IngestReport::default();
    let mut queue: VecDeque<(String, PathBuf)> = documents.into();
    let mut join_set = tokio::task::JoinSet::new();

    loop {
        while join_set.len() < config.ingest.max_parallel_documents.max(1) {
            match queue.pop_front() {
                Some((subject, path)) => {
                    let config = Arc::clone(&config);
                    let markers = Arc::clone(&markers);
                    let ocr_engine = Arc::clone(&ocr_engine);
                    let provider = Arc::clone(&provider);
                    let pool = pool.clone();
                    join_set.spawn(async move {
                        let name = format!(
                            "{}/{}",
                            subject,
                            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                        );
                        let result = process_document(
                            &config,
                            pool,
                            &markers,
                            ocr_engine.as_ref(),
                            provider.as_ref(),
                            &subject,
                            &path,
                            full,
                        )
                        .await;
                        (name, result)
                    });
                }
                None => break,
            }
        }

        match join_set.join_next().await {
            Some(joined) => {
                let (name, result) = joined.context("ingestion task panicked")?;
                match result {
                    Ok(outcome) => merge_outcome(&mut report, outcome),
                    Err(e) => {
                        eprintln!("Warning: {} failed: {:#}", name, e);
                        report.documents_failed += 1;
                    }
                }
            }
            None => break,
        }
    }

    print_report(root, &report);

    pool.close().await;
    Ok(report)
}

fn merge_outcome(report: &mut IngestReport, outcome: DocOutcome) {
    if outcome.skipped {
        report.documents_skipped += 1;
        return;
    }
    report.pages_total += outcome.pages;
    report.chunks_committed += outcome.committed;
    report.chunks_failed += outcome.failed;
    if outcome.failed > 0 {
        report.documents_incomplete += 1;
    } else {
        report.documents_ok += 1;
    }
    for page_no in outcome.unextractable {
        report.unextractable.push(UnextractablePage {
            subject: outcome.subject.clone(),
            document: outcome.document.clone(),
            page_no,
        });
    }
}

fn print_report(root: &Path, report: &IngestReport) {
    println!("ingest {}", root.display());
    println!(
        "  documents: {} ok, {} incomplete, {} failed, {} unchanged",
        report.documents_ok,
        report.documents_incomplete,
        report.documents_failed,
        report.documents_skipped
    );
    println!(
        "  pages: {} ({} unextractable)",
        report.pages_total,
        report.unextractable.len()
    );
    println!(
        "  chunks: {} committed, {} failed",
        report.chunks_committed, report.chunks_failed
    );
    if !report.unextractable.is_empty() {
        println!("  flagged for manual review:");
        for page in &report.unextractable {
            println!("    - {} page {}", page.document, page.page_no);
        }
    }
    println!("ok");
}

fn build_globset(include: &[String], exclude: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut inc = GlobSetBuilder::new();
    for pattern in include {
        inc.add(Glob::new(pattern).with_context(|| format!("bad include glob: {}", pattern))?);
    }
    let mut exc = GlobSetBuilder::new();
    for pattern in exclude {
        exc.add(Glob::new(pattern).with_context(|| format!("bad exclude glob: {}", pattern))?);
    }
    Ok((inc.build()?, exc.build()?))
}

/// Find `root/<subject>/**` files matching the configured globs, in a
/// deterministic order.
fn discover_documents(
    root: &Path,
    subjects: &[String],
    subject_filter: Option<&str>,
    (include, exclude): &(GlobSet, GlobSet),
) -> Vec<(String, PathBuf)> {
    let mut documents = Vec::new();
    for subject in subjects {
        if let Some(filter) = subject_filter {
            if subject != filter {
                continue;
            }
        }
        let dir = root.join(subject);
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
            if include.is_match(rel) && !exclude.is_match(rel) {
                documents.push((subject.clone(), entry.path().to_path_buf()));
            }
        }
    }
    documents.sort();
    documents
}

/// Run one document through the full pipeline.
#[allow(clippy::too_many_arguments)]
async fn process_document(
    config: &Config,
    pool: sqlx::SqlitePool,
    markers: &MarkerSet,
    ocr_engine: &dyn OcrEngine,
    provider: &dyn EmbeddingProvider,
    subject: &str,
    path: &Path,
    full: bool,
) -> Result<DocOutcome> {
    let catalog = SqliteCatalog::new(pool.clone());
    let dense = SqliteDenseIndex::new(pool.clone());
    let sparse = SqliteSparseIndex::new(pool);

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let dedup_hash = format!("{:x}", hasher.finalize());

    let source_path = path.to_string_lossy().to_string();
    let document = format!(
        "{}/{}",
        subject,
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );

    if !full {
        if let Some(existing) = catalog.find_dedup_hash(subject, &source_path).await? {
            if existing == dedup_hash {
                return Ok(DocOutcome {
                    subject: subject.to_string(),
                    document,
                    pages: 0,
                    unextractable: Vec::new(),
                    committed: 0,
                    failed: 0,
                    skipped: true,
                });
            }
        }
    }

    // Extract (pages in order; no page silently dropped)
    let pages =
        extract::extract_document(&bytes, subject, &config.extraction, &config.ocr, ocr_engine)
            .await?;

    let unextractable: Vec<usize> = pages
        .iter()
        .filter(|p| p.is_unextractable())
        .map(|p| p.page_no)
        .collect();

    // Clean
    let profile = config.cleaning.profile_for(subject);
    let cleaned: Vec<CleanedPage> = pages
        .iter()
        .filter(|p| !p.is_unextractable())
        .map(|p| CleanedPage {
            page_no: p.page_no,
            text: clean::clean_page(&p.raw_text, &profile, p.page_no),
        })
        .collect();

    // Segment
    let doc_id = Uuid::new_v4().to_string();
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| doc_id.clone());
    let (_tree, chunks) =
        segment::segment_pages(&cleaned, &doc_id, subject, markers, &config.chunking);

    let doc = DocumentRecord {
        id: doc_id,
        subject: subject.to_string(),
        title,
        source_path,
        page_count: pages.len(),
        dedup_hash,
        status: DocumentStatus::Complete,
        ingested_at: chrono::Utc::now().timestamp(),
    };

    // Embed (timeout-bounded; a failed batch fails those chunks' indexing)
    let vectors: Option<Vec<Option<Vec<f32>>>> = if config.embedding.is_enabled() {
        let mut all = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match embedding::embed_texts(provider, &config.embedding, &texts).await {
                Ok(vecs) => all.extend(vecs.into_iter().map(Some)),
                Err(e) => {
                    eprintln!("Warning: embedding batch failed: {}", e);
                    all.extend(std::iter::repeat_with(|| None).take(batch.len()));
                }
            }
        }
        Some(all)
    } else {
        None
    };

    // Index (two-phase per chunk, bounded retries)
    let indexer = Indexer::new(
        &catalog,
        &dense,
        &sparse,
        provider.model_name(),
        config.ingest.index_max_retries,
    );
    let chunk_vectors = match &vectors {
        Some(v) => ChunkVectors::Ready(v),
        None => ChunkVectors::Disabled,
    };
    let outcome = indexer
        .index_document(&doc, &pages, &chunks, chunk_vectors)
        .await?;

    Ok(DocOutcome {
        subject: subject.to_string(),
        document,
        pages: pages.len() as u64,
        unextractable,
        committed: outcome.committed,
        failed: outcome.failed,
        skipped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_only_configured_subjects() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("physics")).unwrap();
        std::fs::create_dir_all(root.join("notes")).unwrap();
        std::fs::write(root.join("physics/a.pdf"), b"x").unwrap();
        std::fs::write(root.join("physics/b.txt"), b"x").unwrap();
        std::fs::write(root.join("notes/c.pdf"), b"x").unwrap();

        let globs = build_globset(&["**/*.pdf".to_string()], &[]).unwrap();
        let subjects = vec!["physics".to_string(), "math".to_string()];
        let found = discover_documents(root, &subjects, None, &globs);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "physics");
        assert!(found[0].1.ends_with("a.pdf"));
    }

    #[test]
    fn subject_filter_narrows_discovery() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for subject in ["physics", "math"] {
            std::fs::create_dir_all(root.join(subject)).unwrap();
            std::fs::write(root.join(subject).join("book.pdf"), b"x").unwrap();
        }

        let globs = build_globset(&["**/*.pdf".to_string()], &[]).unwrap();
        let subjects = vec!["physics".to_string(), "math".to_string()];
        let found = discover_documents(root, &subjects, Some("math"), &globs);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "math");
    }

    #[test]
    fn exclude_globs_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("physics")).unwrap();
        std::fs::write(root.join("physics/book.pdf"), b"x").unwrap();
        std::fs::write(root.join("physics/draft.pdf"), b"x").unwrap();

        let globs =
            build_globset(&["**/*.pdf".to_string()], &["**/draft*".to_string()]).unwrap();
        let subjects = vec!["physics".to_string()];
        let found = discover_documents(root, &subjects, None, &globs);

        assert_eq!(found.len(), 1);
        assert!(found[0].1.ends_with("book.pdf"));
    }
}
