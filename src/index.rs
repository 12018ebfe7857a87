//! Dual-index write path.
//!
//! A document's chunks are indexed as one logical batch: every chunk is
//! inserted `pending`, then its dense half and sparse half are written in
//! order, and only when both succeed does the chunk flip to `committed` —
//! the status that makes it visible to queries. Each half retries with
//! bounded exponential backoff; a chunk whose retries exhaust is marked
//! `failed` and the document is reported `incomplete`, never silently
//! partial.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::models::{Chunk, ChunkStatus, DocumentRecord, DocumentStatus, PageDraft};
use crate::store::{Catalog, DenseIndex, SparseIndex};

/// Why a chunk failed to commit. The write path distinguishes the halves
/// so degradations can be reported precisely.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no embedding vector for chunk {chunk_id}")]
    MissingVector { chunk_id: String },
    #[error("dense upsert failed for chunk {chunk_id}: {reason}")]
    Dense { chunk_id: String, reason: String },
    #[error("sparse upsert failed for chunk {chunk_id}: {reason}")]
    Sparse { chunk_id: String, reason: String },
}

/// Per-chunk embedding vectors for a document batch.
pub enum ChunkVectors<'a> {
    /// Embeddings are not configured; chunks commit on the sparse half
    /// alone and queries degrade to sparse-only ranking.
    Disabled,
    /// One entry per chunk, in chunk order. `None` means embedding failed
    /// for that chunk after retries.
    Ready(&'a [Option<Vec<f32>>]),
}

/// Outcome of indexing one document.
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub committed: u64,
    pub failed: u64,
}

/// Coordinates catalog persistence and the two index halves.
pub struct Indexer<'a> {
    catalog: &'a dyn Catalog,
    dense: &'a dyn DenseIndex,
    sparse: &'a dyn SparseIndex,
    model_name: String,
    max_retries: u32,
}

impl<'a> Indexer<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        dense: &'a dyn DenseIndex,
        sparse: &'a dyn SparseIndex,
        model_name: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            catalog,
            dense,
            sparse,
            model_name: model_name.into(),
            max_retries,
        }
    }

    /// Replace a document wholesale and commit its chunks to both indexes.
    ///
    /// Returns per-chunk commit counts; a partially-indexed document is
    /// marked [`DocumentStatus::Incomplete`].
    pub async fn index_document(
        &self,
        doc: &DocumentRecord,
        pages: &[PageDraft],
        chunks: &[Chunk],
        vectors: ChunkVectors<'_>,
    ) -> Result<IndexOutcome> {
        self.catalog.replace_document(doc, pages, chunks).await?;

        let mut outcome = IndexOutcome::default();

        for (i, chunk) in chunks.iter().enumerate() {
            let vector = match &vectors {
                ChunkVectors::Disabled => None,
                ChunkVectors::Ready(v) => match v.get(i) {
                    Some(Some(vec)) => Some(vec.as_slice()),
                    _ => {
                        let err = IndexError::MissingVector {
                            chunk_id: chunk.id.clone(),
                        };
                        warn!(error = %err, "chunk failed");
                        self.catalog
                            .set_chunk_status(&chunk.id, ChunkStatus::Failed)
                            .await?;
                        outcome.failed += 1;
                        continue;
                    }
                },
            };

            match self.commit_chunk(chunk, vector).await {
                Ok(()) => {
                    self.catalog
                        .set_chunk_status(&chunk.id, ChunkStatus::Committed)
                        .await?;
                    outcome.committed += 1;
                }
                Err(e) => {
                    warn!(chunk_id = %chunk.id, error = %e, "chunk failed after retries");
                    self.catalog
                        .set_chunk_status(&chunk.id, ChunkStatus::Failed)
                        .await?;
                    outcome.failed += 1;
                }
            }
        }

        if outcome.failed > 0 {
            self.catalog
                .set_document_status(&doc.id, DocumentStatus::Incomplete)
                .await?;
        }

        Ok(outcome)
    }

    /// Write both index halves for one chunk: dense first, then sparse,
    /// each with bounded backoff. The chunk stays invisible until the
    /// caller flips its status.
    async fn commit_chunk(&self, chunk: &Chunk, vector: Option<&[f32]>) -> Result<(), IndexError> {
        if let Some(vector) = vector {
            with_backoff(self.max_retries, || {
                self.dense.upsert(chunk, vector, &self.model_name)
            })
            .await
            .map_err(|e| IndexError::Dense {
                chunk_id: chunk.id.clone(),
                reason: e.to_string(),
            })?;
        }

        with_backoff(self.max_retries, || self.sparse.upsert(chunk))
            .await
            .map_err(|e| IndexError::Sparse {
                chunk_id: chunk.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

/// Retry an async operation with exponential backoff (1s, 2s, 4s, ...).
async fn with_backoff<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("operation failed after retries")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkStatus, ColumnLayout, ExtractionMethod};
    use crate::store::memory::InMemoryStore;
    use crate::store::SearchHit;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "d1".to_string(),
            subject: "physics".to_string(),
            chunk_index: 0,
            hierarchy_path: vec!["Chapter 1".to_string()],
            text: "current flows".to_string(),
            char_len: 13,
            hash: "h".to_string(),
            status: ChunkStatus::Pending,
        }
    }

    fn make_doc() -> DocumentRecord {
        DocumentRecord {
            id: "d1".to_string(),
            subject: "physics".to_string(),
            title: "physics-1".to_string(),
            source_path: "physics/one.pdf".to_string(),
            page_count: 1,
            dedup_hash: "x".to_string(),
            status: DocumentStatus::Complete,
            ingested_at: 0,
        }
    }

    fn make_page() -> PageDraft {
        PageDraft {
            page_no: 1,
            method: ExtractionMethod::TextLayer,
            layout: ColumnLayout::Single,
            raw_text: "current flows".to_string(),
        }
    }

    /// Sparse index that fails the first N upserts, then succeeds.
    struct FlakySparse<'a> {
        inner: &'a InMemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl SparseIndex for FlakySparse<'_> {
        async fn upsert(&self, chunk: &Chunk) -> Result<()> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok()
            {
                bail!("sparse index unavailable");
            }
            SparseIndex::upsert(self.inner, chunk).await
        }

        async fn query(&self, text: &str, subject: &str, k: usize) -> Result<Vec<SearchHit>> {
            SparseIndex::query(self.inner, text, subject, k).await
        }
    }

    #[tokio::test]
    async fn commits_chunks_when_both_halves_succeed() {
        let store = InMemoryStore::new();
        let indexer = Indexer::new(&store, &store, &store, "test-model", 0);
        let chunks = vec![make_chunk("c1"), make_chunk("c2")];
        let vectors = vec![Some(vec![1.0, 0.0]), Some(vec![0.0, 1.0])];

        let outcome = indexer
            .index_document(&make_doc(), &[make_page()], &chunks, ChunkVectors::Ready(&vectors))
            .await
            .unwrap();

        assert_eq!(outcome.committed, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(store.committed_count(), 2);
        assert_eq!(store.document_status("d1"), Some(DocumentStatus::Complete));
    }

    #[tokio::test]
    async fn sparse_failure_marks_chunk_failed_and_document_incomplete() {
        let store = InMemoryStore::new();
        let sparse = FlakySparse {
            inner: &store,
            failures: AtomicU32::new(u32::MAX),
        };
        let indexer = Indexer::new(&store, &store, &sparse, "test-model", 0);
        let chunks = vec![make_chunk("c1")];
        let vectors = vec![Some(vec![1.0, 0.0])];

        let outcome = indexer
            .index_document(&make_doc(), &[make_page()], &chunks, ChunkVectors::Ready(&vectors))
            .await
            .unwrap();

        assert_eq!(outcome.committed, 0);
        assert_eq!(outcome.failed, 1);
        assert_eq!(store.committed_count(), 0);
        assert_eq!(
            store.document_status("d1"),
            Some(DocumentStatus::Incomplete)
        );

        // A failed chunk is never visible to queries even though its dense
        // half was written.
        let hits = DenseIndex::query(&store, &[1.0, 0.0], "physics", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn transient_sparse_failure_is_retried() {
        let store = InMemoryStore::new();
        let sparse = FlakySparse {
            inner: &store,
            failures: AtomicU32::new(1),
        };
        let indexer = Indexer::new(&store, &store, &sparse, "test-model", 1);
        let chunks = vec![make_chunk("c1")];
        let vectors = vec![Some(vec![1.0, 0.0])];

        let outcome = indexer
            .index_document(&make_doc(), &[make_page()], &chunks, ChunkVectors::Ready(&vectors))
            .await
            .unwrap();

        assert_eq!(outcome.committed, 1);
        assert_eq!(store.committed_count(), 1);
        assert_eq!(store.document_status("d1"), Some(DocumentStatus::Complete));
    }

    #[tokio::test]
    async fn missing_vector_fails_only_that_chunk() {
        let store = InMemoryStore::new();
        let indexer = Indexer::new(&store, &store, &store, "test-model", 0);
        let chunks = vec![make_chunk("c1"), make_chunk("c2")];
        let vectors = vec![None, Some(vec![0.0, 1.0])];

        let outcome = indexer
            .index_document(&make_doc(), &[make_page()], &chunks, ChunkVectors::Ready(&vectors))
            .await
            .unwrap();

        assert_eq!(outcome.committed, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            store.document_status("d1"),
            Some(DocumentStatus::Incomplete)
        );
    }

    #[tokio::test]
    async fn disabled_embeddings_commit_on_sparse_alone() {
        let store = InMemoryStore::new();
        let indexer = Indexer::new(&store, &store, &store, "disabled", 0);
        let chunks = vec![make_chunk("c1")];

        let outcome = indexer
            .index_document(&make_doc(), &[make_page()], &chunks, ChunkVectors::Disabled)
            .await
            .unwrap();

        assert_eq!(outcome.committed, 1);
        let hits = SparseIndex::query(&store, "current", "physics", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
