//! Storage abstraction for Lectern.
//!
//! Three seams cover the external collaborators from the retrieval side:
//! the [`Catalog`] (system of record for documents, pages, and chunks),
//! the [`DenseIndex`] (embedding-vector nearest neighbors), and the
//! [`SparseIndex`] (lexical BM25-style ranking). The production backend
//! keeps all three in one SQLite database; the in-memory backend exists
//! for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ChunkStatus, DocumentRecord, DocumentStatus, PageDraft};

/// A candidate returned from a dense or sparse search, ranked by the
/// backend's own score scale. Fusion operates on rank position only, so
/// the two scales never need reconciling.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub raw_score: f64,
}

/// System of record for documents, pages, and chunks.
///
/// A document is replaced wholesale: [`replace_document`](Catalog::replace_document)
/// atomically deletes any prior version (pages, chunks, and both index
/// halves) and inserts the new chunk set with status `pending`. Chunks
/// become queryable only after the indexer flips them to `committed`.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Atomically replace a document and all derived state. New chunks are
    /// inserted with status `pending`.
    async fn replace_document(
        &self,
        doc: &DocumentRecord,
        pages: &[PageDraft],
        chunks: &[Chunk],
    ) -> Result<()>;

    /// Transition a chunk's dual-index commit status.
    async fn set_chunk_status(&self, chunk_id: &str, status: ChunkStatus) -> Result<()>;

    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<()>;

    /// Dedup hash of a previously ingested document at this path, if any.
    async fn find_dedup_hash(&self, subject: &str, source_path: &str) -> Result<Option<String>>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Fetch several chunks, preserving the input order. Missing ids are
    /// skipped.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;
}

/// Dense (semantic) index over embedding vectors, partitioned by subject.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<()>;

    /// Nearest neighbors within a subject partition, best first. Only
    /// committed chunks are returned.
    async fn query(&self, vector: &[f32], subject: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Sparse (lexical) index, partitioned by subject.
#[async_trait]
pub trait SparseIndex: Send + Sync {
    async fn upsert(&self, chunk: &Chunk) -> Result<()>;

    /// BM25-ranked matches within a subject partition, best first. Only
    /// committed chunks are returned.
    async fn query(&self, text: &str, subject: &str, k: usize) -> Result<Vec<SearchHit>>;
}
