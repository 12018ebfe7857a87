//! In-memory backend implementing all three store traits, for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Dense search is brute-force cosine similarity; sparse search scores by
//! naive matched-term frequency, which preserves rank ordering well enough
//! for fusion tests without an FTS engine.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ChunkStatus, DocumentRecord, DocumentStatus, PageDraft};

use super::{Catalog, DenseIndex, SearchHit, SparseIndex};

struct StoredVector {
    chunk_id: String,
    subject: String,
    vector: Vec<f32>,
}

struct SparseEntry {
    chunk_id: String,
    subject: String,
    text: String,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, DocumentRecord>,
    pages: Vec<(String, PageDraft)>,
    chunks: Vec<Chunk>,
    vectors: Vec<StoredVector>,
    sparse: Vec<SparseEntry>,
}

impl Inner {
    fn is_committed(&self, chunk_id: &str) -> bool {
        self.chunks
            .iter()
            .any(|c| c.id == chunk_id && c.status == ChunkStatus::Committed)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.read().unwrap().chunks.len()
    }

    pub fn committed_count(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Committed)
            .count()
    }

    pub fn document_status(&self, document_id: &str) -> Option<DocumentStatus> {
        self.inner
            .read()
            .unwrap()
            .docs
            .get(document_id)
            .map(|d| d.status)
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn replace_document(
        &self,
        doc: &DocumentRecord,
        pages: &[PageDraft],
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let old_id: Option<String> = inner
            .docs
            .values()
            .find(|d| d.subject == doc.subject && d.source_path == doc.source_path)
            .map(|d| d.id.clone());
        if let Some(old_id) = old_id {
            inner.docs.remove(&old_id);
            inner.pages.retain(|(id, _)| id != &old_id);
            let stale: Vec<String> = inner
                .chunks
                .iter()
                .filter(|c| c.document_id == old_id)
                .map(|c| c.id.clone())
                .collect();
            inner.chunks.retain(|c| c.document_id != old_id);
            inner.vectors.retain(|v| !stale.contains(&v.chunk_id));
            inner.sparse.retain(|s| !stale.contains(&s.chunk_id));
        }

        inner.docs.insert(doc.id.clone(), doc.clone());
        for page in pages {
            inner.pages.push((doc.id.clone(), page.clone()));
        }
        for chunk in chunks {
            let mut pending = chunk.clone();
            pending.status = ChunkStatus::Pending;
            inner.chunks.push(pending);
        }
        Ok(())
    }

    async fn set_chunk_status(&self, chunk_id: &str, status: ChunkStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for chunk in inner.chunks.iter_mut() {
            if chunk.id == chunk_id {
                chunk.status = status;
            }
        }
        Ok(())
    }

    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(doc) = inner.docs.get_mut(document_id) {
            doc.status = status;
        }
        Ok(())
    }

    async fn find_dedup_hash(&self, subject: &str, source_path: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .docs
            .values()
            .find(|d| d.subject == subject && d.source_path == source_path)
            .map(|d| d.dedup_hash.clone()))
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let inner = self.inner.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.iter().find(|c| &c.id == id).cloned())
            .collect())
    }
}

#[async_trait]
impl DenseIndex for InMemoryStore {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32], _model: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.vectors.retain(|v| v.chunk_id != chunk.id);
        inner.vectors.push(StoredVector {
            chunk_id: chunk.id.clone(),
            subject: chunk.subject.clone(),
            vector: vector.to_vec(),
        });
        Ok(())
    }

    async fn query(&self, vector: &[f32], subject: &str, k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read().unwrap();
        let mut hits: Vec<SearchHit> = inner
            .vectors
            .iter()
            .filter(|v| v.subject == subject && inner.is_committed(&v.chunk_id))
            .map(|v| SearchHit {
                chunk_id: v.chunk_id.clone(),
                raw_score: cosine_similarity(vector, &v.vector) as f64,
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

#[async_trait]
impl SparseIndex for InMemoryStore {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.sparse.retain(|s| s.chunk_id != chunk.id);
        inner.sparse.push(SparseEntry {
            chunk_id: chunk.id.clone(),
            subject: chunk.subject.clone(),
            text: chunk.text.to_lowercase(),
        });
        Ok(())
    }

    async fn query(&self, text: &str, subject: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_lower = text.to_lowercase();
        let terms: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().unwrap();
        let mut hits: Vec<SearchHit> = inner
            .sparse
            .iter()
            .filter(|s| s.subject == subject && inner.is_committed(&s.chunk_id))
            .filter_map(|s| {
                let matches: usize = terms
                    .iter()
                    .map(|t| s.text.matches(t).count())
                    .sum();
                if matches > 0 {
                    Some(SearchHit {
                        chunk_id: s.chunk_id.clone(),
                        raw_score: matches as f64,
                    })
                } else {
                    None
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
