//! Core data models used throughout Lectern.
//!
//! These types represent the documents, pages, chunks, and query results
//! that flow through the ingestion and retrieval pipeline.

/// How a page's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Extracted directly from the PDF text layer.
    TextLayer,
    /// Recognized from the rendered page image.
    Ocr,
    /// Both tiers failed; the page is flagged for manual review.
    Unextractable,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::TextLayer => "text-layer",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Unextractable => "unextractable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text-layer" => Some(ExtractionMethod::TextLayer),
            "ocr" => Some(ExtractionMethod::Ocr),
            "unextractable" => Some(ExtractionMethod::Unextractable),
            _ => None,
        }
    }
}

/// Detected column layout of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    Single,
    /// Two vertical bands split at a character-column gutter. Text is read
    /// left column top-to-bottom, then right column.
    TwoColumn { gutter: usize },
}

impl ColumnLayout {
    pub fn as_str(&self) -> String {
        match self {
            ColumnLayout::Single => "single".to_string(),
            ColumnLayout::TwoColumn { gutter } => format!("two-column:{}", gutter),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == "single" {
            return Some(ColumnLayout::Single);
        }
        s.strip_prefix("two-column:")
            .and_then(|g| g.parse().ok())
            .map(|gutter| ColumnLayout::TwoColumn { gutter })
    }
}

/// One extracted page, produced by the text extractor and never mutated
/// after creation. `raw_text` is already column-reordered but not cleaned;
/// it is retained verbatim so cleaning anomalies can be audited.
#[derive(Debug, Clone)]
pub struct PageDraft {
    /// 1-based page number.
    pub page_no: usize,
    pub method: ExtractionMethod,
    pub layout: ColumnLayout,
    pub raw_text: String,
}

impl PageDraft {
    pub fn is_unextractable(&self) -> bool {
        self.method == ExtractionMethod::Unextractable
    }
}

/// A page after subject-aware cleaning, ready for segmentation.
#[derive(Debug, Clone)]
pub struct CleanedPage {
    pub page_no: usize,
    pub text: String,
}

/// Ingestion status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Every chunk committed to both indexes.
    Complete,
    /// At least one chunk failed indexing after retries.
    Incomplete,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Complete => "complete",
            DocumentStatus::Incomplete => "incomplete",
        }
    }
}

/// A source PDF, immutable once ingested and replaced wholesale on
/// re-ingestion.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub subject: String,
    pub title: String,
    pub source_path: String,
    pub page_count: usize,
    pub dedup_hash: String,
    pub status: DocumentStatus,
    pub ingested_at: i64,
}

/// Dual-index commit state of a chunk. A chunk is visible to queries only
/// once both its dense and sparse halves are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Committed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Committed => "committed",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChunkStatus::Pending),
            "committed" => Some(ChunkStatus::Committed),
            "failed" => Some(ChunkStatus::Failed),
            _ => None,
        }
    }
}

/// The atomic retrieval unit: a bounded span of cleaned text tagged with
/// the titles of its enclosing hierarchy nodes (root to leaf).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub subject: String,
    pub chunk_index: i64,
    /// Materialized ancestor-title path; decouples the chunk from the
    /// hierarchy tree's lifetime.
    pub hierarchy_path: Vec<String>,
    pub text: String,
    pub char_len: usize,
    /// SHA-256 of the text, for staleness detection.
    pub hash: String,
    pub status: ChunkStatus,
}

impl Chunk {
    /// Human-readable citation, e.g. `"Unit 1 > Chapter 2"`.
    pub fn citation(&self) -> String {
        if self.hierarchy_path.is_empty() {
            "(front matter)".to_string()
        } else {
            self.hierarchy_path.join(" > ")
        }
    }
}

/// Per-query fused ranking entry. Lifetime = one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub chunk_id: String,
    /// 1-based rank in the dense candidate list, if present.
    pub dense_rank: Option<usize>,
    /// 1-based rank in the sparse candidate list, if present.
    pub sparse_rank: Option<usize>,
    pub score: f64,
}

impl RankedResult {
    /// The better (lower) of the two individual ranks; used as a tie-breaker.
    pub fn min_rank(&self) -> usize {
        match (self.dense_rank, self.sparse_rank) {
            (Some(d), Some(s)) => d.min(s),
            (Some(d), None) => d,
            (None, Some(s)) => s,
            (None, None) => usize::MAX,
        }
    }
}

/// One (user, assistant) exchange held in session memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}
