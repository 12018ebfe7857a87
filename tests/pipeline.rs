//! Library-level pipeline tests: extraction tiers, hierarchy segmentation,
//! dual-index commit, and hybrid retrieval over the in-memory backend.

use anyhow::Result;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use lectern::config::{ChunkingConfig, ExtractionConfig, OcrConfig, SegmenterConfig};
use lectern::extract;
use lectern::index::{ChunkVectors, Indexer};
use lectern::models::{
    Chunk, ChunkStatus, CleanedPage, DocumentRecord, DocumentStatus, ExtractionMethod,
};
use lectern::ocr::{DisabledOcr, OcrEngine, OcrOutput};
use lectern::search::{HybridRetriever, RetrievalParams};
use lectern::segment::{segment_pages, MarkerSet};
use lectern::store::memory::InMemoryStore;
use lectern::store::{Catalog, DenseIndex, SparseIndex};

/// Build a two-page PDF: page 1 carries a text layer, page 2 is empty
/// (stands in for a scanned image page).
fn two_page_pdf(heading: &str, paragraph: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(heading)]),
            Operation::new("Td", vec![0.into(), (-24).into()]),
            Operation::new("Tj", vec![Object::string_literal(paragraph)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode page 1 content"),
    ));
    let page1_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let empty = Content { operations: vec![] };
    let empty_id = doc.add_object(Stream::new(
        dictionary! {},
        empty.encode().expect("encode page 2 content"),
    ));
    let page2_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => empty_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page1_id.into(), page2_id.into()],
        "Count" => 2,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize PDF");
    bytes
}

struct StubOcr {
    text: String,
}

#[async_trait]
impl OcrEngine for StubOcr {
    fn is_enabled(&self) -> bool {
        true
    }
    async fn recognize(&self, _pdf: &[u8], _page_no: usize, _languages: &str) -> Result<OcrOutput> {
        Ok(OcrOutput {
            text: self.text.clone(),
            blocks: Vec::new(),
        })
    }
}

const HEADING: &str = "Chapter 1";
const PAGE1_PARA: &str = "Electric current is the ordered flow of charge carriers through a \
                          conducting material, and it is measured in amperes.";
const PAGE2_PARA: &str = "The resistance of a conductor limits the current that flows when a \
                          potential difference is applied across its ends.";

fn make_chunk(id: &str, subject: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        document_id: "doc".to_string(),
        subject: subject.to_string(),
        chunk_index: 0,
        hierarchy_path: vec!["Chapter 1".to_string()],
        text: text.to_string(),
        char_len: text.chars().count(),
        hash: "h".to_string(),
        status: ChunkStatus::Pending,
    }
}

fn make_doc(subject: &str) -> DocumentRecord {
    DocumentRecord {
        id: "doc".to_string(),
        subject: subject.to_string(),
        title: "book".to_string(),
        source_path: format!("{}/book.pdf", subject),
        page_count: 1,
        dedup_hash: "hash".to_string(),
        status: DocumentStatus::Complete,
        ingested_at: 0,
    }
}

/// A two-page document where page 1 has a text layer and page 2 is
/// scanned. Page 1 must come out `text-layer`, page 2 `ocr`, and the
/// hierarchy must hold one "Chapter 1" node at depth 1 with at least one
/// chunk whose path is `["Chapter 1"]`.
#[tokio::test]
async fn two_page_mixed_extraction_scenario() {
    let pdf = two_page_pdf(HEADING, PAGE1_PARA);
    let ocr = StubOcr {
        text: PAGE2_PARA.to_string(),
    };

    let pages = extract::extract_document(
        &pdf,
        "physics",
        &ExtractionConfig::default(),
        &OcrConfig::default(),
        &ocr,
    )
    .await
    .expect("extraction");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].method, ExtractionMethod::TextLayer);
    assert_eq!(pages[1].method, ExtractionMethod::Ocr);
    assert!(pages[0].raw_text.contains("Chapter 1"));
    assert!(pages[1].raw_text.contains("resistance"));

    let cleaned: Vec<CleanedPage> = pages
        .iter()
        .map(|p| CleanedPage {
            page_no: p.page_no,
            text: p.raw_text.clone(),
        })
        .collect();

    let markers = MarkerSet::compile(&SegmenterConfig::default().markers).unwrap();
    let chunking = ChunkingConfig {
        min_chars: 40,
        max_chars: 600,
    };
    let (tree, chunks) = segment_pages(&cleaned, "doc-1", "physics", &markers, &chunking);

    let chapter_nodes: Vec<_> = tree
        .nodes
        .iter()
        .filter(|n| n.title == "Chapter 1")
        .collect();
    assert_eq!(chapter_nodes.len(), 1);
    assert_eq!(chapter_nodes[0].level, 1);

    assert!(
        chunks
            .iter()
            .any(|c| c.hierarchy_path == vec!["Chapter 1".to_string()]),
        "expected a chunk under the Chapter 1 path"
    );
}

/// No data loss: every page is accounted for even when OCR is disabled —
/// the scanned page surfaces as `unextractable` instead of vanishing.
#[tokio::test]
async fn scanned_page_without_ocr_is_flagged_not_dropped() {
    let pdf = two_page_pdf(HEADING, PAGE1_PARA);

    let pages = extract::extract_document(
        &pdf,
        "physics",
        &ExtractionConfig::default(),
        &OcrConfig::default(),
        &DisabledOcr,
    )
    .await
    .expect("extraction");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].method, ExtractionMethod::TextLayer);
    assert_eq!(pages[1].method, ExtractionMethod::Unextractable);
}

/// Querying "Ohm's Law" must surface both the literal
/// formula chunk (via dense rank) and the prose chunk (via sparse rank),
/// with the lexical match first and a deterministic fused order.
#[tokio::test]
async fn ohms_law_hybrid_scenario() {
    let store = InMemoryStore::new();

    let formula = make_chunk("c-formula", "physics", "V = I × R");
    let prose = make_chunk(
        "c-prose",
        "physics",
        "Ohm's Law states that voltage equals current times resistance",
    );
    let unrelated = make_chunk(
        "c-unrelated",
        "physics",
        "Photosynthesis converts light into chemical energy",
    );

    let chunks = vec![formula.clone(), prose.clone(), unrelated.clone()];
    store
        .replace_document(&make_doc("physics"), &[], &chunks)
        .await
        .unwrap();

    // The formula chunk is the query's nearest dense neighbor; the prose
    // chunk matches lexically.
    let vectors = [
        ("c-formula", vec![0.95f32, 0.05]),
        ("c-prose", vec![0.80, 0.20]),
        ("c-unrelated", vec![0.0, 1.0]),
    ];
    for chunk in &chunks {
        let (_, vec) = vectors.iter().find(|(id, _)| *id == chunk.id).unwrap();
        DenseIndex::upsert(&store, chunk, vec, "test-model")
            .await
            .unwrap();
        SparseIndex::upsert(&store, chunk).await.unwrap();
        store
            .set_chunk_status(&chunk.id, ChunkStatus::Committed)
            .await
            .unwrap();
    }

    let retriever = HybridRetriever::new(&store, &store);
    let params = RetrievalParams {
        rrf_k: 60,
        k_dense: 10,
        k_sparse: 10,
        top_k: 5,
    };
    let query_vec = vec![1.0f32, 0.0];

    let outcome = retriever
        .query("Ohm's Law", Some(&query_vec), "physics", &params)
        .await
        .unwrap();

    assert!(outcome.degraded.is_none());
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert!(ids.contains(&"c-formula"), "dense match missing: {:?}", ids);
    assert!(ids.contains(&"c-prose"), "lexical match missing: {:?}", ids);
    // The prose chunk holds sparse rank 1 and a dense rank, so it fuses
    // ahead of the formula chunk's single dense contribution.
    assert_eq!(ids[0], "c-prose");

    for _ in 0..5 {
        let again = retriever
            .query("Ohm's Law", Some(&query_vec), "physics", &params)
            .await
            .unwrap();
        let again_ids: Vec<&str> = again.results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, again_ids, "fused ordering must be deterministic");
    }
}

/// Cross-subject isolation: a physics query never surfaces biology chunks.
#[tokio::test]
async fn queries_never_leak_across_subjects() {
    let store = InMemoryStore::new();

    let physics = make_chunk("c-phys", "physics", "Current is measured in amperes");
    let mut biology_doc = make_doc("biology");
    biology_doc.id = "doc-bio".to_string();
    let mut biology = make_chunk("c-bio", "biology", "Current flows through ion channels");
    biology.document_id = "doc-bio".to_string();

    store
        .replace_document(&make_doc("physics"), &[], &[physics.clone()])
        .await
        .unwrap();
    store
        .replace_document(&biology_doc, &[], &[biology.clone()])
        .await
        .unwrap();
    for chunk in [&physics, &biology] {
        SparseIndex::upsert(&store, chunk).await.unwrap();
        store
            .set_chunk_status(&chunk.id, ChunkStatus::Committed)
            .await
            .unwrap();
    }

    let retriever = HybridRetriever::new(&store, &store);
    let params = RetrievalParams {
        rrf_k: 60,
        k_dense: 10,
        k_sparse: 10,
        top_k: 5,
    };

    let outcome = retriever
        .query("current", None, "physics", &params)
        .await
        .unwrap();
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c-phys"]);
}

/// Full write path: extract → segment → dual-index through the Indexer,
/// then retrieve through the committed partition.
#[tokio::test]
async fn end_to_end_ingest_and_retrieve_in_memory() {
    let pdf = two_page_pdf(HEADING, PAGE1_PARA);
    let ocr = StubOcr {
        text: PAGE2_PARA.to_string(),
    };

    let pages = extract::extract_document(
        &pdf,
        "physics",
        &ExtractionConfig::default(),
        &OcrConfig::default(),
        &ocr,
    )
    .await
    .unwrap();

    let cleaned: Vec<CleanedPage> = pages
        .iter()
        .filter(|p| !p.is_unextractable())
        .map(|p| CleanedPage {
            page_no: p.page_no,
            text: p.raw_text.clone(),
        })
        .collect();
    let markers = MarkerSet::compile(&SegmenterConfig::default().markers).unwrap();
    let chunking = ChunkingConfig {
        min_chars: 40,
        max_chars: 600,
    };
    let (_, chunks) = segment_pages(&cleaned, "doc", "physics", &markers, &chunking);
    assert!(!chunks.is_empty());

    let store = InMemoryStore::new();
    let indexer = Indexer::new(&store, &store, &store, "disabled", 0);
    let outcome = indexer
        .index_document(&make_doc("physics"), &pages, &chunks, ChunkVectors::Disabled)
        .await
        .unwrap();
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.committed as usize, chunks.len());

    let retriever = HybridRetriever::new(&store, &store);
    let params = RetrievalParams {
        rrf_k: 60,
        k_dense: 10,
        k_sparse: 10,
        top_k: 5,
    };
    let outcome = retriever
        .query("resistance", None, "physics", &params)
        .await
        .unwrap();
    assert!(
        !outcome.results.is_empty(),
        "committed chunks should be retrievable"
    );
}
