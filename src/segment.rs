//! Paragraph reconstruction, hierarchy segmentation, and chunk emission.
//!
//! The segmenter repairs paragraphs broken by OCR line breaks and column
//! splits, scans for structural markers (Unit/Chapter/Lesson headings in
//! the configured languages), builds an arena-backed hierarchy tree, and
//! walks it depth-first emitting bounded chunks that carry their full
//! ancestor-title path.
//!
//! Two hard rules hold throughout: no text is ever discarded (content
//! before the first marker lands in an unlabeled fallback node), and no
//! chunk ever spans two top-level hierarchy units.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{ChunkingConfig, MarkerRule};
use crate::models::{Chunk, ChunkStatus, CleanedPage};

/// Characters that terminate a paragraph-final line.
const TERMINAL_PUNCTUATION: [char; 8] = ['.', ':', '!', '?', '؟', '؛', ';', '…'];

/// A matched structural heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// Marker class from config (1 = Unit, 2 = Chapter, 3 = Lesson).
    pub level: u8,
    pub title: String,
}

/// Compiled per-language heading patterns.
pub struct MarkerSet {
    rules: Vec<(u8, regex::Regex)>,
}

impl MarkerSet {
    pub fn compile(rules: &[MarkerRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let re = regex::Regex::new(&rule.pattern)
                .with_context(|| format!("invalid marker pattern: {}", rule.pattern))?;
            compiled.push((rule.level, re));
        }
        Ok(Self { rules: compiled })
    }

    /// Match a line against the marker rules; the shallowest matching
    /// level wins when patterns overlap.
    pub fn match_line(&self, line: &str) -> Option<Marker> {
        let trimmed = line.trim();
        self.rules
            .iter()
            .filter(|(_, re)| re.is_match(trimmed))
            .map(|(level, _)| *level)
            .min()
            .map(|level| Marker {
                level,
                title: trimmed.to_string(),
            })
    }
}

/// One node of the hierarchy tree.
///
/// The tree is an arena: nodes refer to each other by index, never by
/// reference, and chunks materialize their ancestor path instead of
/// borrowing from the tree.
#[derive(Debug)]
pub struct HierarchyNode {
    pub id: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Ordinal depth in the tree (root = 0).
    pub level: u8,
    /// Marker class that opened this node; controls nesting.
    marker_level: u8,
    /// Empty for the unlabeled fallback node.
    pub title: String,
    pub first_page: usize,
    pub last_page: usize,
    /// Reconstructed paragraphs owned by this node.
    pub spans: Vec<String>,
}

#[derive(Debug)]
pub struct HierarchyTree {
    pub nodes: Vec<HierarchyNode>,
}

impl HierarchyTree {
    fn new() -> Self {
        Self {
            nodes: vec![HierarchyNode {
                id: 0,
                parent: None,
                children: Vec::new(),
                level: 0,
                marker_level: 0,
                title: String::new(),
                first_page: 1,
                last_page: 1,
                spans: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> &HierarchyNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: usize) -> &HierarchyNode {
        &self.nodes[id]
    }

    fn add_child(&mut self, parent: usize, marker_level: u8, title: String, page: usize) -> usize {
        let id = self.nodes.len();
        let depth = self.nodes[parent].level + 1;
        self.nodes.push(HierarchyNode {
            id,
            parent: Some(parent),
            children: Vec::new(),
            level: depth,
            marker_level,
            title,
            first_page: page,
            last_page: page,
            spans: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn touch_page(&mut self, id: usize, page: usize) {
        let mut current = Some(id);
        while let Some(i) = current {
            let node = &mut self.nodes[i];
            node.last_page = node.last_page.max(page);
            current = node.parent;
        }
    }

    /// Ancestor titles root→node, skipping the synthetic root and
    /// unlabeled fallback titles.
    pub fn path_titles(&self, id: usize) -> Vec<String> {
        let mut titles = Vec::new();
        let mut current = Some(id);
        while let Some(i) = current {
            let node = &self.nodes[i];
            if !node.title.is_empty() {
                titles.push(node.title.clone());
            }
            current = node.parent;
        }
        titles.reverse();
        titles
    }
}

#[derive(Debug)]
enum Element {
    Heading { marker: Marker, page: usize },
    Paragraph { text: String, page: usize },
}

/// Segment a document's cleaned pages into a hierarchy tree and bounded
/// chunks.
pub fn segment_pages(
    pages: &[CleanedPage],
    document_id: &str,
    subject: &str,
    markers: &MarkerSet,
    chunking: &ChunkingConfig,
) -> (HierarchyTree, Vec<Chunk>) {
    let elements = reconstruct(pages, markers);
    let tree = build_tree(elements);
    let chunks = emit_chunks(&tree, document_id, subject, chunking);
    (tree, chunks)
}

/// Merge text fragments broken across OCR line breaks and column
/// boundaries back into paragraphs.
///
/// A line joins the open paragraph when that paragraph's last line lacks
/// terminal punctuation and the new line reads as a continuation. The
/// merge may carry across a page boundary, but never across one that also
/// starts a new hierarchy section.
fn reconstruct(pages: &[CleanedPage], markers: &MarkerSet) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut open: Option<(String, usize)> = None; // (text, starting page)
    let mut open_terminal = true;

    for page in pages {
        let mut first_line_of_page = true;
        for raw_line in page.text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(marker) = markers.match_line(line) {
                if let Some((text, p)) = open.take() {
                    elements.push(Element::Paragraph { text, page: p });
                }
                elements.push(Element::Heading {
                    marker,
                    page: page.page_no,
                });
                open_terminal = true;
                first_line_of_page = false;
                continue;
            }

            let continues = !open_terminal && is_continuation(line);
            // Within a page any unterminated line merges; across pages the
            // next line must read as a continuation.
            let merge = open.is_some() && !open_terminal && (!first_line_of_page || continues);

            if merge {
                if let Some((text, _)) = open.as_mut() {
                    text.push(' ');
                    text.push_str(line);
                }
            } else {
                if let Some((text, p)) = open.take() {
                    elements.push(Element::Paragraph { text, page: p });
                }
                open = Some((line.to_string(), page.page_no));
            }

            open_terminal = ends_terminal(line);
            if open_terminal {
                if let Some((text, p)) = open.take() {
                    elements.push(Element::Paragraph { text, page: p });
                }
            }
            first_line_of_page = false;
        }
    }

    if let Some((text, p)) = open.take() {
        elements.push(Element::Paragraph { text, page: p });
    }

    elements
}

fn ends_terminal(line: &str) -> bool {
    line.chars()
        .last()
        .map(|c| TERMINAL_PUNCTUATION.contains(&c))
        .unwrap_or(false)
}

fn is_continuation(line: &str) -> bool {
    match line.chars().next() {
        Some(c) => c.is_lowercase() || is_arabic_letter(c),
        None => false,
    }
}

fn is_arabic_letter(c: char) -> bool {
    matches!(c, '\u{0620}'..='\u{064A}' | '\u{0671}'..='\u{06D3}')
}

/// Build the hierarchy tree from the reconstructed element stream.
///
/// A level-L marker closes every open node whose marker class is >= L and
/// opens a child of the nearest shallower node. Paragraphs attach to the
/// deepest open node; paragraphs before any marker go to an unlabeled
/// fallback node so nothing is discarded.
fn build_tree(elements: Vec<Element>) -> HierarchyTree {
    let mut tree = HierarchyTree::new();
    let mut stack: Vec<usize> = vec![0];
    let mut fallback: Option<usize> = None;

    for element in elements {
        match element {
            Element::Heading { marker, page } => {
                while stack.len() > 1
                    && tree.nodes[*stack.last().unwrap()].marker_level >= marker.level
                {
                    stack.pop();
                }
                let parent = *stack.last().unwrap();
                let id = tree.add_child(parent, marker.level, marker.title, page);
                stack.push(id);
                tree.touch_page(id, page);
            }
            Element::Paragraph { text, page } => {
                let top = *stack.last().unwrap();
                let target = if top == 0 {
                    *fallback
                        .get_or_insert_with(|| tree.add_child(0, 1, String::new(), page))
                } else {
                    top
                };
                tree.nodes[target].spans.push(text);
                tree.touch_page(target, page);
            }
        }
    }

    tree
}

/// Walk the tree depth-first and split each node's spans into chunks
/// bounded by `[min_chars, max_chars]`.
pub fn emit_chunks(
    tree: &HierarchyTree,
    document_id: &str,
    subject: &str,
    chunking: &ChunkingConfig,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    let mut stack: Vec<usize> = tree.root().children.iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if !node.spans.is_empty() {
            let path = tree.path_titles(id);
            for text in bounded_texts(&node.spans, chunking) {
                chunks.push(make_chunk(document_id, subject, index, path.clone(), &text));
                index += 1;
            }
        }
        for child in node.children.iter().rev() {
            stack.push(*child);
        }
    }

    chunks
}

/// Pack paragraphs into texts within `[min, max]`, preferring paragraph
/// boundaries, then sentence boundaries, and splitting mid-sentence only
/// when no boundary falls inside the window. The final text of a span may
/// be shorter than `min`.
fn bounded_texts(spans: &[String], chunking: &ChunkingConfig) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();

    for span in spans {
        let span = span.trim();
        if span.is_empty() {
            continue;
        }
        if span.chars().count() <= chunking.max_chars {
            push_piece(&mut buf, &mut out, span, chunking);
        } else {
            // Oversized paragraph: feed it sentence by sentence.
            for sentence in split_sentences(span) {
                push_piece(&mut buf, &mut out, sentence, chunking);
            }
        }
    }

    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Append one piece to the running buffer, flushing completed chunks.
///
/// When a piece would overflow the window and the buffer is already over
/// `min_chars`, the buffer closes at the paragraph/sentence boundary.
/// When the buffer is still under `min_chars`, the piece is cut at the
/// last whitespace inside the window instead — the only case where a
/// chunk may break mid-sentence.
fn push_piece(buf: &mut String, out: &mut Vec<String>, piece: &str, chunking: &ChunkingConfig) {
    let max = chunking.max_chars;
    let min = chunking.min_chars;
    let mut rest = piece;

    while !rest.is_empty() {
        let buf_len = buf.chars().count();
        let sep = if buf.is_empty() { 0 } else { 2 };
        let rest_len = rest.chars().count();

        if buf_len + sep + rest_len <= max {
            if sep > 0 {
                buf.push_str("\n\n");
            }
            buf.push_str(rest);
            break;
        }

        if buf_len >= min {
            out.push(std::mem::take(buf));
            continue;
        }

        // Buffer too small to close cleanly: fill it to the window edge.
        let room = max.saturating_sub(buf_len + sep).max(1);
        let (head, tail) = split_at_whitespace(rest, room);
        if head.is_empty() {
            if buf.is_empty() {
                out.push(rest.trim().to_string());
                break;
            }
            out.push(std::mem::take(buf));
            continue;
        }
        if sep > 0 {
            buf.push_str("\n\n");
        }
        buf.push_str(head);
        out.push(std::mem::take(buf));
        rest = tail;
    }

    if buf.chars().count() >= max {
        out.push(std::mem::take(buf));
    }
}

/// Split text into sentences at terminal punctuation followed by
/// whitespace. The trailing fragment without terminal punctuation is kept
/// as a final sentence.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (i, c) in text.char_indices() {
        if prev_terminal && c.is_whitespace() {
            let s = text[start..i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?' | '؟');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split at the last whitespace before `limit` chars, falling back to a
/// hard split at the limit (snapped to a char boundary).
fn split_at_whitespace(text: &str, limit: usize) -> (&str, &str) {
    let mut byte_limit = text.len();
    for (count, (i, _)) in text.char_indices().enumerate() {
        if count == limit {
            byte_limit = i;
            break;
        }
    }

    let head = &text[..byte_limit];
    let split = head.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(byte_limit);
    let split = snap_to_char_boundary(text, if split == 0 { byte_limit } else { split });
    (text[..split].trim_end(), text[split..].trim_start())
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(
    document_id: &str,
    subject: &str,
    index: i64,
    hierarchy_path: Vec<String>,
    text: &str,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        subject: subject.to_string(),
        chunk_index: index,
        hierarchy_path,
        char_len: text.chars().count(),
        text: text.to_string(),
        hash,
        status: ChunkStatus::Pending,
    }
}
