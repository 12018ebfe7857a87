//! Page text extraction with OCR fallback and column handling.
//!
//! Each page tries the PDF text layer first (`pdf-extract`); if the result
//! is empty, sparse, or garbled, the page falls back to OCR. A page both
//! tiers fail on is marked unextractable and reported — it is never
//! silently dropped, and it never aborts the batch.
//!
//! Column detection runs before a page's text is accepted: two-column
//! layouts are split at the gutter and read left column top-to-bottom,
//! then right column, instead of interleaving lines across the gutter.

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ColumnConfig, ExtractionConfig, OcrConfig};
use crate::models::{ColumnLayout, ExtractionMethod, PageDraft};
use crate::ocr::{OcrBlock, OcrEngine};

/// Whole-document extraction failure. Per-page failures are absorbed into
/// `unextractable` page records instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF parse failed: {0}")]
    Pdf(String),
}

/// Extract every page of a PDF, in page order.
///
/// Guarantees one [`PageDraft`] per page: `text-layer`, `ocr`, or
/// `unextractable`. Only an unparseable PDF fails the whole document.
pub async fn extract_document(
    bytes: &[u8],
    subject: &str,
    extraction: &ExtractionConfig,
    ocr_config: &OcrConfig,
    ocr: &dyn OcrEngine,
) -> Result<Vec<PageDraft>, ExtractError> {
    let page_texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = Vec::with_capacity(page_texts.len());
    for (i, text) in page_texts.iter().enumerate() {
        let page_no = i + 1;
        let page = extract_page(bytes, page_no, text, subject, extraction, ocr_config, ocr).await;
        pages.push(page);
    }
    Ok(pages)
}

/// Decide between text-layer and OCR for one page and produce its record.
pub(crate) async fn extract_page(
    bytes: &[u8],
    page_no: usize,
    text_layer: &str,
    subject: &str,
    extraction: &ExtractionConfig,
    ocr_config: &OcrConfig,
    ocr: &dyn OcrEngine,
) -> PageDraft {
    let (layout, ordered) = order_columns(text_layer, &extraction.columns);
    if passes_quality_gate(&ordered, extraction) {
        return PageDraft {
            page_no,
            method: ExtractionMethod::TextLayer,
            layout,
            raw_text: ordered,
        };
    }

    if ocr.is_enabled() {
        debug!(page_no, subject, "text layer below quality gate, running OCR");
        let languages = ocr_config.languages_for(subject);
        let deadline = std::time::Duration::from_secs(ocr_config.timeout_secs);
        match tokio::time::timeout(deadline, ocr.recognize(bytes, page_no, languages)).await {
            Ok(Ok(output)) => {
                let (layout, ordered) = if output.blocks.is_empty() {
                    order_columns(&output.text, &extraction.columns)
                } else {
                    order_blocks(&output.blocks)
                };
                if passes_quality_gate(&ordered, extraction) {
                    return PageDraft {
                        page_no,
                        method: ExtractionMethod::Ocr,
                        layout,
                        raw_text: ordered,
                    };
                }
                warn!(page_no, "OCR output below quality gate, page unextractable");
            }
            Ok(Err(e)) => {
                warn!(page_no, error = %e, "OCR failed, page unextractable");
            }
            Err(_) => {
                warn!(
                    page_no,
                    timeout_secs = ocr_config.timeout_secs,
                    "OCR timed out, page unextractable"
                );
            }
        }
    } else {
        warn!(page_no, "no text layer and OCR disabled, page unextractable");
    }

    PageDraft {
        page_no,
        method: ExtractionMethod::Unextractable,
        layout: ColumnLayout::Single,
        raw_text: text_layer.to_string(),
    }
}

/// Accept a page's text only if it clears the character floor and the
/// recognizable-script ratio.
pub fn passes_quality_gate(text: &str, config: &ExtractionConfig) -> bool {
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_ws < config.min_chars_per_page {
        return false;
    }
    script_ratio(text) >= config.min_script_ratio
}

/// Fraction of non-whitespace characters belonging to a recognizable
/// script (Latin letters, Arabic letters, digits).
pub fn script_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut recognizable = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_recognizable(c) {
            recognizable += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    recognizable as f64 / total as f64
}

fn is_recognizable(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c,
            '\u{0600}'..='\u{06FF}'    // Arabic
            | '\u{0750}'..='\u{077F}'  // Arabic Supplement
            | '\u{FB50}'..='\u{FDFF}'  // Arabic Presentation Forms-A
            | '\u{FE70}'..='\u{FEFF}'  // Arabic Presentation Forms-B
            | '\u{00C0}'..='\u{024F}') // Latin-1 Supplement / Extended
}

/// Detect a two-column layout in plain text and reorder it left column
/// first. Returns the detected layout and the (possibly reordered) text.
pub fn order_columns(text: &str, config: &ColumnConfig) -> (ColumnLayout, String) {
    let lines: Vec<&str> = text.lines().collect();
    match detect_text_gutter(&lines, config) {
        Some(gutter) => {
            let reordered = split_two_columns(&lines, gutter);
            (ColumnLayout::TwoColumn { gutter }, reordered)
        }
        None => (ColumnLayout::Single, text.to_string()),
    }
}

/// Whitespace-gutter heuristic: a run of spaces at a consistent character
/// column across most long lines marks a two-column layout.
pub(crate) fn detect_text_gutter(lines: &[&str], config: &ColumnConfig) -> Option<usize> {
    // Only lines long enough to plausibly span both columns vote.
    let candidates: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| l.trim_end().chars().count() >= 2 * config.min_gutter_spaces + 8)
        .collect();
    if candidates.len() < config.min_lines {
        return None;
    }

    // Centers of interior space runs, per line.
    let mut centers: Vec<Vec<usize>> = Vec::with_capacity(candidates.len());
    for line in &candidates {
        centers.push(interior_space_runs(line, config.min_gutter_spaces));
    }

    // Vote: for every observed center, count lines with a center within
    // tolerance, and keep the best-supported position.
    let mut best: Option<(usize, usize)> = None; // (center, votes)
    for line_centers in &centers {
        for &center in line_centers {
            let votes = centers
                .iter()
                .filter(|cs| {
                    cs.iter()
                        .any(|&c| c.abs_diff(center) <= config.gutter_tolerance)
                })
                .count();
            match best {
                Some((_, best_votes)) if votes <= best_votes => {}
                _ => best = Some((center, votes)),
            }
        }
    }

    let (center, votes) = best?;
    let needed = (candidates.len() as f64 * config.min_gutter_line_ratio).ceil() as usize;
    if votes >= needed {
        Some(center)
    } else {
        None
    }
}

/// Character-column centers of space runs with text on both sides.
fn interior_space_runs(line: &str, min_len: usize) -> Vec<usize> {
    let chars: Vec<char> = line.trim_end().chars().collect();
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            // Interior only: text must precede the run.
            if start > 0 && i - start >= min_len {
                runs.push(start + (i - start) / 2);
            }
        }
    }
    runs
}

/// Split each line at the gutter and emit the left column's lines before
/// the right column's.
fn split_two_columns(lines: &[&str], gutter: usize) -> String {
    let mut left = Vec::new();
    let mut right = Vec::new();

    for line in lines {
        let chars: Vec<char> = line.chars().collect();
        if chars.len() <= gutter {
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                left.push(trimmed.to_string());
            }
            continue;
        }
        let l: String = chars[..gutter].iter().collect();
        let r: String = chars[gutter..].iter().collect();
        let l = l.trim_end();
        let r = r.trim_start();
        if !l.is_empty() {
            left.push(l.to_string());
        }
        if !r.is_empty() {
            right.push(r.to_string());
        }
    }

    let mut out = left.join("\n");
    if !right.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&right.join("\n"));
    }
    out
}

/// Order OCR layout blocks into reading order, splitting two vertical
/// bands at the page midline when no block bridges it.
pub(crate) fn order_blocks(blocks: &[OcrBlock]) -> (ColumnLayout, String) {
    if blocks.is_empty() {
        return (ColumnLayout::Single, String::new());
    }

    let min_x = blocks.iter().map(|b| b.x0).fold(f32::INFINITY, f32::min);
    let max_x = blocks.iter().map(|b| b.x1).fold(f32::NEG_INFINITY, f32::max);
    let mid = (min_x + max_x) / 2.0;

    let bridging = blocks
        .iter()
        .filter(|b| b.x0 < mid && b.x1 > mid)
        .count();

    // A block straddling the midline means full-width text: single column.
    if bridging * 5 > blocks.len() {
        let mut ordered: Vec<&OcrBlock> = blocks.iter().collect();
        ordered.sort_by(|a, b| {
            a.y0.partial_cmp(&b.y0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal))
        });
        let text = ordered
            .iter()
            .map(|b| b.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        return (ColumnLayout::Single, text);
    }

    let mut left: Vec<&OcrBlock> = blocks.iter().filter(|b| b.x1 <= mid).collect();
    let mut right: Vec<&OcrBlock> = blocks.iter().filter(|b| b.x1 > mid).collect();
    let by_y = |a: &&OcrBlock, b: &&OcrBlock| {
        a.y0.partial_cmp(&b.y0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal))
    };
    left.sort_by(by_y);
    right.sort_by(by_y);

    let text = left
        .iter()
        .chain(right.iter())
        .map(|b| b.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (ColumnLayout::TwoColumn { gutter: mid as usize }, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{DisabledOcr, OcrOutput};
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;

    fn extraction() -> ExtractionConfig {
        ExtractionConfig::default()
    }

    #[test]
    fn quality_gate_rejects_sparse_pages() {
        assert!(!passes_quality_gate("a few chars", &extraction()));
        let dense = "The mitochondria is the powerhouse of the cell. ".repeat(4);
        assert!(passes_quality_gate(&dense, &extraction()));
    }

    #[test]
    fn quality_gate_rejects_garbled_pages() {
        let garbled = "\u{fffd}\u{fffd}~~##@@!!\u{fffd}".repeat(10);
        assert!(!passes_quality_gate(&garbled, &extraction()));
    }

    #[test]
    fn script_ratio_counts_arabic() {
        let arabic = "الفيزياء علم طبيعي";
        assert!(script_ratio(arabic) > 0.9);
    }

    #[test]
    fn detects_two_column_gutter() {
        let lines: Vec<String> = (0..12)
            .map(|i| format!("left column text {:02}    right column text {:02}", i, i))
            .collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let gutter = detect_text_gutter(&refs, &ColumnConfig::default());
        assert!(gutter.is_some(), "expected a gutter");
        let g = gutter.unwrap();
        assert!((19..=23).contains(&g), "gutter at unexpected column {}", g);
    }

    #[test]
    fn no_gutter_in_prose() {
        let lines: Vec<String> = (0..12)
            .map(|i| format!("an ordinary sentence number {} without a fixed gap inside", i))
            .collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        assert_eq!(detect_text_gutter(&refs, &ColumnConfig::default()), None);
    }

    #[test]
    fn two_columns_read_left_then_right() {
        let lines = vec!["alpha    one", "bravo    two", "charlie  three"];
        let text = split_two_columns(&lines, 8);
        let order: Vec<&str> = text.lines().collect();
        assert_eq!(order, vec!["alpha", "bravo", "charlie", "one", "two", "three"]);
    }

    #[test]
    fn block_ordering_splits_bands() {
        let block = |text: &str, x0: f32, x1: f32, y0: f32| OcrBlock {
            text: text.to_string(),
            x0,
            y0,
            x1,
            y1: y0 + 10.0,
        };
        let blocks = vec![
            block("right top", 320.0, 600.0, 0.0),
            block("left top", 0.0, 280.0, 0.0),
            block("left bottom", 0.0, 280.0, 50.0),
            block("right bottom", 320.0, 600.0, 50.0),
        ];
        let (layout, text) = order_blocks(&blocks);
        assert!(matches!(layout, ColumnLayout::TwoColumn { .. }));
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec!["left top", "left bottom", "right top", "right bottom"]
        );
    }

    struct StubOcr {
        text: String,
    }

    #[async_trait]
    impl OcrEngine for StubOcr {
        fn is_enabled(&self) -> bool {
            true
        }
        async fn recognize(
            &self,
            _pdf: &[u8],
            _page_no: usize,
            _languages: &str,
        ) -> AnyResult<OcrOutput> {
            Ok(OcrOutput {
                text: self.text.clone(),
                blocks: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn falls_back_to_ocr_when_text_layer_is_empty() {
        let ocr_text = "Electric current is the flow of charge through a conductor, \
                        measured in amperes across a potential difference."
            .to_string();
        let stub = StubOcr { text: ocr_text };
        let page = extract_page(
            b"",
            1,
            "",
            "physics",
            &extraction(),
            &crate::config::OcrConfig::default(),
            &stub,
        )
        .await;
        assert_eq!(page.method, ExtractionMethod::Ocr);
        assert!(page.raw_text.contains("amperes"));
    }

    #[tokio::test]
    async fn unextractable_when_both_tiers_fail() {
        let page = extract_page(
            b"",
            2,
            "",
            "physics",
            &extraction(),
            &crate::config::OcrConfig::default(),
            &DisabledOcr,
        )
        .await;
        assert_eq!(page.method, ExtractionMethod::Unextractable);
        assert_eq!(page.page_no, 2);
    }
}
