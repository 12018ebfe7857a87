//! Subject-aware text cleaning.
//!
//! `clean` is a pure, deterministic, idempotent pipeline conditioned on a
//! [`CleaningProfile`]: noise stripping first, then script normalization,
//! then subject-specific symbol handling. Stripping is line-level only, so
//! in-word notation (subscripts, superscripts, chemical formulas) always
//! survives.
//!
//! Profiles are data, not subclasses: the config maps each subject to a
//! named profile and the cleaner receives the resolved struct.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::config::CleaningProfile;

static ISOLATED_LATIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" [A-Za-z] ").expect("invalid isolated-latin pattern"));
static ARABIC_PUNCT_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([،؛؟])").expect("invalid arabic punctuation pattern"));
static BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[·•●○]\s*").expect("invalid bullet pattern"));
static CHOICE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([A-D]\.)\s+").expect("invalid choice-label pattern"));
static SPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("invalid space-run pattern"));

/// Operators padded into standalone tokens for math/physics subjects.
/// ASCII hyphen is deliberately absent so hyphenated words survive.
const MATH_OPERATORS: [char; 9] = ['=', '+', '−', '×', '÷', '<', '>', '≤', '≥'];

/// Clean raw page text under a subject profile.
pub fn clean(raw: &str, profile: &CleaningProfile) -> String {
    let text = strip_noise(raw, profile);
    let text = if profile.normalize_arabic {
        normalize_arabic(&text)
    } else {
        text
    };
    apply_subject_rules(&text, profile)
}

/// Flag text whose codepoint mix suggests a broken extraction. The caller
/// logs the anomaly and proceeds with best-effort cleaning; the raw text
/// stays on the page record for auditing.
pub fn detect_anomaly(raw: &str) -> Option<String> {
    let total = raw.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return None;
    }
    let suspicious = raw
        .chars()
        .filter(|c| *c == '\u{fffd}' || (c.is_control() && *c != '\n' && *c != '\t'))
        .count();
    if suspicious * 5 > total {
        Some(format!(
            "{} of {} characters are control/replacement codepoints",
            suspicious, total
        ))
    } else {
        None
    }
}

/// Log-and-continue wrapper used by the ingestion pipeline.
pub fn clean_page(raw: &str, profile: &CleaningProfile, page_no: usize) -> String {
    if let Some(reason) = detect_anomaly(raw) {
        warn!(page_no, %reason, "cleaning anomaly, raw text retained on page record");
    }
    clean(raw, profile)
}

fn strip_noise(text: &str, profile: &CleaningProfile) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        let line: String = line
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect();
        let s = line.trim();
        if s.is_empty() {
            continue;
        }
        if profile.strip_page_numbers && s.len() < 4 && s.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if s.chars().count() < profile.min_line_chars && !matches!(s, "." | "!" | "?") {
            continue;
        }
        if is_separator_line(s) {
            continue;
        }
        if s.matches('|').count() > profile.max_pipes_per_line
            || s.matches('_').count() > profile.max_underscores_per_line
        {
            continue;
        }
        if is_caption_line(s, profile) {
            continue;
        }
        kept.push(s.to_string());
    }
    kept.join("\n")
}

fn is_separator_line(s: &str) -> bool {
    s.chars().all(|c| matches!(c, '-' | '_' | '=' | '—' | '–' | '*' | ' '))
}

fn is_caption_line(s: &str, profile: &CleaningProfile) -> bool {
    if profile.caption_keywords.is_empty() || s.chars().count() > profile.caption_max_chars {
        return false;
    }
    let lower = s.to_lowercase();
    profile.caption_keywords.iter().any(|kw| {
        lower.strip_prefix(&kw.to_lowercase()).is_some_and(|rest| {
            rest.chars()
                .next()
                .map(|c| c.is_whitespace() || c.is_ascii_digit() || matches!(c, '.' | ':' | '(' | '،'))
                .unwrap_or(true)
        })
    })
}

fn normalize_arabic(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !is_tashkeel(*c) && *c != '\u{0640}')
        .collect();

    // Isolated Latin letters inside Arabic lines are OCR artifacts.
    // Re-apply to a fixpoint: single-pass replacement can uncover new
    // matches, and cleaning must be idempotent.
    let mut current = stripped;
    loop {
        let next = ISOLATED_LATIN.replace_all(&current, " ").into_owned();
        if next == current {
            break;
        }
        current = next;
    }

    ARABIC_PUNCT_SPACE.replace_all(&current, "$1").into_owned()
}

fn is_tashkeel(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}')
}

fn apply_subject_rules(text: &str, profile: &CleaningProfile) -> String {
    let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();

    if profile.pad_math_operators {
        for line in lines.iter_mut() {
            let mut padded = String::with_capacity(line.len());
            for c in line.chars() {
                if MATH_OPERATORS.contains(&c) {
                    padded.push(' ');
                    padded.push(c);
                    padded.push(' ');
                } else {
                    padded.push(c);
                }
            }
            *line = SPACE_RUN.replace_all(&padded, " ").trim().to_string();
        }
    }

    if profile.normalize_bullets {
        for line in lines.iter_mut() {
            *line = BULLET_PREFIX.replace(line, "- ").into_owned();
        }
    }

    let mut out = lines.join("\n");

    if profile.split_choice_labels {
        out = CHOICE_LABEL.replace_all(&out, "\n$1 ").into_owned();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleaningConfig;

    fn profile(name: &str) -> CleaningProfile {
        let profiles = CleaningConfig::default().profiles;
        profiles.get(name).cloned().unwrap()
    }

    #[test]
    fn strips_page_numbers_and_separators() {
        let raw = "Energy is conserved in closed systems.\n42\n-----\n___\nMore physics follows.";
        let out = clean(raw, &profile("general"));
        assert!(!out.contains("42"));
        assert!(!out.contains("-----"));
        assert!(out.contains("Energy is conserved"));
        assert!(out.contains("More physics follows."));
    }

    #[test]
    fn strips_caption_lines() {
        let raw = "The cell divides by mitosis.\nFig. 3 cell division stages\nEach phase is distinct.";
        let out = clean(raw, &profile("science"));
        assert!(!out.contains("Fig. 3"));
        assert!(out.contains("mitosis"));
    }

    #[test]
    fn keeps_long_lines_mentioning_figures() {
        let raw = "The figure of merit for this detector depends on temperature, \
                   bias voltage, and the geometry of the depletion region.";
        let out = clean(raw, &profile("science"));
        assert!(out.contains("figure of merit"));
    }

    #[test]
    fn pads_math_operators() {
        let out = clean("V=I×R", &profile("math"));
        assert_eq!(out, "V = I × R");
    }

    #[test]
    fn preserves_chemical_formulas() {
        let out = clean("Water is H2O and glucose is C6H12O6 in the reaction.", &profile("science"));
        assert!(out.contains("H2O"));
        assert!(out.contains("C6H12O6"));
    }

    #[test]
    fn arabic_diacritics_are_normalized() {
        let raw = "الفِيزِيَاء عِلْمٌ طَبِيعِيٌّ مهم جدا في حياتنا";
        let out = clean(raw, &profile("arabic"));
        assert!(out.contains("الفيزياء"));
        assert!(!out.contains('\u{064E}'));
    }

    #[test]
    fn arabic_punctuation_is_tightened() {
        let raw = "ما هي الكهرباء ؟ سؤال مهم في الفيزياء الحديثة";
        let out = clean(raw, &profile("arabic"));
        assert!(out.contains("الكهرباء؟"));
    }

    #[test]
    fn latin_runs_inside_arabic_stay_in_place() {
        let raw = "قانون Ohm ينص على العلاقة بين الجهد والتيار في الدوائر";
        let out = clean(raw, &profile("arabic"));
        assert!(out.contains("Ohm"), "multi-letter Latin terms must survive: {}", out);
    }

    #[test]
    fn bullets_are_normalized() {
        let raw = "• photosynthesis happens in chloroplasts\n● respiration happens in mitochondria";
        let out = clean(raw, &profile("science"));
        for line in out.lines() {
            assert!(line.starts_with("- "), "line not normalized: {}", line);
        }
    }

    #[test]
    fn choice_labels_split_onto_own_lines() {
        let raw = "Which unit measures current? A. volt B. ampere C. ohm D. watt";
        let out = clean(raw, &profile("general"));
        assert!(out.contains("\nA. volt"));
        assert!(out.contains("\nB. ampere"));
    }

    #[test]
    fn cleaning_is_idempotent_across_profiles() {
        let samples = [
            "V=I×R\n42\nFig. 1 circuit\nThe current I flows when V is applied.",
            "الدَرْسُ الأَوَّل : الكهرباء ؟ مقدمة عامة\nقانون أوم مهم جدا",
            "• first point about cells\nSome long explanation of biology follows here.",
            "Question one? A. yes B. no C. maybe D. unsure",
        ];
        for name in ["arabic", "math", "science", "general"] {
            let p = profile(name);
            for raw in &samples {
                let once = clean(raw, &p);
                let twice = clean(&once, &p);
                assert_eq!(once, twice, "profile {} not idempotent on {:?}", name, raw);
            }
        }
    }

    #[test]
    fn anomaly_detected_for_garbled_text() {
        let garbled = "\u{fffd}\u{fffd}\u{fffd}ab";
        assert!(detect_anomaly(garbled).is_some());
        assert!(detect_anomaly("perfectly ordinary text").is_none());
    }
}
