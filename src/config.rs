use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

fn default_subjects() -> Vec<String> {
    ["arabic", "math", "physics", "chemistry", "biology", "english"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Page-quality and column-detection thresholds for the text extractor.
///
/// A page's text layer is accepted only when it clears both the character
/// floor and the recognizable-script ratio; otherwise the page falls back
/// to OCR. Column detection is tunable per curriculum — the defaults suit
/// two-column textbook layouts.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Minimum non-whitespace characters for a page to count as extracted.
    #[serde(default = "default_min_chars_per_page")]
    pub min_chars_per_page: usize,
    /// Minimum fraction of non-whitespace characters that must belong to a
    /// recognizable script (Latin, Arabic, digits).
    #[serde(default = "default_min_script_ratio")]
    pub min_script_ratio: f64,
    #[serde(default)]
    pub columns: ColumnConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: default_min_chars_per_page(),
            min_script_ratio: default_min_script_ratio(),
            columns: ColumnConfig::default(),
        }
    }
}

fn default_min_chars_per_page() -> usize {
    50
}
fn default_min_script_ratio() -> f64 {
    0.5
}

/// Whitespace-gutter heuristic thresholds for two-column pages.
#[derive(Debug, Deserialize, Clone)]
pub struct ColumnConfig {
    /// Minimum consecutive spaces inside a line to count as a gutter run.
    #[serde(default = "default_min_gutter_spaces")]
    pub min_gutter_spaces: usize,
    /// Allowed drift (in character columns) of the gutter position line to line.
    #[serde(default = "default_gutter_tolerance")]
    pub gutter_tolerance: usize,
    /// Fraction of candidate lines that must share the gutter position.
    #[serde(default = "default_min_gutter_line_ratio")]
    pub min_gutter_line_ratio: f64,
    /// Minimum candidate lines on a page before column detection applies.
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            min_gutter_spaces: default_min_gutter_spaces(),
            gutter_tolerance: default_gutter_tolerance(),
            min_gutter_line_ratio: default_min_gutter_line_ratio(),
            min_lines: default_min_lines(),
        }
    }
}

fn default_min_gutter_spaces() -> usize {
    3
}
fn default_gutter_tolerance() -> usize {
    2
}
fn default_min_gutter_line_ratio() -> f64 {
    0.6
}
fn default_min_lines() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `"disabled"` or `"http"`.
    #[serde(default = "default_ocr_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ocr_max_retries")]
    pub max_retries: u32,
    /// Per-subject OCR language hints (e.g. `arabic = "ara+eng"`).
    #[serde(default = "default_ocr_languages")]
    pub languages: HashMap<String, String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_ocr_provider(),
            base_url: None,
            timeout_secs: default_ocr_timeout_secs(),
            max_retries: default_ocr_max_retries(),
            languages: default_ocr_languages(),
        }
    }
}

impl OcrConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Language hint for a subject, falling back to English.
    pub fn languages_for(&self, subject: &str) -> &str {
        self.languages
            .get(subject)
            .map(|s| s.as_str())
            .unwrap_or("eng")
    }
}

fn default_ocr_provider() -> String {
    "disabled".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    60
}
fn default_ocr_max_retries() -> u32 {
    2
}
fn default_ocr_languages() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("arabic".to_string(), "ara+eng".to_string());
    map
}

/// Subject-conditioned cleaning rules.
///
/// Profiles are plain data selected by subject key at call time; the four
/// built-in profiles (`arabic`, `math`, `science`, `general`) can be
/// overridden or extended from the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct CleaningConfig {
    /// subject → profile name. Unlisted subjects use `general`.
    #[serde(default = "default_subject_profiles")]
    pub subject_profiles: HashMap<String, String>,
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, CleaningProfile>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            subject_profiles: default_subject_profiles(),
            profiles: default_profiles(),
        }
    }
}

impl CleaningConfig {
    pub fn profile_for(&self, subject: &str) -> CleaningProfile {
        let name = self
            .subject_profiles
            .get(subject)
            .map(|s| s.as_str())
            .unwrap_or("general");
        self.profiles
            .get(name)
            .or_else(|| self.profiles.get("general"))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleaningProfile {
    /// Lines shorter than this (and not sentence punctuation) are noise.
    #[serde(default = "default_min_line_chars")]
    pub min_line_chars: usize,
    /// Drop short all-digit lines (page numbers).
    #[serde(default = "default_true")]
    pub strip_page_numbers: bool,
    /// A short line starting with one of these keywords is a caption.
    #[serde(default)]
    pub caption_keywords: Vec<String>,
    #[serde(default = "default_caption_max_chars")]
    pub caption_max_chars: usize,
    /// Strip tashkeel/tatweel and tighten Arabic punctuation.
    #[serde(default)]
    pub normalize_arabic: bool,
    /// Pad mathematical operators so they survive as standalone tokens.
    #[serde(default)]
    pub pad_math_operators: bool,
    /// Normalize bullet glyphs to `- `.
    #[serde(default)]
    pub normalize_bullets: bool,
    /// Break inline `A.`–`D.` answer options onto their own lines.
    #[serde(default)]
    pub split_choice_labels: bool,
    /// Lines with more `|` than this are table/diagram artifacts.
    #[serde(default = "default_max_pipes_per_line")]
    pub max_pipes_per_line: usize,
    #[serde(default = "default_max_underscores_per_line")]
    pub max_underscores_per_line: usize,
}

impl Default for CleaningProfile {
    fn default() -> Self {
        Self {
            min_line_chars: default_min_line_chars(),
            strip_page_numbers: true,
            caption_keywords: Vec::new(),
            caption_max_chars: default_caption_max_chars(),
            normalize_arabic: false,
            pad_math_operators: false,
            normalize_bullets: false,
            split_choice_labels: false,
            max_pipes_per_line: default_max_pipes_per_line(),
            max_underscores_per_line: default_max_underscores_per_line(),
        }
    }
}

fn default_min_line_chars() -> usize {
    3
}
fn default_caption_max_chars() -> usize {
    64
}
fn default_max_pipes_per_line() -> usize {
    2
}
fn default_max_underscores_per_line() -> usize {
    5
}
fn default_true() -> bool {
    true
}

fn default_subject_profiles() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("arabic".to_string(), "arabic".to_string());
    map.insert("math".to_string(), "math".to_string());
    map.insert("physics".to_string(), "math".to_string());
    map.insert("chemistry".to_string(), "science".to_string());
    map.insert("biology".to_string(), "science".to_string());
    map.insert("english".to_string(), "general".to_string());
    map
}

fn default_profiles() -> HashMap<String, CleaningProfile> {
    let captions = |kw: &[&str]| kw.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut map = HashMap::new();
    map.insert(
        "arabic".to_string(),
        CleaningProfile {
            caption_keywords: captions(&["شكل"]),
            normalize_arabic: true,
            ..CleaningProfile::default()
        },
    );
    map.insert(
        "math".to_string(),
        CleaningProfile {
            caption_keywords: captions(&["fig", "figure"]),
            pad_math_operators: true,
            ..CleaningProfile::default()
        },
    );
    map.insert(
        "science".to_string(),
        CleaningProfile {
            caption_keywords: captions(&["fig", "figure", "shape", "شكل"]),
            normalize_bullets: true,
            ..CleaningProfile::default()
        },
    );
    map.insert(
        "general".to_string(),
        CleaningProfile {
            split_choice_labels: true,
            ..CleaningProfile::default()
        },
    );
    map
}

/// Hierarchy-marker patterns, configurable per curriculum language.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmenterConfig {
    #[serde(default = "default_marker_rules")]
    pub markers: Vec<MarkerRule>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            markers: default_marker_rules(),
        }
    }
}

/// One heading pattern and the hierarchy level it opens (1 = Unit,
/// 2 = Chapter, 3 = Lesson).
#[derive(Debug, Deserialize, Clone)]
pub struct MarkerRule {
    pub level: u8,
    pub pattern: String,
}

fn default_marker_rules() -> Vec<MarkerRule> {
    let rule = |level: u8, pattern: &str| MarkerRule {
        level,
        pattern: pattern.to_string(),
    };
    vec![
        rule(1, r"(?i)^(?:Unit|Bab)\s+\d+\b.*"),
        rule(1, r"^(?:الباب|الوحدة)\s+(?:ال\S+|\d+).*"),
        rule(2, r"(?i)^Chapter\s+\d+\b.*"),
        rule(2, r"^الفصل\s+(?:ال\S+|\d+).*"),
        rule(3, r"(?i)^(?:Lesson|Lecture|Section)\s+\d+\b.*"),
        rule(3, r"^(?:الدرس|المحاضرة)\s+(?:ال\S+|\d+).*"),
        rule(3, r"^\d{1,2}\s*[-–]\s+\S.*"),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_min_chars() -> usize {
    200
}
fn default_max_chars() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant κ.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// Number of dense candidates to fetch.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_dense: usize,
    /// Number of sparse candidates to fetch.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_sparse: usize,
    /// Maximum results to return.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_k_dense: default_candidate_k(),
            candidate_k_sparse: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_rrf_k() -> u32 {
    60
}
fn default_candidate_k() -> usize {
    40
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"`, or `"local"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `local` provider (OpenAI-compatible endpoint).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently. Pages within a document stay
    /// sequential (paragraph reconstruction needs the previous page's tail).
    #[serde(default = "default_max_parallel_documents")]
    pub max_parallel_documents: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Retries per index half before a chunk is marked failed.
    #[serde(default = "default_index_max_retries")]
    pub index_max_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_parallel_documents: default_max_parallel_documents(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            index_max_retries: default_index_max_retries(),
        }
    }
}

fn default_max_parallel_documents() -> usize {
    4
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_index_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Conversation turns remembered per session.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"disabled"` or `"http"` (Ollama-style endpoint).
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: None,
            model: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.subjects.is_empty() {
        anyhow::bail!("subjects must not be empty");
    }

    if config.chunking.min_chars == 0 || config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.min_chars and chunking.max_chars must be > 0");
    }
    if config.chunking.min_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.min_chars must be < chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.rrf_k == 0 {
        anyhow::bail!("retrieval.rrf_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.extraction.min_script_ratio) {
        anyhow::bail!("extraction.min_script_ratio must be in [0.0, 1.0]");
    }

    match config.ocr.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.ocr.base_url.is_none() {
                anyhow::bail!("ocr.base_url must be set when ocr.provider is 'http'");
            }
        }
        other => anyhow::bail!("Unknown OCR provider: '{}'. Must be disabled or http.", other),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        "local" => {
            if config.embedding.base_url.is_none() {
                anyhow::bail!("embedding.base_url must be set when provider is 'local'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    for rule in &config.segmenter.markers {
        if rule.level == 0 || rule.level > 4 {
            anyhow::bail!("segmenter marker level must be in 1..=4, got {}", rule.level);
        }
    }

    Ok(())
}

impl Config {
    /// A minimal in-memory-friendly config for tests and tooling that
    /// doesn't need a database path from disk.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./lectern.sqlite"),
            },
            subjects: default_subjects(),
            extraction: ExtractionConfig::default(),
            ocr: OcrConfig::default(),
            cleaning: CleaningConfig::default(),
            segmenter: SegmenterConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::minimal();
        validate(&config).expect("minimal config should validate");
    }

    #[test]
    fn profile_lookup_falls_back_to_general() {
        let cleaning = CleaningConfig::default();
        let profile = cleaning.profile_for("history");
        assert!(profile.split_choice_labels, "general profile expected");
    }

    #[test]
    fn physics_maps_to_math_profile() {
        let cleaning = CleaningConfig::default();
        let profile = cleaning.profile_for("physics");
        assert!(profile.pad_math_operators);
    }

    #[test]
    fn ocr_language_hints() {
        let ocr = OcrConfig::default();
        assert_eq!(ocr.languages_for("arabic"), "ara+eng");
        assert_eq!(ocr.languages_for("physics"), "eng");
    }

    #[test]
    fn rejects_inverted_chunk_bounds() {
        let mut config = Config::minimal();
        config.chunking.min_chars = 800;
        config.chunking.max_chars = 600;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_http_ocr_without_base_url() {
        let mut config = Config::minimal();
        config.ocr.provider = "http".to_string();
        assert!(validate(&config).is_err());
    }
}
