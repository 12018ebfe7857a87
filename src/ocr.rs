//! OCR engine abstraction.
//!
//! OCR is an external collaborator: the extractor hands it a PDF page and
//! gets raw text plus optional layout blocks back. The production engine
//! talks to an HTTP sidecar; tests script the trait directly.
//!
//! # Retry Strategy
//!
//! The HTTP engine retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//!
//! The overall call is additionally bounded by the caller's timeout; a
//! timed-out page is marked unextractable, never retried forever.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::config::OcrConfig;

/// One recognized text block with its bounding box in page coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrBlock {
    pub text: String,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// Raw OCR output for a single page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

/// A black-box OCR service callable per page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Recognize one page (1-based) of the given PDF.
    async fn recognize(&self, pdf: &[u8], page_no: usize, languages: &str) -> Result<OcrOutput>;
}

/// No-op engine used when OCR is not configured. Scanned pages will be
/// flagged unextractable.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn recognize(&self, _pdf: &[u8], _page_no: usize, _languages: &str) -> Result<OcrOutput> {
        bail!("OCR engine is disabled")
    }
}

/// OCR over an HTTP sidecar service.
///
/// Contract: `POST {base_url}/ocr` with a JSON body carrying the base64
/// document, 1-based page number, and a Tesseract-style language string;
/// the response is an [`OcrOutput`] JSON object.
pub struct HttpOcrEngine {
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpOcrEngine {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ocr.base_url required for HTTP OCR engine"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn recognize(&self, pdf: &[u8], page_no: usize, languages: &str) -> Result<OcrOutput> {
        let body = serde_json::json!({
            "document": base64::engine::general_purpose::STANDARD.encode(pdf),
            "page": page_no,
            "languages": languages,
        });

        let url = format!("{}/ocr", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let output: OcrOutput = response.json().await?;
                        return Ok(output);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OCR service error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OCR service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OCR failed after retries")))
    }
}

/// Create the appropriate [`OcrEngine`] based on configuration.
pub fn create_engine(config: &OcrConfig) -> Result<Box<dyn OcrEngine>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledOcr)),
        "http" => Ok(Box::new(HttpOcrEngine::new(config)?)),
        other => bail!("Unknown OCR provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_engine_errors() {
        let engine = DisabledOcr;
        assert!(!engine.is_enabled());
        assert!(engine.recognize(b"pdf", 1, "eng").await.is_err());
    }

    #[test]
    fn http_engine_requires_base_url() {
        let config = OcrConfig {
            provider: "http".to_string(),
            ..OcrConfig::default()
        };
        assert!(HttpOcrEngine::new(&config).is_err());
    }
}
