use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OcrSection;

/// Turns a CAPTCHA image into a best-effort text guess. Implementations must
/// never fail: every error path degrades to an empty string, which callers
/// treat as a recognition miss.
#[async_trait]
pub trait CaptchaRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> String;
}

#[derive(Debug, Error)]
enum RecognitionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response carried no parsed text")]
    EmptyResponse,
}

/// Client for the OCR.Space image-parsing endpoint.
pub struct OcrSpaceRecognizer {
    client: Client,
    config: OcrSection,
}

impl OcrSpaceRecognizer {
    pub fn new(config: OcrSection) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    async fn request_text(&self, image: &[u8]) -> Result<String, RecognitionError> {
        let part = Part::bytes(image.to_vec())
            .file_name("captcha.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .part("filename", part)
            .text("apikey", self.config.api_key.clone())
            .text("OCREngine", self.config.engine.clone());

        let response: OcrResponse = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        response
            .parsed_results
            .into_iter()
            .next()
            .map(|result| result.parsed_text)
            .ok_or(RecognitionError::EmptyResponse)
    }
}

#[async_trait]
impl CaptchaRecognizer for OcrSpaceRecognizer {
    async fn recognize(&self, image: &[u8]) -> String {
        match self.request_text(image).await {
            Ok(raw) => {
                let text = scrub_recognized_text(&raw);
                debug!(length = text.len(), "captcha text recognized");
                text
            }
            Err(err) => {
                warn!(error = %err, "captcha recognition failed");
                String::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(rename = "ParsedResults", default)]
    parsed_results: Vec<OcrParsedResult>,
}

#[derive(Debug, Deserialize)]
struct OcrParsedResult {
    #[serde(rename = "ParsedText", default)]
    parsed_text: String,
}

/// Lowercases the raw OCR output and keeps only `[a-z0-9]`. The portal's
/// CAPTCHA alphabet never contains anything else, so punctuation and
/// whitespace in the guess are always OCR noise.
pub fn scrub_recognized_text(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_strips_noise() {
        assert_eq!(scrub_recognized_text(" Ab1 2c!\n"), "ab12c");
        assert_eq!(scrub_recognized_text("A-B C.D"), "abcd");
    }

    #[test]
    fn scrub_of_garbage_is_empty() {
        assert_eq!(scrub_recognized_text("!@# $%"), "");
        assert_eq!(scrub_recognized_text(""), "");
    }

    #[test]
    fn response_parsing_tolerates_missing_fields() {
        let parsed: OcrResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.parsed_results.is_empty());

        let parsed: OcrResponse =
            serde_json::from_str(r#"{"ParsedResults": [{"ParsedText": "aB12"}]}"#).unwrap();
        assert_eq!(parsed.parsed_results[0].parsed_text, "aB12");
    }
}
