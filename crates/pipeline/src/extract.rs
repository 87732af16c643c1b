//! OCR adapter: sends a cropped region image to a cloud text-extraction
//! endpoint and returns the recognized text.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use docuflow_core::{OcrConfig, OcrText, StageError, TextBlock};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Abstraction over a cloud text-extraction service. The call crosses a
/// network boundary; implementations classify failures so the orchestrator
/// can tell retriable from non-retriable outcomes.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image_png: &[u8]) -> Result<OcrText, StageError>;
}

#[async_trait]
impl<T: TextExtractor + ?Sized> TextExtractor for Box<T> {
    async fn extract_text(&self, image_png: &[u8]) -> Result<OcrText, StageError> {
        (**self).extract_text(image_png).await
    }
}

// ── Mock backend ─────────────────────────────────────────────────────────────

/// Returns a pre-set string — lets the rest of the pipeline be exercised
/// without network access or credentials.
pub struct MockTextExtractor {
    pub text: String,
}

impl MockTextExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextExtractor for MockTextExtractor {
    async fn extract_text(&self, _image_png: &[u8]) -> Result<OcrText, StageError> {
        Ok(OcrText::plain(self.text.clone()))
    }
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    image: String,
    mime_type: &'static str,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    blocks: Vec<OcrResponseBlock>,
}

#[derive(Deserialize)]
struct OcrResponseBlock {
    text: String,
    #[serde(default)]
    confidence: f32,
}

/// Client for a document-OCR HTTP endpoint taking a base64 PNG and returning
/// `{ "text": ..., "blocks": [...] }`.
pub struct HttpOcrClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, StageError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| StageError::ModelUnavailable("no OCR endpoint configured".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::ModelUnavailable(format!("http client: {e}")))?;
        Ok(Self { http, endpoint, api_key: config.api_key.clone() })
    }
}

#[async_trait]
impl TextExtractor for HttpOcrClient {
    async fn extract_text(&self, image_png: &[u8]) -> Result<OcrText, StageError> {
        let payload = OcrRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image_png),
            mime_type: "image/png",
        };
        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| StageError::InvalidInput(format!("malformed OCR response: {e}")))?;

        Ok(OcrText {
            text: body.text,
            blocks: body
                .blocks
                .into_iter()
                .map(|b| TextBlock {
                    text: b.text,
                    confidence: b.confidence.clamp(0.0, 1.0),
                    bounds: None,
                })
                .collect(),
        })
    }
}

// ── Error mapping (shared with the structuring client) ───────────────────────

/// Transport-level failures (connect, timeout, TLS) may succeed on retry.
pub(crate) fn transport_error(e: reqwest::Error) -> StageError {
    StageError::TransientNetwork(e.to_string())
}

pub(crate) fn status_to_error(status: StatusCode, body: &str) -> StageError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status == StatusCode::TOO_MANY_REQUESTS {
        StageError::QuotaExceeded(detail)
    } else if status.is_server_error() {
        StageError::TransientNetwork(detail)
    } else {
        StageError::InvalidInput(detail)
    }
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let truncated: String = body.chars().take(200).collect();
    Err(status_to_error(status, &truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_preset_text() {
        let extractor = MockTextExtractor::new("PASSPORT\nZ5547821");
        let result = extractor.extract_text(b"fake png").await.unwrap();
        assert_eq!(result.text, "PASSPORT\nZ5547821");
        assert!(result.blocks.is_empty());
    }

    #[test]
    fn quota_status_maps_to_quota_exceeded() {
        let err = status_to_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, StageError::QuotaExceeded(_)));
        assert!(err.is_retriable());
    }

    #[test]
    fn server_errors_map_to_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let err = status_to_error(status, "");
            assert!(matches!(err, StageError::TransientNetwork(_)), "{status}");
        }
    }

    #[test]
    fn client_errors_map_to_invalid_input() {
        let err = status_to_error(StatusCode::BAD_REQUEST, "image too small");
        assert!(matches!(err, StageError::InvalidInput(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn client_requires_endpoint() {
        let config = OcrConfig::default();
        assert!(matches!(
            HttpOcrClient::new(&config),
            Err(StageError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn ocr_response_parses_without_blocks() {
        let body: OcrResponse = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(body.text, "hello");
        assert!(body.blocks.is_empty());
    }
}
