//! HTTP seam to the external OCR engine.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum length for error bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Could not reach OCR engine: {0}")]
    Connect(String),

    #[error("OCR engine timed out: {0}")]
    Timeout(String),

    #[error("OCR engine returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed OCR engine response: {0}")]
    Malformed(String),
}

impl EngineError {
    /// Connection failures, timeouts and 5xx responses may clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Connect(_) | EngineError::Timeout(_) => true,
            EngineError::Status { code, .. } => *code >= 500,
            EngineError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::Timeout(e.to_string())
        } else if e.is_connect() {
            EngineError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            EngineError::Status {
                code: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            // Anything else fails the same way on the next attempt.
            EngineError::Malformed(e.to_string())
        }
    }
}

/// One image submitted for extraction.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub image: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    pub use_cache: bool,
    pub use_validation: bool,
    pub auto_correct: bool,
    pub language: String,
}

fn default_true() -> bool {
    true
}

/// Engine reply. Only `success` and `invoice_data` are required to be
/// meaningful; everything else is optional metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub invoice_data: Value,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub complete_text: Option<String>,
    #[serde(default, alias = "field_confidence", alias = "confidence")]
    pub confidence_scores: BTreeMap<String, f64>,
    #[serde(default, alias = "engine")]
    pub ocr_engine: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl EngineResponse {
    /// Per-field confidences. Engines that only report them inside the
    /// extraction (`invoice_data.confidence_metrics.field_confidence`) are
    /// read from there when the top-level map is empty.
    pub fn field_confidences(&self) -> BTreeMap<String, f64> {
        if !self.confidence_scores.is_empty() {
            return self.confidence_scores.clone();
        }
        self.invoice_data
            .pointer("/confidence_metrics/field_confidence")
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineHealth {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn process(&self, request: &EngineRequest) -> Result<EngineResponse, EngineError>;

    async fn health(&self) -> Result<EngineHealth, EngineError>;
}

/// Talks to the engine over HTTP: `POST {base}/process`, `GET {base}/health`.
pub struct HttpOcrEngine {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpOcrEngine {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        api_key: Option<SecretString>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Connect(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::Status {
            code: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn process(&self, request: &EngineRequest) -> Result<EngineResponse, EngineError> {
        let part = reqwest::multipart::Part::bytes(request.image.clone())
            .file_name(request.filename.clone())
            .mime_str(&request.mime_type)
            .map_err(|e| EngineError::Malformed(format!("Invalid MIME type: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("use_cache", request.use_cache.to_string())
            .text("use_validation", request.use_validation.to_string())
            .text("auto_correct", request.auto_correct.to_string())
            .text("language", request.language.clone());

        let url = format!("{}/process", self.base_url);
        debug!("POST {} ({} bytes)", url, request.image.len());

        let response = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            EngineError::Malformed(format!("{} in body: {}", e, truncate_body(&body)))
        })
    }

    async fn health(&self) -> Result<EngineHealth, EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| EngineError::Malformed(e.to_string()))
    }
}
