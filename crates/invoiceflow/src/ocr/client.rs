//! Orchestrates one OCR request end to end: input checks, PDF conversion,
//! cache, retrying engine call and enhancement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use super::engine::{EngineError, EngineHealth, EngineRequest, OcrEngine};
use super::enhance::{self, AutoCorrection, DataQuality};
use super::metrics::{OcrMetrics, OcrMetricsSnapshot};
use super::pdf::{self, PageRasterizer, PdftoppmRasterizer, PreparedImage};
use crate::cache::{CacheKey, ContentCache, DEFAULT_TTL};
use crate::error::OcrError;
use crate::invoice::{Confidence, InvoiceData};
use crate::sanitize::redact_path;

/// Exponential backoff for engine calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub language: String,
    pub dpi: u32,
    pub scratch_dir: PathBuf,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: pdf::DEFAULT_DPI,
            scratch_dir: std::env::temp_dir().join("invoiceflow"),
            cache_ttl: DEFAULT_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-request switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOptions {
    pub use_cache: bool,
    pub use_validation: bool,
    pub auto_correct: bool,
    /// Overrides the configured language.
    pub language: Option<String>,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_validation: true,
            auto_correct: false,
            language: None,
        }
    }
}

/// Normalized and enhanced extraction for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub data: InvoiceData,
    pub raw_text: Option<String>,
    pub complete_text: Option<String>,
    pub engine: Option<String>,
    pub metadata: Value,
    pub confidence: Confidence,
    pub quality: DataQuality,
    pub missing_fields: Vec<String>,
    pub corrections: Vec<AutoCorrection>,
    pub cached: bool,
    pub content_hash: String,
    pub converted_from_pdf: bool,
    pub processing_time_ms: u64,
}

pub struct OcrClient {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    cache: ContentCache<ProcessingResult>,
    metrics: OcrMetrics,
    settings: OcrSettings,
}

impl OcrClient {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        cache: ContentCache<ProcessingResult>,
        settings: OcrSettings,
    ) -> Self {
        Self {
            engine,
            rasterizer: Arc::new(PdftoppmRasterizer),
            cache,
            metrics: OcrMetrics::new(),
            settings,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn metrics(&self) -> OcrMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> &ContentCache<ProcessingResult> {
        &self.cache
    }

    pub async fn health(&self) -> Result<EngineHealth, EngineError> {
        self.engine.health().await
    }

    /// Extracts invoice fields from the document at `path`.
    pub async fn process_invoice(
        &self,
        path: &Path,
        options: &OcrOptions,
    ) -> Result<ProcessingResult, OcrError> {
        let span = tracing::info_span!("ocr.process_invoice", file = %redact_path(path));
        self.metrics.record_request();

        let result = self.run(path, options).instrument(span).await;
        if result.is_err() {
            self.metrics.record_failure();
        }
        result
    }

    async fn run(&self, path: &Path, options: &OcrOptions) -> Result<ProcessingResult, OcrError> {
        let started = Instant::now();

        let bytes = read_input(path).await?;
        let prepared = self.prepare(path, bytes).await?;

        let key = CacheKey::for_bytes(&prepared.bytes, options.auto_correct);
        if options.use_cache {
            if let Some(mut hit) = self.cache.get(&key) {
                debug!("Cache hit for {}", &key.content_hash[..12]);
                self.metrics.record_cache_hit();
                hit.cached = true;
                hit.processing_time_ms = elapsed_ms(started);
                return Ok(hit);
            }
        }

        let request = EngineRequest {
            filename: prepared.filename.clone(),
            mime_type: prepared.mime_type.clone(),
            use_cache: options.use_cache,
            use_validation: options.use_validation,
            auto_correct: options.auto_correct,
            language: options
                .language
                .clone()
                .unwrap_or_else(|| self.settings.language.clone()),
            image: prepared.bytes,
        };

        let response = self.call_engine(&request).await?;
        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "engine reported failure without a message".to_string());
            return Err(OcrError::ProcessingFailed(message));
        }

        let mut data = InvoiceData::from_wire(&response.invoice_data);
        let corrections = if options.auto_correct {
            enhance::auto_correct(&mut data)
        } else {
            Vec::new()
        };

        let fields: BTreeMap<String, f64> = enhance::clamp_field_confidences(&response.field_confidences());
        let overall = enhance::overall_confidence(&fields);
        let missing_fields = enhance::missing_required_fields(&data);

        let result = ProcessingResult {
            data,
            raw_text: response.raw_text,
            complete_text: response.complete_text,
            engine: response.ocr_engine,
            metadata: response.metadata,
            confidence: Confidence { overall, fields },
            quality: DataQuality::from_confidence(overall),
            missing_fields,
            corrections,
            cached: false,
            content_hash: key.content_hash.clone(),
            converted_from_pdf: prepared.converted_from_pdf,
            processing_time_ms: elapsed_ms(started),
        };

        if options.use_cache {
            self.cache.put(key, result.clone(), self.settings.cache_ttl);
        }
        self.metrics.record_success(result.processing_time_ms as f64);

        info!(
            "Extracted {} ({:?} quality, {} ms)",
            request.filename, result.quality, result.processing_time_ms
        );
        Ok(result)
    }

    async fn prepare(&self, path: &Path, bytes: Vec<u8>) -> Result<PreparedImage, OcrError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path_buf = path.to_path_buf();
        let scratch = self.settings.scratch_dir.clone();
        let dpi = self.settings.dpi;

        tokio::task::spawn_blocking(move || {
            pdf::prepare_document(&path_buf, bytes, rasterizer.as_ref(), dpi, &scratch)
        })
        .await
        .map_err(|e| OcrError::Conversion(format!("Conversion task failed: {}", e)))?
    }

    async fn call_engine(
        &self,
        request: &EngineRequest,
    ) -> Result<super::engine::EngineResponse, OcrError> {
        let policy = &self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.engine.process(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "OCR attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(OcrError::TransientUpstream {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(OcrError::Upstream(e.to_string())),
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn read_input(path: &Path) -> Result<Vec<u8>, OcrError> {
    let input_error = |reason: String| OcrError::ClientInput {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| input_error(format!("cannot stat file: {}", e)))?;
    if !metadata.is_file() {
        return Err(input_error("not a regular file".to_string()));
    }
    if metadata.len() == 0 {
        return Err(input_error("file is empty".to_string()));
    }

    tokio::fs::read(path)
        .await
        .map_err(|e| input_error(format!("cannot read file: {}", e)))
}
