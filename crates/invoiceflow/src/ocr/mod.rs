//! Client for the external OCR engine.

pub mod client;
pub mod engine;
pub mod enhance;
pub mod metrics;
pub mod pdf;

pub use client::{OcrClient, OcrOptions, OcrSettings, ProcessingResult, RetryPolicy};
pub use engine::{EngineError, EngineHealth, EngineRequest, EngineResponse, HttpOcrEngine, OcrEngine};
pub use enhance::{AutoCorrection, DataQuality};
pub use metrics::OcrMetricsSnapshot;
pub use pdf::{PageRasterizer, PdftoppmRasterizer};
