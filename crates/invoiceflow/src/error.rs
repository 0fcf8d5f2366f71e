use std::path::PathBuf;
use thiserror::Error;

use crate::invoice::InvoiceStatus;

#[derive(Error, Debug)]
pub enum InvoiceflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Validation rule error: {0}")]
    Rule(#[from] crate::validation::RuleError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Invoice not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to resolve OCR API key: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

/// Errors surfaced by the OCR client.
///
/// `ClientInput`, `UnsupportedFormat`, `Conversion`, `Upstream` and
/// `ProcessingFailed` are permanent; only `TransientUpstream` is worth
/// re-running later.
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Invalid input file '{path}': {reason}")]
    ClientInput { path: PathBuf, reason: String },

    #[error("Unsupported document format for '{path}'")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to convert PDF page to image: {0}")]
    Conversion(String),

    #[error("OCR engine unavailable after {attempts} attempts: {message}")]
    TransientUpstream { attempts: u32, message: String },

    #[error("OCR engine rejected the request: {0}")]
    Upstream(String),

    #[error("OCR processing failed: {0}")]
    ProcessingFailed(String),
}

impl OcrError {
    /// Whether running the same request again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::TransientUpstream { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Invoice in status {0} does not accept corrections")]
    NotEditable(InvoiceStatus),

    #[error("Invoice in status {0} cannot be exported")]
    NotExportable(InvoiceStatus),

    #[error("Rejecting an invoice requires a reason")]
    MissingReason,

    #[error("Source file no longer exists: {0}")]
    SourceMissing(String),

    #[error("Unknown invoice field '{0}'")]
    UnknownField(String),

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invoice has been deleted")]
    Deleted,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Queue '{0}' is shut down")]
    QueueClosed(String),

    #[error("A processing job for invoice {0} is already active")]
    AlreadyActive(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid webhook URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Webhook delivery failed: {0}")]
    Transport(String),

    #[error("Webhook endpoint answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl NotifyError {
    /// Transport failures, throttling and 5xx answers are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::InvalidUrl { .. } => false,
            NotifyError::Transport(_) => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, InvoiceflowError>;
