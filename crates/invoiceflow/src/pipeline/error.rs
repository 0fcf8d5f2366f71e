use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{OcrError, StateError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invoice {0} not found")]
    NotFound(String),

    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),

    #[error("Illegal state change: {0}")]
    State(#[from] StateError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Transient upstream failures and persistence errors get another
    /// scheduler attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Ocr(e) => e.is_retryable(),
            PipelineError::Database(_) => true,
            PipelineError::NotFound(_) | PipelineError::State(_) => false,
        }
    }
}
