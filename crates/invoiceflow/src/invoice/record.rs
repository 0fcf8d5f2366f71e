use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fields::InvoiceData;
use super::status::InvoiceStatus;
use crate::scheduler::ProcessingOptions;
use crate::validation::ValidationResult;

/// Extraction confidence, overall and per field. All values are in [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub overall: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

/// Details of the last processing failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// One reviewer edit to an extracted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEvent {
    pub format: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// A requested edit: set `field` to the textual `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub value: String,
}

impl FieldChange {
    pub fn new(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Metadata of a freshly stored upload.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub owner_id: String,
    pub original_filename: String,
    pub storage_path: String,
    pub file_size: u64,
    /// Declared content type. Guessed from the file extension when absent.
    pub mime_type: Option<String>,
}

/// An invoice document and everything the pipeline learned about it.
///
/// `status` is only changed by the lifecycle operations in
/// [`super::lifecycle`].
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRecord {
    pub id: String,
    pub owner_id: String,

    pub original_filename: String,
    pub storage_path: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub content_hash: Option<String>,

    pub(crate) status: InvoiceStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
    /// Options of the most recent processing run, reused by manual retries.
    pub processing_options: Option<ProcessingOptions>,

    pub data: InvoiceData,
    pub raw_text: Option<String>,
    pub confidence: Option<Confidence>,
    pub validation: Option<ValidationResult>,

    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub duplicate_reason: Option<String>,

    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    pub corrections: Vec<Correction>,
    pub exports: Vec<ExportEvent>,

    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// Creates a record for an upload. Records always start `pending`.
    pub fn new(upload: NewInvoice, now: DateTime<Utc>) -> Self {
        let mime_type = upload.mime_type.or_else(|| {
            mime_guess::from_path(Path::new(&upload.original_filename))
                .first()
                .map(|m| m.essence_str().to_string())
        });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: upload.owner_id,
            original_filename: upload.original_filename,
            storage_path: upload.storage_path,
            file_size: upload.file_size,
            mime_type,
            content_hash: None,
            status: InvoiceStatus::Pending,
            processing_started_at: None,
            processing_completed_at: None,
            processing_time_ms: None,
            retry_count: 0,
            error_message: None,
            error_details: None,
            processing_options: None,
            data: InvoiceData::default(),
            raw_text: None,
            confidence: None,
            validation: None,
            is_duplicate: false,
            duplicate_of: None,
            duplicate_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            corrections: Vec::new(),
            exports: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.status.progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(filename: &str, mime: Option<&str>) -> NewInvoice {
        NewInvoice {
            owner_id: "owner-1".to_string(),
            original_filename: filename.to_string(),
            storage_path: format!("/store/{}", filename),
            file_size: 1024,
            mime_type: mime.map(String::from),
        }
    }

    #[test]
    fn test_new_record_starts_pending() {
        let record = InvoiceRecord::new(upload("a.pdf", None), Utc::now());
        assert_eq!(record.status(), InvoiceStatus::Pending);
        assert_eq!(record.progress(), 10);
        assert!(!record.id.is_empty());
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_mime_type_guessed_from_extension() {
        let record = InvoiceRecord::new(upload("scan.png", None), Utc::now());
        assert_eq!(record.mime_type.as_deref(), Some("image/png"));

        let declared = InvoiceRecord::new(upload("scan.png", Some("image/webp")), Utc::now());
        assert_eq!(declared.mime_type.as_deref(), Some("image/webp"));

        let unknown = InvoiceRecord::new(upload("scan", None), Utc::now());
        assert_eq!(unknown.mime_type, None);
    }
}
