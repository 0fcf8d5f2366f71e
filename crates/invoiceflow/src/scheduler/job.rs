use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invoice::InvoiceStatus;
use crate::ocr::OcrOptions;

/// Scheduling priority. Lower values are served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

/// Caller-supplied knobs for one processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub use_cache: bool,
    pub use_validation: bool,
    pub auto_correct: bool,
    pub language: Option<String>,
    pub priority: Priority,
    pub webhook_url: Option<String>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_validation: true,
            auto_correct: false,
            language: None,
            priority: Priority::Normal,
            webhook_url: None,
        }
    }
}

impl ProcessingOptions {
    pub fn ocr_options(&self) -> OcrOptions {
        OcrOptions {
            use_cache: self.use_cache,
            use_validation: self.use_validation,
            auto_correct: self.auto_correct,
            language: self.language.clone(),
        }
    }
}

/// Payload of an `invoice-processing` job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInvoice {
    pub invoice_id: String,
    pub file_path: PathBuf,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Completed,
    Failed,
}

/// Payload of a `notifications` job. Serialized as the webhook body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceNotification {
    pub invoice_id: String,
    pub event: NotificationKind,
    pub status: InvoiceStatus,
    #[serde(skip)]
    pub webhook_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct Job<P> {
    pub id: String,
    pub payload: P,
    pub priority: Priority,
    /// Attempts started so far, including the running one.
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl<P> Job<P> {
    pub fn new(id: &str, payload: P, priority: Priority, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            payload,
            priority,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            state: JobState::Waiting,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Whether a failure of the current attempt would be the last one.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Failure of a job handler. `retryable` decides whether the scheduler
/// tries again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent < Priority::High);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::default().value(), 3);
        let p: Priority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(p, Priority::Urgent);
    }

    #[test]
    fn test_options_defaults_from_partial_json() {
        let opts: ProcessingOptions =
            serde_json::from_str(r#"{"auto_correct": true, "priority": "high"}"#).unwrap();
        assert!(opts.use_cache);
        assert!(opts.auto_correct);
        assert_eq!(opts.priority, Priority::High);
        assert!(opts.ocr_options().use_validation);
    }

    #[test]
    fn test_notification_body_hides_url() {
        let n = InvoiceNotification {
            invoice_id: "inv-1".to_string(),
            event: NotificationKind::Failed,
            status: InvoiceStatus::Failed,
            webhook_url: "https://hooks.example.com/x".to_string(),
            error: Some("engine down".to_string()),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["status"], "failed");
        assert!(json.get("webhook_url").is_none());
    }

    #[test]
    fn test_final_attempt() {
        let mut job = Job::new("a", (), Priority::Normal, 3);
        job.attempts = 2;
        assert!(!job.is_final_attempt());
        job.attempts = 3;
        assert!(job.is_final_attempt());
    }
}
