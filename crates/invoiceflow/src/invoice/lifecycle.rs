//! Status transitions for an [`InvoiceRecord`].
//!
//! Every status change goes through `transition`, which consults the table in
//! [`InvoiceStatus::successors`]. Operations either apply completely or leave
//! the record untouched.

use chrono::{DateTime, Utc};

use super::fields::InvoiceData;
use super::record::{Confidence, Correction, ErrorDetails, ExportEvent, FieldChange, InvoiceRecord};
use super::status::InvoiceStatus;
use crate::error::StateError;
use crate::validation::ValidationResult;

/// A previously accepted invoice that the current one appears to repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub invoice_id: String,
    pub reason: String,
}

/// Everything one successful processing pass produced.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub data: InvoiceData,
    pub raw_text: Option<String>,
    pub confidence: Confidence,
    /// `None` when validation was not requested.
    pub validation: Option<ValidationResult>,
    pub duplicate: Option<DuplicateMatch>,
}

impl InvoiceRecord {
    fn transition(&mut self, to: InvoiceStatus, now: DateTime<Utc>) -> Result<(), StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        log::debug!("Invoice {}: {} -> {}", self.id, self.status, to);
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_transition(&self, to: InvoiceStatus) -> Result<(), StateError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(StateError::IllegalTransition {
                from: self.status,
                to,
            })
        }
    }

    fn stamp_completion(&mut self, now: DateTime<Utc>) {
        self.processing_completed_at = Some(now);
        if self.processing_time_ms.is_none() {
            if let Some(started) = self.processing_started_at {
                self.processing_time_ms = Some((now - started).num_milliseconds().max(0));
            }
        }
    }

    /// pending -> processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(InvoiceStatus::Processing, now)?;
        self.processing_started_at = Some(now);
        self.processing_completed_at = None;
        self.processing_time_ms = None;
        Ok(())
    }

    /// processing -> processed, or requires_review when the extraction is
    /// invalid or repeats an accepted invoice.
    pub fn complete_processing(
        &mut self,
        outcome: ProcessingOutcome,
        now: DateTime<Utc>,
    ) -> Result<InvoiceStatus, StateError> {
        let valid = outcome.validation.as_ref().map_or(true, |v| v.is_valid);
        let duplicate = outcome
            .duplicate
            .filter(|d| d.invoice_id != self.id);
        let target = if valid && duplicate.is_none() {
            InvoiceStatus::Processed
        } else {
            InvoiceStatus::RequiresReview
        };

        self.transition(target, now)?;
        self.data = outcome.data;
        self.raw_text = outcome.raw_text;
        self.confidence = Some(outcome.confidence);
        self.validation = outcome.validation;
        self.is_duplicate = duplicate.is_some();
        self.duplicate_reason = duplicate.as_ref().map(|d| d.reason.clone());
        self.duplicate_of = duplicate.map(|d| d.invoice_id);
        self.error_message = None;
        self.error_details = None;
        self.stamp_completion(now);
        Ok(target)
    }

    /// processing -> failed.
    pub fn fail(&mut self, message: &str, attempt: u32, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(InvoiceStatus::Failed, now)?;
        self.error_message = Some(message.to_string());
        self.error_details = Some(ErrorDetails {
            message: message.to_string(),
            attempt,
            timestamp: now,
        });
        self.stamp_completion(now);
        Ok(())
    }

    /// Applies reviewer edits and moves the invoice to `validated`.
    ///
    /// Returns the number of fields that actually changed. When nothing
    /// changed the record is left as it was.
    pub fn apply_corrections(
        &mut self,
        changes: &[FieldChange],
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StateError> {
        if self.is_deleted {
            return Err(StateError::Deleted);
        }
        if !self.status.is_editable() {
            return Err(StateError::NotEditable(self.status));
        }
        self.ensure_transition(InvoiceStatus::Validated)?;

        // Work on a copy so a bad change leaves the record untouched.
        let mut data = self.data.clone();
        let mut applied = Vec::new();
        for change in changes {
            let current = data.field_text(&change.field);
            if current.as_deref() == Some(change.value.as_str()) {
                continue;
            }
            let old_value = data.set_field(&change.field, &change.value)?;
            if data.field_text(&change.field) == old_value {
                continue;
            }
            applied.push(Correction {
                field: change.field.clone(),
                old_value,
                new_value: change.value.clone(),
                actor: actor.to_string(),
                timestamp: now,
                reason: reason.map(String::from),
            });
        }

        if applied.is_empty() {
            return Ok(0);
        }

        self.transition(InvoiceStatus::Validated, now)?;
        self.data = data;
        let count = applied.len();
        self.corrections.extend(applied);
        Ok(count)
    }

    /// processed | validated -> approved.
    pub fn approve(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.is_deleted {
            return Err(StateError::Deleted);
        }
        self.transition(InvoiceStatus::Approved, now)?;
        self.reviewed_by = Some(actor.to_string());
        self.reviewed_at = Some(now);
        Ok(())
    }

    /// processed | validated -> rejected. A non-blank reason is required.
    pub fn reject(&mut self, actor: &str, reason: &str, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.is_deleted {
            return Err(StateError::Deleted);
        }
        if reason.trim().is_empty() {
            return Err(StateError::MissingReason);
        }
        self.transition(InvoiceStatus::Rejected, now)?;
        self.reviewed_by = Some(actor.to_string());
        self.reviewed_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    /// failed -> pending, clearing the previous failure. Used by the
    /// scheduler's own retries, which do not count as caller retries.
    pub fn requeue(&mut self, source_exists: bool, now: DateTime<Utc>) -> Result<(), StateError> {
        self.ensure_transition(InvoiceStatus::Pending)?;
        if !source_exists {
            return Err(StateError::SourceMissing(self.storage_path.clone()));
        }
        self.transition(InvoiceStatus::Pending, now)?;
        self.error_message = None;
        self.error_details = None;
        self.processing_started_at = None;
        self.processing_completed_at = None;
        self.processing_time_ms = None;
        Ok(())
    }

    /// Caller-initiated failed -> pending. Increments `retry_count`.
    pub fn retry(&mut self, source_exists: bool, now: DateTime<Utc>) -> Result<(), StateError> {
        self.requeue(source_exists, now)?;
        self.retry_count += 1;
        Ok(())
    }

    /// Restarts a run that was interrupted after `start_processing` was
    /// persisted but before its outcome was. The status stays `processing`.
    pub fn resume_processing(&mut self, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.status != InvoiceStatus::Processing {
            return Err(StateError::IllegalTransition {
                from: self.status,
                to: InvoiceStatus::Processing,
            });
        }
        self.updated_at = now;
        self.processing_started_at = Some(now);
        self.processing_completed_at = None;
        self.processing_time_ms = None;
        Ok(())
    }

    pub fn record_export(&mut self, format: &str, actor: &str, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.is_deleted {
            return Err(StateError::Deleted);
        }
        if !self.status.is_exportable() {
            return Err(StateError::NotExportable(self.status));
        }
        self.exports.push(ExportEvent {
            format: format.to_string(),
            actor: actor.to_string(),
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Marks the record deleted. Allowed in every status; repeated calls keep
    /// the first deletion stamp.
    pub fn soft_delete(&mut self, actor: &str, now: DateTime<Utc>) {
        if self.is_deleted {
            return;
        }
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.deleted_by = Some(actor.to_string());
        self.updated_at = now;
    }
}
