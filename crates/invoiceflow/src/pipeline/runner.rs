use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info_span, Instrument};

use crate::broadcast::{InvoicePhase, ProgressHub};
use crate::cache::content_hash;
use crate::db::{ActivityEntry, InvoiceStore};
use crate::duplicate::DuplicateDetector;
use crate::invoice::{InvoiceRecord, InvoiceStatus, ProcessingOutcome};
use crate::ocr::OcrClient;
use crate::sanitize::redact_path;
use crate::scheduler::{
    enqueue_notification, InvoiceNotification, Job, JobError, JobHandler, JobQueue,
    NotificationKind, ProcessInvoice,
};
use crate::validation::ValidationEngine;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::locks::InvoiceLocks;
use super::progress::{BroadcastProgress, ProgressEvent, ProgressReporter};

/// Runs one processing attempt per scheduler job: OCR, validation,
/// duplicate check, then the state transition. It is the only component
/// that moves an invoice out of `pending` or `processing`.
pub struct ProcessingOrchestrator {
    store: Arc<dyn InvoiceStore>,
    ocr: Arc<OcrClient>,
    validator: Arc<ValidationEngine>,
    duplicates: DuplicateDetector,
    hub: ProgressHub,
    locks: InvoiceLocks,
    notifications: Arc<JobQueue<InvoiceNotification>>,
}

impl ProcessingOrchestrator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        ocr: Arc<OcrClient>,
        validator: Arc<ValidationEngine>,
        hub: ProgressHub,
        locks: InvoiceLocks,
        notifications: Arc<JobQueue<InvoiceNotification>>,
    ) -> Self {
        Self {
            duplicates: DuplicateDetector::new(Arc::clone(&store)),
            store,
            ocr,
            validator,
            hub,
            locks,
            notifications,
        }
    }

    /// Processes the invoice named by `job` and returns the status it ended in.
    pub async fn run(&self, job: &Job<ProcessInvoice>) -> Result<InvoiceStatus, JobError> {
        let payload = &job.payload;
        let span = info_span!("pipeline",
            invoice_id = %payload.invoice_id,
            filename = %redact_path(&payload.file_path),
            attempt = job.attempts,
        );
        self.run_locked(job).instrument(span).await
    }

    async fn run_locked(&self, job: &Job<ProcessInvoice>) -> Result<InvoiceStatus, JobError> {
        let invoice_id = job.payload.invoice_id.as_str();
        let _guard = self.locks.lock(invoice_id).await;
        let progress = BroadcastProgress::new(&self.hub, invoice_id);

        let record = match self.begin(job).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Invoice {} cannot be processed: {}", invoice_id, e);
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                return Err(JobError {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        };

        progress.report(ProgressEvent::phase(
            InvoicePhase::Preparing,
            10,
            "Processing started",
        ));

        let mut ctx = PipelineContext::new(job, record.clone());
        match self.execute(&mut ctx, &progress).await {
            Ok(status) => {
                self.after_success(&ctx, status).await;
                progress.report(ProgressEvent::Completed { status });
                Ok(status)
            }
            Err(e) => Err(self.after_failure(job, record, e, &progress).await),
        }
    }

    /// Loads the record and moves it to `processing`. Nothing is persisted
    /// when this fails.
    async fn begin(&self, job: &Job<ProcessInvoice>) -> Result<InvoiceRecord, PipelineError> {
        let payload = &job.payload;
        let mut record = self
            .store
            .load(&payload.invoice_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(payload.invoice_id.clone()))?;

        if record.is_deleted {
            return Err(crate::error::StateError::Deleted.into());
        }

        let now = Utc::now();
        match record.status() {
            InvoiceStatus::Failed => {
                let exists = tokio::fs::try_exists(&payload.file_path)
                    .await
                    .unwrap_or(false);
                record.requeue(exists, now)?;
                record.start_processing(now)?;
            }
            // The job holds the invoice lock and the scheduler runs one job
            // per invoice, so a stored `processing` status is a leftover of
            // an attempt whose outcome was never saved.
            InvoiceStatus::Processing => {
                log::warn!("Invoice {} was left in processing, resuming", record.id);
                record.resume_processing(now)?;
            }
            _ => record.start_processing(now)?,
        }
        record.processing_options = Some(payload.options.clone());
        if record.content_hash.is_none() {
            // An unreadable file is left to the OCR step to report.
            if let Ok(bytes) = tokio::fs::read(&payload.file_path).await {
                record.content_hash = Some(content_hash(&bytes));
            }
        }

        self.store.save(&record).await?;
        Ok(record)
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext<'_>,
        progress: &dyn ProgressReporter,
    ) -> Result<InvoiceStatus, PipelineError> {
        let job = ctx.job;
        let options = &job.payload.options;

        // Step 1: OCR
        progress.report(ProgressEvent::phase(InvoicePhase::Ocr, 30, "Running OCR..."));
        let extraction = self
            .ocr
            .process_invoice(&job.payload.file_path, &options.ocr_options())
            .await?;
        progress.report(ProgressEvent::phase(
            InvoicePhase::Ocr,
            60,
            "Extraction finished",
        ));

        // Step 2: Validate
        if options.use_validation {
            let _step = info_span!("validate").entered();
            progress.report(ProgressEvent::phase(
                InvoicePhase::Validating,
                75,
                "Validating extracted fields...",
            ));
            ctx.validation = Some(self.validator.validate(&extraction.data));
        }

        // Step 3: Duplicate check
        progress.report(ProgressEvent::phase(
            InvoicePhase::DuplicateCheck,
            85,
            "Checking for duplicates...",
        ));
        let invoice_id = ctx.invoice_id().to_string();
        ctx.duplicate = self
            .duplicates
            .check(&extraction.data, Some(&invoice_id))
            .await?;

        // Step 4: Commit
        let outcome = ProcessingOutcome {
            data: extraction.data.clone(),
            raw_text: extraction.raw_text.clone().or(extraction.complete_text.clone()),
            confidence: extraction.confidence.clone(),
            validation: ctx.validation.clone(),
            duplicate: ctx.duplicate.clone(),
        };
        ctx.extraction = Some(extraction);

        let status = ctx.record.complete_processing(outcome, Utc::now())?;
        progress.report(ProgressEvent::phase(InvoicePhase::Saving, 95, "Saving results..."));
        self.store.save(&ctx.record).await?;

        log::info!(
            "Invoice {} processed: {} (score {:?}, duplicate: {})",
            invoice_id,
            status,
            ctx.validation.as_ref().map(|v| v.score),
            ctx.record.is_duplicate
        );
        Ok(status)
    }

    async fn after_success(&self, ctx: &PipelineContext<'_>, status: InvoiceStatus) {
        let record = &ctx.record;
        self.store
            .log_activity(ActivityEntry::new(
                &record.id,
                "processed",
                None,
                json!({
                    "status": status,
                    "attempt": ctx.job.attempts,
                    "score": ctx.validation.as_ref().map(|v| v.score),
                    "duplicate_of": record.duplicate_of,
                    "cached": ctx.extraction.as_ref().map(|e| e.cached),
                    "processing_time_ms": record.processing_time_ms,
                }),
            ))
            .await;

        if let Some(url) = ctx.webhook_url() {
            self.notify(&record.id, NotificationKind::Completed, status, url, None);
        }
    }

    /// Records the failure and converts it into the scheduler's verdict.
    async fn after_failure(
        &self,
        job: &Job<ProcessInvoice>,
        mut record: InvoiceRecord,
        error: PipelineError,
        progress: &dyn ProgressReporter,
    ) -> JobError {
        let message = error.to_string();
        log::error!(
            "Invoice {} failed on attempt {}/{}: {}",
            record.id,
            job.attempts,
            job.max_attempts,
            message
        );

        // A failure that could not be stored leaves the record in
        // `processing`; another attempt resumes it.
        let persisted = match record.fail(&message, job.attempts, Utc::now()) {
            Ok(()) => match self.store.save(&record).await {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to persist failure of invoice {}: {}", record.id, e);
                    false
                }
            },
            Err(e) => {
                log::error!("Invoice {} could not be marked failed: {}", record.id, e);
                true
            }
        };
        let retryable = error.is_retryable() || !persisted;

        self.store
            .log_activity(ActivityEntry::new(
                &record.id,
                "processing_failed",
                None,
                json!({
                    "error": message,
                    "attempt": job.attempts,
                    "retryable": retryable,
                }),
            ))
            .await;

        progress.report(ProgressEvent::Failed {
            error: message.clone(),
        });

        // Only the last word on a job is reported to the caller.
        let will_retry = retryable && !job.is_final_attempt();
        if !will_retry {
            if let Some(url) = job.payload.options.webhook_url.as_deref() {
                self.notify(
                    &record.id,
                    NotificationKind::Failed,
                    InvoiceStatus::Failed,
                    url,
                    Some(message.clone()),
                );
            }
        }

        JobError { message, retryable }
    }

    fn notify(
        &self,
        invoice_id: &str,
        event: NotificationKind,
        status: InvoiceStatus,
        webhook_url: &str,
        error: Option<String>,
    ) {
        let notification = InvoiceNotification {
            invoice_id: invoice_id.to_string(),
            event,
            status,
            webhook_url: webhook_url.to_string(),
            error,
            timestamp: Utc::now(),
        };
        if let Err(e) = enqueue_notification(&self.notifications, notification) {
            log::warn!("Could not queue notification for invoice {}: {}", invoice_id, e);
        }
    }
}

#[async_trait]
impl JobHandler<ProcessInvoice> for ProcessingOrchestrator {
    async fn handle(&self, job: &Job<ProcessInvoice>) -> Result<(), JobError> {
        self.run(job).await.map(|_| ())
    }
}
