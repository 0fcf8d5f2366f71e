//! Public entry point: creates invoices, queues processing, and applies
//! reviewer decisions.
//!
//! Every mutating operation takes the same per-invoice lock as the
//! processing orchestrator, loads the current record, applies one state
//! machine operation, and persists the result.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::broadcast::{InvoicePhase, InvoiceProgressEvent, ProgressHub};
use crate::cache::ContentCache;
use crate::config::Config;
use crate::db::{ActivityEntry, Database, InvoiceStore, SqliteInvoiceStore};
use crate::error::{ConfigError, InvoiceflowError, Result, SchedulerError, StateError};
use crate::invoice::{FieldChange, InvoiceRecord, InvoiceStatus, NewInvoice};
use crate::notify::{NotificationDispatcher, Notifier, WebhookNotifier};
use crate::ocr::{HttpOcrEngine, OcrClient, OcrMetricsSnapshot};
use crate::pipeline::{InvoiceLocks, ProcessingOrchestrator};
use crate::scheduler::{JobScheduler, ProcessInvoice, ProcessingOptions, SchedulerSettings};
use crate::validation::{RuleCache, ValidationEngine};

/// Snapshot answered by [`InvoiceService::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub invoice_id: String,
    pub status: InvoiceStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
}

impl From<&InvoiceRecord> for StatusReport {
    fn from(record: &InvoiceRecord) -> Self {
        Self {
            invoice_id: record.id.clone(),
            status: record.status(),
            progress: record.progress(),
            error: record.error_message.clone(),
            processing_time_ms: record.processing_time_ms,
        }
    }
}

/// Collaborators the service is assembled from.
pub struct ServiceParts {
    pub store: Arc<dyn InvoiceStore>,
    pub ocr: Arc<OcrClient>,
    pub notifier: Arc<dyn Notifier>,
    pub scheduler: SchedulerSettings,
    pub progress_capacity: usize,
}

pub struct InvoiceService {
    store: Arc<dyn InvoiceStore>,
    ocr: Arc<OcrClient>,
    rules: Arc<RuleCache>,
    validator: Arc<ValidationEngine>,
    scheduler: JobScheduler,
    hub: ProgressHub,
    locks: InvoiceLocks,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl InvoiceService {
    /// Loads validation rules and starts both worker pools. Must be called
    /// from within a tokio runtime.
    pub async fn start(parts: ServiceParts) -> Result<Self> {
        let rules = Arc::new(RuleCache::new());
        rules.init(parts.store.as_ref()).await?;
        let validator = Arc::new(ValidationEngine::new(Arc::clone(&rules)));

        let hub = ProgressHub::new(parts.progress_capacity);
        let locks = InvoiceLocks::new();
        let scheduler = JobScheduler::new(parts.scheduler);

        let orchestrator = ProcessingOrchestrator::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.ocr),
            Arc::clone(&validator),
            hub.clone(),
            locks.clone(),
            Arc::clone(scheduler.notification_queue()),
        );
        scheduler.start(
            Arc::new(orchestrator),
            Arc::new(NotificationDispatcher::new(parts.notifier)),
        );

        log::info!("Invoice service started");

        Ok(Self {
            store: parts.store,
            ocr: parts.ocr,
            rules,
            validator,
            scheduler,
            hub,
            locks,
            sweeper: Mutex::new(None),
        })
    }

    /// Builds the production stack described by `config`: SQLite store,
    /// HTTP OCR engine with a content cache, and webhook delivery.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "No database_path configured and no home directory found".to_string(),
        })?;
        let db = Database::open(&db_path)?;
        let store: Arc<dyn InvoiceStore> = Arc::new(SqliteInvoiceStore::new(db));

        let api_key = config
            .ocr
            .api_key
            .resolve()
            .map_err(ConfigError::from)?;
        let engine = HttpOcrEngine::new(&config.ocr.base_url, config.ocr.timeout(), api_key)
            .map_err(|e| ConfigError::Validation {
                message: format!("Cannot create OCR engine client: {}", e),
            })?;

        let notifier = WebhookNotifier::new(Duration::from_secs(config.webhook.timeout_secs))?;

        let cache = ContentCache::new(config.ocr.cache.max_entries);
        let sweeper = cache.spawn_sweeper(Duration::from_secs(config.ocr.cache.sweep_interval_secs));
        let ocr = Arc::new(OcrClient::new(Arc::new(engine), cache, config.ocr.settings()));

        let started = Self::start(ServiceParts {
            store,
            ocr,
            notifier: Arc::new(notifier),
            scheduler: config.scheduler_settings(),
            progress_capacity: config.progress.channel_capacity,
        })
        .await;
        let service = match started {
            Ok(service) => service,
            Err(e) => {
                sweeper.abort();
                return Err(e);
            }
        };
        *service.sweeper.lock().unwrap_or_else(|p| p.into_inner()) = Some(sweeper);
        Ok(service)
    }

    async fn load(&self, invoice_id: &str) -> Result<InvoiceRecord> {
        self.store
            .load(invoice_id)
            .await?
            .ok_or_else(|| InvoiceflowError::NotFound(invoice_id.to_string()))
    }

    async fn load_live(&self, invoice_id: &str) -> Result<InvoiceRecord> {
        let record = self.load(invoice_id).await?;
        if record.is_deleted {
            return Err(StateError::Deleted.into());
        }
        Ok(record)
    }

    async fn activity(&self, invoice_id: &str, action: &str, actor: Option<&str>, details: serde_json::Value) {
        self.store
            .log_activity(ActivityEntry::new(invoice_id, action, actor, details))
            .await;
    }

    /// Registers an uploaded file. The record starts in `pending`.
    pub async fn create_invoice(&self, upload: NewInvoice) -> Result<InvoiceRecord> {
        let record = InvoiceRecord::new(upload, Utc::now());
        self.store.insert(&record).await?;
        self.activity(
            &record.id,
            "uploaded",
            Some(&record.owner_id),
            json!({ "filename": record.original_filename, "file_size": record.file_size }),
        )
        .await;
        log::info!("Created invoice {}", record.id);
        Ok(record)
    }

    /// Queues a processing run and returns the job id (the invoice id).
    pub async fn enqueue_processing(
        &self,
        invoice_id: &str,
        file_path: &Path,
        options: ProcessingOptions,
    ) -> Result<String> {
        self.load_live(invoice_id).await?;

        let priority = options.priority;
        let job_id = self.scheduler.enqueue_processing(ProcessInvoice {
            invoice_id: invoice_id.to_string(),
            file_path: file_path.to_path_buf(),
            options,
        })?;
        self.activity(invoice_id, "queued", None, json!({ "priority": priority }))
            .await;
        Ok(job_id)
    }

    pub async fn get_status(&self, invoice_id: &str) -> Result<StatusReport> {
        let record = self.load(invoice_id).await?;
        Ok(StatusReport::from(&record))
    }

    /// Progress events for the invoice, ending at the first settled status.
    /// An invoice that is already settled yields one event describing it.
    pub async fn watch(
        &self,
        invoice_id: &str,
    ) -> Result<BoxStream<'static, InvoiceProgressEvent>> {
        // Subscribe before reading the record so that a run finishing in
        // between is not missed.
        let live = self.hub.subscribe(invoice_id);
        let record = self.load(invoice_id).await?;

        let status = record.status();
        if !status.is_settled() {
            return Ok(live);
        }

        let event = match status {
            InvoiceStatus::Failed => InvoiceProgressEvent::failed(
                &record.id,
                record.error_message.as_deref().unwrap_or("processing failed"),
            ),
            _ => InvoiceProgressEvent {
                progress: status.progress(),
                phase: InvoicePhase::Completed,
                message: format!("Invoice is {}", status),
                ..InvoiceProgressEvent::completed(&record.id, status)
            },
        };
        Ok(stream::once(async move { event }).boxed())
    }

    /// Moves a failed invoice back to `pending` and queues it again with the
    /// options of its last run.
    pub async fn retry(&self, invoice_id: &str) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load_live(invoice_id).await?;

        if self.scheduler.is_processing(invoice_id) {
            return Err(SchedulerError::AlreadyActive(invoice_id.to_string()).into());
        }

        let source = PathBuf::from(&record.storage_path);
        let exists = tokio::fs::try_exists(&source).await.unwrap_or(false);
        record.retry(exists, Utc::now())?;
        self.store.save(&record).await?;

        self.scheduler.enqueue_processing(ProcessInvoice {
            invoice_id: record.id.clone(),
            file_path: source,
            options: record.processing_options.clone().unwrap_or_default(),
        })?;
        self.activity(
            invoice_id,
            "retried",
            None,
            json!({ "retry_count": record.retry_count }),
        )
        .await;
        Ok(record)
    }

    /// Applies reviewer edits, then re-validates the corrected data.
    pub async fn apply_corrections(
        &self,
        invoice_id: &str,
        changes: &[FieldChange],
        actor: &str,
        reason: Option<&str>,
    ) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load(invoice_id).await?;

        let changed = record.apply_corrections(changes, actor, reason, Utc::now())?;
        if changed == 0 {
            return Ok(record);
        }

        record.validation = Some(self.validator.validate(&record.data));
        self.store.save(&record).await?;

        let fields: Vec<&str> = record
            .corrections
            .iter()
            .rev()
            .take(changed)
            .map(|c| c.field.as_str())
            .collect();
        self.activity(
            invoice_id,
            "corrected",
            Some(actor),
            json!({ "fields": fields, "reason": reason }),
        )
        .await;
        Ok(record)
    }

    pub async fn approve(&self, invoice_id: &str, actor: &str) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load(invoice_id).await?;
        record.approve(actor, Utc::now())?;
        self.store.save(&record).await?;
        self.activity(invoice_id, "approved", Some(actor), json!({})).await;
        Ok(record)
    }

    pub async fn reject(&self, invoice_id: &str, actor: &str, reason: &str) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load(invoice_id).await?;
        record.reject(actor, reason, Utc::now())?;
        self.store.save(&record).await?;
        self.activity(invoice_id, "rejected", Some(actor), json!({ "reason": reason }))
            .await;
        Ok(record)
    }

    pub async fn record_export(
        &self,
        invoice_id: &str,
        format: &str,
        actor: &str,
    ) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load(invoice_id).await?;
        record.record_export(format, actor, Utc::now())?;
        self.store.save(&record).await?;
        self.activity(invoice_id, "exported", Some(actor), json!({ "format": format }))
            .await;
        Ok(record)
    }

    pub async fn soft_delete(&self, invoice_id: &str, actor: &str) -> Result<InvoiceRecord> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut record = self.load(invoice_id).await?;
        if record.is_deleted {
            return Ok(record);
        }
        record.soft_delete(actor, Utc::now());
        self.store.save(&record).await?;
        self.activity(invoice_id, "deleted", Some(actor), json!({})).await;
        Ok(record)
    }

    /// Re-reads validation rules from the store. On error the previous
    /// rules stay active.
    pub async fn reload_rules(&self) -> Result<usize> {
        self.rules.init(self.store.as_ref()).await
    }

    pub fn ocr_metrics(&self) -> OcrMetricsSnapshot {
        self.ocr.metrics()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Stops accepting jobs, lets running jobs finish, and releases caches.
    pub async fn shutdown(&self) {
        log::info!("Shutting down invoice service...");
        self.scheduler.shutdown().await;
        self.rules.shutdown();
        if let Some(sweeper) = self.sweeper.lock().unwrap_or_else(|p| p.into_inner()).take() {
            sweeper.abort();
        }
        log::info!("Invoice service stopped");
    }
}
