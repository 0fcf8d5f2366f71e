//! Test harness for isolated service runs.
//!
//! The `TestHarness` wires a real `InvoiceService` to:
//! - an in-memory SQLite database
//! - a scripted OCR engine standing in for the HTTP engine
//! - a notifier that records webhook deliveries instead of sending them
//! - a store wrapper that can fail selected saves

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::TempDir;

use invoiceflow::broadcast::InvoiceProgressEvent;
use invoiceflow::cache::ContentCache;
use invoiceflow::db::{
    activity_repo, ActivityEntry, Database, DatabaseError, DuplicateQuery, InvoiceStore,
    SqliteInvoiceStore,
};
use invoiceflow::error::NotifyError;
use invoiceflow::invoice::{InvoiceRecord, InvoiceStatus};
use invoiceflow::notify::Notifier;
use invoiceflow::ocr::{
    EngineError, EngineHealth, EngineRequest, EngineResponse, OcrClient, OcrEngine, OcrSettings,
    RetryPolicy,
};
use invoiceflow::scheduler::{InvoiceNotification, ProcessingOptions, SchedulerSettings};
use invoiceflow::validation::ValidationRule;
use invoiceflow::service::{InvoiceService, ServiceParts};

use super::builders::{upload, ExtractionBuilder};

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// How long a test waits for background work before giving up.
pub const WAIT: Duration = Duration::from_secs(10);

/// OCR engine answering from a script, then from a fallback reply.
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<EngineResponse, EngineError>>>,
    fallback: Mutex<EngineResponse>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ExtractionBuilder::new().build()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues one reply ahead of the fallback.
    pub fn push(&self, reply: Result<EngineResponse, EngineError>) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn set_fallback(&self, reply: EngineResponse) {
        *self.fallback.lock().unwrap() = reply;
    }

    /// Filenames of every request received.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    async fn process(&self, request: &EngineRequest) -> Result<EngineResponse, EngineError> {
        self.calls.lock().unwrap().push(request.filename.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }

    async fn health(&self) -> Result<EngineHealth, EngineError> {
        Ok(EngineHealth {
            status: "ok".to_string(),
            details: Default::default(),
        })
    }
}

/// Records notifications instead of posting them.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<InvoiceNotification>>,
}

impl RecordingNotifier {
    pub fn delivered(&self) -> Vec<InvoiceNotification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: &InvoiceNotification) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// SQLite store whose `save` can be made to fail for chosen statuses.
pub struct FaultyStore {
    inner: SqliteInvoiceStore,
    failing: Mutex<Vec<InvoiceStatus>>,
}

impl FaultyStore {
    fn new(inner: SqliteInvoiceStore) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    /// The next save of a record in `status` fails. Repeat to fail more.
    pub fn fail_next_save(&self, status: InvoiceStatus) {
        self.failing.lock().unwrap().push(status);
    }

    fn take_fault(&self, status: InvoiceStatus) -> bool {
        let mut failing = self.failing.lock().unwrap();
        match failing.iter().position(|s| *s == status) {
            Some(idx) => {
                failing.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl InvoiceStore for FaultyStore {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), DatabaseError> {
        self.inner.insert(record).await
    }

    async fn load(&self, id: &str) -> Result<Option<InvoiceRecord>, DatabaseError> {
        self.inner.load(id).await
    }

    async fn save(&self, record: &InvoiceRecord) -> Result<(), DatabaseError> {
        if self.take_fault(record.status()) {
            return Err(DatabaseError::Task(format!(
                "save of {} record rejected",
                record.status()
            )));
        }
        self.inner.save(record).await
    }

    async fn find_duplicate(
        &self,
        query: &DuplicateQuery,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        self.inner.find_duplicate(query).await
    }

    async fn log_activity(&self, entry: ActivityEntry) {
        self.inner.log_activity(entry).await
    }

    async fn load_rules(&self) -> Result<Vec<ValidationRule>, DatabaseError> {
        self.inner.load_rules().await
    }
}

/// Test harness providing an isolated service per test.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Where uploaded files are written.
    pub upload_dir: PathBuf,
    pub db: Database,
    pub store: Arc<dyn InvoiceStore>,
    pub faults: Arc<FaultyStore>,
    pub engine: Arc<ScriptedEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: InvoiceService,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let faults = Arc::new(FaultyStore::new(SqliteInvoiceStore::new(db.clone())));
        let store: Arc<dyn InvoiceStore> = Arc::clone(&faults) as Arc<dyn InvoiceStore>;

        let engine = Arc::new(ScriptedEngine::new());
        let settings = OcrSettings {
            scratch_dir: temp_dir.path().join("scratch"),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
            ..Default::default()
        };
        let ocr = Arc::new(OcrClient::new(
            Arc::clone(&engine) as Arc<dyn OcrEngine>,
            ContentCache::new(100),
            settings,
        ));

        let notifier = Arc::new(RecordingNotifier::default());
        let service = InvoiceService::start(ServiceParts {
            store: Arc::clone(&store),
            ocr,
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            scheduler: SchedulerSettings {
                processing_concurrency: 2,
                processing_attempts: 2,
                processing_backoff: Duration::from_millis(20),
                notification_concurrency: 1,
                notification_attempts: 3,
                notification_backoff: Duration::from_millis(10),
            },
            progress_capacity: 32,
        })
        .await
        .expect("Failed to start service");

        Self {
            temp_dir,
            upload_dir,
            db,
            store,
            faults,
            engine,
            notifier,
            service,
        }
    }

    /// Writes a distinct PNG so every upload gets its own content hash.
    pub fn write_upload(&self, name: &str) -> PathBuf {
        let path = self.upload_dir.join(name);
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(name.as_bytes());
        std::fs::write(&path, bytes).expect("Failed to write upload");
        path
    }

    /// Stores a file and registers it with the service.
    pub async fn upload(&self, name: &str) -> (InvoiceRecord, PathBuf) {
        let path = self.write_upload(name);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let record = self
            .service
            .create_invoice(upload("user-1", name, &path.to_string_lossy(), size))
            .await
            .expect("Failed to create invoice");
        (record, path)
    }

    /// Uploads, queues and waits for the first settled event.
    pub async fn process(
        &self,
        name: &str,
        options: ProcessingOptions,
    ) -> (InvoiceRecord, Vec<InvoiceProgressEvent>) {
        let (record, path) = self.upload(name).await;
        let events = self.process_existing(&record.id, &path, options).await;
        let record = self.load(&record.id).await;
        (record, events)
    }

    pub async fn process_existing(
        &self,
        invoice_id: &str,
        path: &Path,
        options: ProcessingOptions,
    ) -> Vec<InvoiceProgressEvent> {
        let stream = self
            .service
            .watch(invoice_id)
            .await
            .expect("Failed to watch invoice");
        self.service
            .enqueue_processing(invoice_id, path, options)
            .await
            .expect("Failed to enqueue");
        tokio::time::timeout(WAIT, stream.collect::<Vec<_>>())
            .await
            .expect("Timed out waiting for progress events")
    }

    pub async fn load(&self, invoice_id: &str) -> InvoiceRecord {
        self.store
            .load(invoice_id)
            .await
            .expect("Failed to load invoice")
            .expect("Invoice should exist")
    }

    /// Polls until the invoice reaches `status`.
    pub async fn wait_for_status(&self, invoice_id: &str, status: InvoiceStatus) -> InvoiceRecord {
        let poll = async {
            loop {
                let record = self.load(invoice_id).await;
                if record.status() == status {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .unwrap_or_else(|_| panic!("Invoice {} never reached {}", invoice_id, status))
    }

    /// Polls until `count` notifications have been delivered.
    pub async fn wait_for_notifications(&self, count: usize) -> Vec<InvoiceNotification> {
        let poll = async {
            loop {
                let delivered = self.notifier.delivered();
                if delivered.len() >= count {
                    return delivered;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .expect("Timed out waiting for notifications")
    }

    /// Activity actions logged for the invoice, oldest first.
    pub fn actions(&self, invoice_id: &str) -> Vec<String> {
        activity_repo::list_for_invoice(&self.db, invoice_id)
            .expect("Failed to list activity")
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}
