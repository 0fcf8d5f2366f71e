//! Job queues and worker pools.
//!
//! Two queues run side by side: `invoice-processing` feeds the processing
//! orchestrator and `notifications` feeds webhook delivery. Each has its own
//! attempt budget, backoff base, and worker count.

pub mod job;
pub mod pool;
pub mod queue;

use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use job::{
    InvoiceNotification, Job, JobError, JobState, NotificationKind, Priority, ProcessInvoice,
    ProcessingOptions,
};
pub use pool::{JobHandler, WorkerPool};
pub use queue::{JobQueue, QueueCounts};

use crate::error::SchedulerError;

pub const PROCESSING_QUEUE: &str = "invoice-processing";
pub const NOTIFICATION_QUEUE: &str = "notifications";

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub processing_concurrency: usize,
    pub processing_attempts: u32,
    pub processing_backoff: Duration,
    pub notification_concurrency: usize,
    pub notification_attempts: u32,
    pub notification_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            processing_concurrency: num_cpus::get().clamp(1, 4),
            processing_attempts: 3,
            processing_backoff: Duration::from_secs(5),
            notification_concurrency: 2,
            notification_attempts: 5,
            notification_backoff: Duration::from_secs(2),
        }
    }
}

struct Pools {
    processing: WorkerPool<ProcessInvoice>,
    notifications: WorkerPool<InvoiceNotification>,
}

pub struct JobScheduler {
    settings: SchedulerSettings,
    processing: Arc<JobQueue<ProcessInvoice>>,
    notifications: Arc<JobQueue<InvoiceNotification>>,
    pools: Mutex<Option<Pools>>,
}

impl JobScheduler {
    /// Creates both queues. Workers start with [`JobScheduler::start`].
    pub fn new(settings: SchedulerSettings) -> Self {
        let processing = Arc::new(JobQueue::new(
            PROCESSING_QUEUE,
            settings.processing_attempts,
            settings.processing_backoff,
        ));
        let notifications = Arc::new(JobQueue::new(
            NOTIFICATION_QUEUE,
            settings.notification_attempts,
            settings.notification_backoff,
        ));
        Self {
            settings,
            processing,
            notifications,
            pools: Mutex::new(None),
        }
    }

    pub fn processing_queue(&self) -> &Arc<JobQueue<ProcessInvoice>> {
        &self.processing
    }

    pub fn notification_queue(&self) -> &Arc<JobQueue<InvoiceNotification>> {
        &self.notifications
    }

    /// Spawns the worker pools. Calling it twice is a no-op.
    pub fn start(
        &self,
        processor: Arc<dyn JobHandler<ProcessInvoice>>,
        notifier: Arc<dyn JobHandler<InvoiceNotification>>,
    ) {
        let mut pools = self.pools.lock().unwrap_or_else(|p| p.into_inner());
        if pools.is_some() {
            log::warn!("Job scheduler already started");
            return;
        }
        *pools = Some(Pools {
            processing: WorkerPool::spawn(
                Arc::clone(&self.processing),
                processor,
                self.settings.processing_concurrency,
            ),
            notifications: WorkerPool::spawn(
                Arc::clone(&self.notifications),
                notifier,
                self.settings.notification_concurrency,
            ),
        });
    }

    /// Queues a processing run. The job id is the invoice id.
    pub fn enqueue_processing(&self, payload: ProcessInvoice) -> Result<String, SchedulerError> {
        let id = payload.invoice_id.clone();
        let priority = payload.options.priority;
        self.processing.enqueue(&id, payload, priority)
    }

    pub fn enqueue_notification(
        &self,
        notification: InvoiceNotification,
    ) -> Result<String, SchedulerError> {
        enqueue_notification(&self.notifications, notification)
    }

    /// Whether a processing job for `invoice_id` is running right now.
    pub fn is_processing(&self, invoice_id: &str) -> bool {
        self.processing.is_active(invoice_id)
    }

    /// Closes both queues and waits for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.processing.close();
        self.notifications.close();

        let pools = self.pools.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(pools) = pools {
            pools.processing.shutdown();
            pools.notifications.shutdown();
            pools.processing.wait().await;
            pools.notifications.wait().await;
        }
    }
}

/// Notification jobs get their own ids so that several events for one
/// invoice can be in flight.
pub fn enqueue_notification(
    queue: &JobQueue<InvoiceNotification>,
    notification: InvoiceNotification,
) -> Result<String, SchedulerError> {
    let id = uuid::Uuid::new_v4().to_string();
    queue.enqueue(&id, notification, Priority::Normal)
}
