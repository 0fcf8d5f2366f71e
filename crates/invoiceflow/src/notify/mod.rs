//! Delivery of processing outcomes to caller-supplied webhooks.

pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;

pub use webhook::{parse_webhook_url, WebhookNotifier};

use crate::error::NotifyError;
use crate::sanitize::redact_url;
use crate::scheduler::{InvoiceNotification, Job, JobError, JobHandler};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &InvoiceNotification) -> Result<(), NotifyError>;
}

/// Worker-side handler for the `notifications` queue.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl JobHandler<InvoiceNotification> for NotificationDispatcher {
    async fn handle(&self, job: &Job<InvoiceNotification>) -> Result<(), JobError> {
        let notification = &job.payload;
        self.notifier.deliver(notification).await.map_err(|e| {
            log::warn!(
                "Notification for invoice {} to {} failed (attempt {}/{}): {}",
                notification.invoice_id,
                redact_url(&notification.webhook_url),
                job.attempts,
                job.max_attempts,
                e
            );
            JobError {
                message: e.to_string(),
                retryable: e.is_retryable(),
            }
        })
    }
}
