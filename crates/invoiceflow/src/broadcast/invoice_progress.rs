//! Per-invoice progress channels.
//!
//! Every invoice that somebody is watching gets its own broadcast channel.
//! Channels are dropped once a settled event has been published or when the
//! last subscriber goes away, so publishing for an unwatched invoice is free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::invoice::InvoiceStatus;

/// Step of the processing pipeline an event was emitted from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePhase {
    Queued,
    Preparing,
    Ocr,
    Validating,
    DuplicateCheck,
    Saving,
    Completed,
    Failed,
}

impl std::fmt::Display for InvoicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoicePhase::Queued => write!(f, "Queued"),
            InvoicePhase::Preparing => write!(f, "Preparing"),
            InvoicePhase::Ocr => write!(f, "Running OCR"),
            InvoicePhase::Validating => write!(f, "Validating"),
            InvoicePhase::DuplicateCheck => write!(f, "Checking for duplicates"),
            InvoicePhase::Saving => write!(f, "Saving"),
            InvoicePhase::Completed => write!(f, "Completed"),
            InvoicePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for one invoice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceProgressEvent {
    pub invoice_id: String,
    pub status: InvoiceStatus,
    /// 0 to 100.
    pub progress: u8,
    pub phase: InvoicePhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InvoiceProgressEvent {
    pub fn new(invoice_id: &str, phase: InvoicePhase, progress: u8, message: &str) -> Self {
        Self {
            invoice_id: invoice_id.to_string(),
            status: InvoiceStatus::Processing,
            progress: progress.min(100),
            phase,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Final event for a run that reached a non-failed state.
    pub fn completed(invoice_id: &str, status: InvoiceStatus) -> Self {
        Self {
            status,
            ..Self::new(
                invoice_id,
                InvoicePhase::Completed,
                100,
                "Processing completed successfully",
            )
        }
    }

    pub fn failed(invoice_id: &str, error: &str) -> Self {
        Self {
            status: InvoiceStatus::Failed,
            error: Some(error.to_string()),
            ..Self::new(invoice_id, InvoicePhase::Failed, 0, "Processing failed")
        }
    }

    /// Whether this event ends a watch.
    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }
}

/// Owns the per-invoice channels.
#[derive(Clone)]
pub struct ProgressHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<InvoiceProgressEvent>>>>,
    capacity: usize,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Sends `event` to the invoice's watchers, if any.
    pub fn publish(&self, event: InvoiceProgressEvent) {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let Some(sender) = channels.get(&event.invoice_id) else {
            return;
        };

        let settled = event.is_settled();
        let invoice_id = event.invoice_id.clone();
        // No receivers left is fine; the entry is pruned below.
        let _ = sender.send(event);

        if settled || sender.receiver_count() == 0 {
            channels.remove(&invoice_id);
        }
    }

    /// Events for `invoice_id` from now on. The stream ends after the first
    /// settled event or when the hub drops the channel.
    pub fn subscribe(&self, invoice_id: &str) -> BoxStream<'static, InvoiceProgressEvent> {
        let receiver = {
            let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            channels.retain(|_, sender| sender.receiver_count() > 0);
            channels
                .entry(invoice_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        stream::unfold(Some(receiver), |state| async move {
            let mut receiver = state?;
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let next = if event.is_settled() {
                            None
                        } else {
                            Some(receiver)
                        };
                        return Some((event, next));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Progress watcher lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Number of invoices with live channels.
    pub fn active_channels(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn tracker(&self, invoice_id: &str) -> InvoiceProgressTracker {
        InvoiceProgressTracker {
            invoice_id: invoice_id.to_string(),
            hub: self.clone(),
        }
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(32)
    }
}

/// Publishes events for a single invoice.
pub struct InvoiceProgressTracker {
    invoice_id: String,
    hub: ProgressHub,
}

impl InvoiceProgressTracker {
    pub fn update(&self, phase: InvoicePhase, progress: u8, message: &str) {
        self.hub
            .publish(InvoiceProgressEvent::new(&self.invoice_id, phase, progress, message));
    }

    pub fn completed(&self, status: InvoiceStatus) {
        self.hub
            .publish(InvoiceProgressEvent::completed(&self.invoice_id, status));
    }

    pub fn failed(&self, error: &str) {
        self.hub
            .publish(InvoiceProgressEvent::failed(&self.invoice_id, error));
    }
}
