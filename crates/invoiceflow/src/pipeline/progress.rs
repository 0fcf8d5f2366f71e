use crate::broadcast::{InvoicePhase, InvoiceProgressTracker, ProgressHub};
use crate::invoice::InvoiceStatus;

/// Events emitted by the orchestrator while it works on one invoice.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        phase: InvoicePhase,
        progress: u8,
        message: String,
    },
    Completed {
        status: InvoiceStatus,
    },
    Failed {
        error: String,
    },
}

impl ProgressEvent {
    pub fn phase(phase: InvoicePhase, progress: u8, message: &str) -> Self {
        ProgressEvent::Phase {
            phase,
            progress,
            message: message.to_string(),
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges orchestrator events to the invoice's broadcast channel.
pub struct BroadcastProgress {
    tracker: InvoiceProgressTracker,
}

impl BroadcastProgress {
    pub fn new(hub: &ProgressHub, invoice_id: &str) -> Self {
        Self {
            tracker: hub.tracker(invoice_id),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase {
                phase,
                progress,
                message,
            } => self.tracker.update(phase, progress, &message),
            ProgressEvent::Completed { status } => self.tracker.completed(status),
            ProgressEvent::Failed { error } => self.tracker.failed(&error),
        }
    }
}
