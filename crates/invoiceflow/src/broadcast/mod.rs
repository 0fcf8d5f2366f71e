//! Broadcasting of real-time invoice progress events.

pub mod invoice_progress;

pub use invoice_progress::{
    InvoicePhase, InvoiceProgressEvent, InvoiceProgressTracker, ProgressHub,
};
