pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod duplicate;
pub mod error;
pub mod invoice;
pub mod notify;
pub mod ocr;
pub mod pipeline;
pub mod sanitize;
pub mod scheduler;
pub mod secrets;
pub mod service;
pub mod validation;

pub use broadcast::{InvoicePhase, InvoiceProgressEvent, ProgressHub};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, InvoiceflowError, NotifyError, OcrError, Result, SchedulerError, StateError,
};
pub use invoice::{FieldChange, InvoiceData, InvoiceRecord, InvoiceStatus, NewInvoice};
pub use pipeline::{PipelineContext, ProcessingOrchestrator};
pub use scheduler::{JobScheduler, Priority, ProcessingOptions};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::{InvoiceService, ServiceParts, StatusReport};
pub use validation::{RuleError, ValidationEngine, ValidationResult};
