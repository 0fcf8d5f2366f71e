pub mod context;
pub mod error;
pub mod locks;
pub mod progress;
pub mod runner;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use locks::InvoiceLocks;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::ProcessingOrchestrator;
