//! Invoice records, extracted fields and the review lifecycle.

pub mod fields;
pub mod lifecycle;
pub mod record;
pub mod status;

pub use fields::{normalize_currency, parse_date, Amount, Contact, InvoiceData, LineItem};
pub use lifecycle::{DuplicateMatch, ProcessingOutcome};
pub use record::{Confidence, Correction, ErrorDetails, ExportEvent, FieldChange, InvoiceRecord, NewInvoice};
pub use status::{InvoiceStatus, ParseStatusError};
