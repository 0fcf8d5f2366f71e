use crate::invoice::{DuplicateMatch, InvoiceRecord};
use crate::ocr::ProcessingResult;
use crate::scheduler::{Job, ProcessInvoice};
use crate::validation::ValidationResult;

/// State carried through one processing attempt.
pub struct PipelineContext<'a> {
    // Input
    pub job: &'a Job<ProcessInvoice>,

    // Working copy in `processing`; committed only after every step succeeded
    pub record: InvoiceRecord,

    // Step 1 result
    pub extraction: Option<ProcessingResult>,

    // Step 2 result; stays None when validation was not requested
    pub validation: Option<ValidationResult>,

    // Step 3 result
    pub duplicate: Option<DuplicateMatch>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(job: &'a Job<ProcessInvoice>, record: InvoiceRecord) -> Self {
        Self {
            job,
            record,
            extraction: None,
            validation: None,
            duplicate: None,
        }
    }

    pub fn invoice_id(&self) -> &str {
        &self.job.payload.invoice_id
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.job.payload.options.webhook_url.as_deref()
    }
}
