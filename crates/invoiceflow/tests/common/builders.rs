//! Builders for engine replies and uploads.

#![allow(dead_code)]

use serde_json::{json, Map, Value};

use invoiceflow::invoice::NewInvoice;
use invoiceflow::ocr::EngineResponse;

/// Builder for what the fake OCR engine answers.
pub struct ExtractionBuilder {
    fields: Map<String, Value>,
    confidence: Map<String, Value>,
    raw_text: Option<String>,
}

impl ExtractionBuilder {
    /// A complete, valid invoice.
    pub fn new() -> Self {
        let mut builder = Self {
            fields: Map::new(),
            confidence: Map::new(),
            raw_text: Some("INVOICE".to_string()),
        };
        builder = builder
            .invoice_number("INV-1001")
            .invoice_date("2026-03-01")
            .company("Acme GmbH")
            .total(1190.0, "EUR");
        builder
            .confidence
            .insert("invoice_number".to_string(), json!(0.95));
        builder
            .confidence
            .insert("total_amount".to_string(), json!(0.9));
        builder
    }

    pub fn invoice_number(mut self, number: &str) -> Self {
        self.fields
            .insert("invoice_number".to_string(), json!(number));
        self
    }

    pub fn invoice_date(mut self, date: &str) -> Self {
        self.fields.insert("invoice_date".to_string(), json!(date));
        self
    }

    pub fn company(mut self, name: &str) -> Self {
        self.fields.insert("company_name".to_string(), json!(name));
        self
    }

    pub fn total(mut self, value: f64, currency: &str) -> Self {
        self.fields.insert(
            "total_amount".to_string(),
            json!({ "value": value, "currency": currency }),
        );
        self
    }

    /// Drops a field from the reply.
    pub fn without(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    pub fn build(self) -> EngineResponse {
        serde_json::from_value(json!({
            "success": true,
            "invoice_data": Value::Object(self.fields),
            "raw_text": self.raw_text,
            "confidence_scores": Value::Object(self.confidence),
        }))
        .expect("engine response should deserialize")
    }
}

impl Default for ExtractionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Upload metadata for a stored file.
pub fn upload(owner: &str, filename: &str, storage_path: &str, size: u64) -> NewInvoice {
    NewInvoice {
        owner_id: owner.to_string(),
        original_filename: filename.to_string(),
        storage_path: storage_path.to_string(),
        file_size: size,
        mime_type: Some("image/png".to_string()),
    }
}
