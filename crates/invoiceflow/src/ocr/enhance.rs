//! Post-extraction enhancement: confidence roll-up, quality tier,
//! structural completeness and deterministic auto-correction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::invoice::{Amount, InvoiceData};

/// Fields an invoice is expected to carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["invoice_number", "invoice_date", "total_amount", "company_name"];

/// Confidence reported when the engine gives no per-field scores.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Excellent,
    Good,
    Acceptable,
    Poor,
}

impl DataQuality {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.90 {
            DataQuality::Excellent
        } else if confidence >= 0.75 {
            DataQuality::Good
        } else if confidence >= 0.60 {
            DataQuality::Acceptable
        } else {
            DataQuality::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCorrection {
    pub field: String,
    pub original: String,
    pub corrected: String,
}

/// Clamps per-field scores into [0, 1], dropping non-finite ones.
pub fn clamp_field_confidences(scores: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    scores
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k.clone(), v.clamp(0.0, 1.0)))
        .collect()
}

/// Mean of the per-field scores.
pub fn overall_confidence(fields: &BTreeMap<String, f64>) -> f64 {
    if fields.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    fields.values().sum::<f64>() / fields.len() as f64
}

/// Required fields with no usable value.
pub fn missing_required_fields(data: &InvoiceData) -> Vec<String> {
    let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
    REQUIRED_FIELDS
        .iter()
        .filter(|field| match **field {
            "invoice_number" => blank(&data.invoice_number),
            "invoice_date" => blank(&data.invoice_date),
            "company_name" => blank(&data.company_name),
            "total_amount" => !data.total_amount.as_ref().is_some_and(Amount::is_present),
            _ => false,
        })
        .map(|f| f.to_string())
        .collect()
}

fn strip_to_number(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    kept.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Applies the deterministic corrections and reports each one.
pub fn auto_correct(data: &mut InvoiceData) -> Vec<AutoCorrection> {
    let mut corrections = Vec::new();

    if let Some(number) = data.invoice_number.as_mut() {
        let trimmed = number.trim();
        if trimmed != number.as_str() {
            corrections.push(AutoCorrection {
                field: "invoice_number".to_string(),
                original: number.clone(),
                corrected: trimmed.to_string(),
            });
            *number = trimmed.to_string();
        }
    }

    for (field, slot) in [
        ("total_amount", &mut data.total_amount),
        ("subtotal", &mut data.subtotal),
        ("tax", &mut data.tax),
    ] {
        let Some(amount) = slot.as_mut() else { continue };
        if amount.value.is_some() {
            continue;
        }
        let Some(raw) = amount.raw.clone() else { continue };
        if let Some(value) = strip_to_number(&raw) {
            corrections.push(AutoCorrection {
                field: field.to_string(),
                original: raw,
                corrected: value.to_string(),
            });
            amount.value = Some(value);
            amount.raw = None;
        }
    }

    corrections
}
