//! Duplicate detection against previously accepted invoices.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use crate::db::{DatabaseError, DuplicateQuery, InvoiceStore};
use crate::invoice::{DuplicateMatch, InvoiceData};

/// Days either side of the incoming invoice date that still count as a match.
pub const DATE_WINDOW_DAYS: i64 = 7;

/// Relative tolerance on the total amount.
pub const AMOUNT_TOLERANCE: f64 = 0.05;

/// Builds the search window for an incoming invoice. `None` when the number,
/// date or amount is missing.
pub fn build_query(
    invoice_number: Option<&str>,
    invoice_date: Option<NaiveDate>,
    total_amount: Option<f64>,
    exclude_id: Option<&str>,
) -> Option<DuplicateQuery> {
    let number = invoice_number.map(str::trim).filter(|n| !n.is_empty())?;
    let date = invoice_date?;
    let amount = total_amount.filter(|a| a.is_finite())?;

    let window = Duration::days(DATE_WINDOW_DAYS);
    let (low, high) = (amount * (1.0 - AMOUNT_TOLERANCE), amount * (1.0 + AMOUNT_TOLERANCE));

    Some(DuplicateQuery {
        invoice_number: number.to_string(),
        date_from: date - window,
        date_to: date + window,
        amount_min: low.min(high),
        amount_max: low.max(high),
        exclude_id: exclude_id.map(str::to_string),
    })
}

/// Looks up likely duplicates through the invoice store.
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn InvoiceStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    pub async fn find_duplicate(
        &self,
        invoice_number: Option<&str>,
        invoice_date: Option<NaiveDate>,
        total_amount: Option<f64>,
        exclude_id: Option<&str>,
    ) -> Result<Option<DuplicateMatch>, DatabaseError> {
        let Some(query) = build_query(invoice_number, invoice_date, total_amount, exclude_id)
        else {
            return Ok(None);
        };

        let Some(existing) = self.store.find_duplicate(&query).await? else {
            return Ok(None);
        };

        let reason = format!(
            "Invoice number {} matches invoice {} within {} days and {:.0}% of the amount",
            query.invoice_number,
            existing.id,
            DATE_WINDOW_DAYS,
            AMOUNT_TOLERANCE * 100.0
        );
        log::info!("Possible duplicate of {}: {}", existing.id, reason);

        Ok(Some(DuplicateMatch {
            invoice_id: existing.id,
            reason,
        }))
    }

    /// Convenience wrapper over extracted invoice data.
    pub async fn check(
        &self,
        data: &InvoiceData,
        exclude_id: Option<&str>,
    ) -> Result<Option<DuplicateMatch>, DatabaseError> {
        self.find_duplicate(
            data.invoice_number.as_deref(),
            data.invoice_date_parsed(),
            data.total_value(),
            exclude_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_query_window() {
        let q = build_query(Some(" INV-1 "), Some(date("2024-03-10")), Some(100.0), Some("x")).unwrap();
        assert_eq!(q.invoice_number, "INV-1");
        assert_eq!(q.date_from, date("2024-03-03"));
        assert_eq!(q.date_to, date("2024-03-17"));
        assert!((q.amount_min - 95.0).abs() < 1e-9);
        assert!((q.amount_max - 105.0).abs() < 1e-9);
        assert_eq!(q.exclude_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_negative_amount_window_is_ordered() {
        let q = build_query(Some("CN-1"), Some(date("2024-03-10")), Some(-100.0), None).unwrap();
        assert!(q.amount_min < q.amount_max);
        assert!((q.amount_min + 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_identity_yields_none() {
        let d = Some(date("2024-03-10"));
        assert!(build_query(None, d, Some(1.0), None).is_none());
        assert!(build_query(Some("  "), d, Some(1.0), None).is_none());
        assert!(build_query(Some("A"), None, Some(1.0), None).is_none());
        assert!(build_query(Some("A"), d, None, None).is_none());
    }
}
