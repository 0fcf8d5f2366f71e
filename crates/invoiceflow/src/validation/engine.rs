//! Scores an extraction against built-in checks and the custom rule set.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::{Duration, Months, NaiveDate, Utc};
use regex::Regex;

use super::result::{FieldValidation, Severity, ValidationIssue, ValidationResult};
use super::rules::{RuleCache, RuleTier};
use crate::invoice::fields::FIELD_NAMES;
use crate::invoice::{Amount, InvoiceData};

/// Required fields and the score deducted when each is missing.
pub const REQUIRED_FIELD_WEIGHTS: [(&str, u32); 4] = [
    ("invoice_number", 25),
    ("total_amount", 30),
    ("invoice_date", 20),
    ("company_name", 15),
];

const AMOUNT_TOLERANCE: f64 = 0.02;
const LINE_SUM_RELATIVE_TOLERANCE: f64 = 0.01;
const SUSPICIOUS_AMOUNT: f64 = 1e9;

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+@[\w.-]+\.\w{2,}$").unwrap());

#[derive(Default)]
struct Collector {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    fields: BTreeMap<String, FieldValidation>,
}

impl Collector {
    fn mark(&mut self, field: &str, message: &str) {
        let entry = self.fields.entry(field.to_string()).or_default();
        entry.valid = false;
        if entry.message.is_none() {
            entry.message = Some(message.to_string());
        }
    }

    fn error(&mut self, field: &str, message: &str, severity: Severity, weight: Option<u32>) {
        self.mark(field, message);
        self.errors
            .push(ValidationIssue::new(field, message, severity, weight));
    }

    fn warning(&mut self, field: &str, message: &str, severity: Severity) {
        self.mark(field, message);
        self.warnings
            .push(ValidationIssue::new(field, message, severity, None));
    }

    fn finish(mut self, data: &InvoiceData) -> ValidationResult {
        for field in FIELD_NAMES {
            let value = data.field_text(field);
            if value.is_none() && !self.fields.contains_key(*field) {
                continue;
            }
            let entry = self.fields.entry(field.to_string()).or_insert_with(|| FieldValidation {
                valid: true,
                ..Default::default()
            });
            entry.value = value;
        }
        ValidationResult::from_issues(self.errors, self.warnings, self.fields)
    }
}

fn is_missing(data: &InvoiceData, field: &str) -> bool {
    match field {
        "total_amount" => !data.total_amount.as_ref().is_some_and(Amount::is_present),
        other => data.field_text(other).is_none(),
    }
}

pub struct ValidationEngine {
    rules: Arc<RuleCache>,
}

impl ValidationEngine {
    pub fn new(rules: Arc<RuleCache>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    pub fn validate(&self, data: &InvoiceData) -> ValidationResult {
        self.validate_at(data, Utc::now().date_naive())
    }

    /// Validates relative to `today` for the date-range checks.
    pub fn validate_at(&self, data: &InvoiceData, today: NaiveDate) -> ValidationResult {
        let _span = tracing::info_span!("validation.validate").entered();
        let mut c = Collector::default();

        check_required(data, &mut c);
        check_formats(data, today, &mut c);
        check_business_rules(data, &mut c);
        check_consistency(data, &mut c);
        self.check_custom_rules(data, &mut c);

        let result = c.finish(data);
        log::debug!(
            "Validation finished: score {}, {} errors, {} warnings",
            result.score,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    fn check_custom_rules(&self, data: &InvoiceData, c: &mut Collector) {
        let rules = self.rules.snapshot();
        for compiled in rules.rules() {
            let rule = &compiled.rule;
            let value = data.field_text(&rule.field);

            let failure = match value.as_deref() {
                None => rule.required.then(|| compiled.missing_message()),
                Some(v) if v.trim().is_empty() => rule.required.then(|| compiled.missing_message()),
                Some(v) => compiled.check(v),
            };
            let Some(message) = failure else { continue };

            match rule.tier {
                RuleTier::Critical => c.error(&rule.field, &message, Severity::Critical, None),
                RuleTier::Important => c.warning(&rule.field, &message, Severity::High),
                RuleTier::Optional => c.warning(&rule.field, &message, Severity::Low),
            }

            if let Some(current) = value.as_deref() {
                if let Some(suggested) = rule.auto_correct.apply(current) {
                    if suggested != current {
                        if let Some(entry) = c.fields.get_mut(&rule.field) {
                            entry.suggested_value.get_or_insert(suggested);
                        }
                    }
                }
            }
        }
    }
}

fn check_required(data: &InvoiceData, c: &mut Collector) {
    for (field, weight) in REQUIRED_FIELD_WEIGHTS {
        if is_missing(data, field) {
            c.error(
                field,
                &format!("Required field '{}' is missing", field),
                Severity::Critical,
                Some(weight),
            );
        }
    }
}

fn check_amount(field: &str, amount: &Option<Amount>, strictly_positive: bool, c: &mut Collector) {
    let Some(amount) = amount.as_ref().filter(|a| a.is_present()) else {
        return;
    };
    match amount.value {
        None => c.error(field, &format!("{} is not numeric", field), Severity::High, None),
        Some(v) if strictly_positive && v <= 0.0 => {
            c.error(field, &format!("{} must be greater than zero", field), Severity::High, None)
        }
        Some(v) if v < 0.0 => c.error(field, &format!("{} must not be negative", field), Severity::High, None),
        Some(v) if v > SUSPICIOUS_AMOUNT => c.warning(
            field,
            &format!("{} is unusually large", field),
            Severity::Medium,
        ),
        Some(_) => {}
    }
}

fn check_formats(data: &InvoiceData, today: NaiveDate, c: &mut Collector) {
    if let Some(number) = &data.invoice_number {
        let len = number.trim().chars().count();
        if !number.trim().is_empty() && !(3..=50).contains(&len) {
            c.warning(
                "invoice_number",
                "Invoice number length is unusual",
                Severity::Medium,
            );
        }
    }

    check_amount("total_amount", &data.total_amount, true, c);
    check_amount("subtotal", &data.subtotal, false, c);
    check_amount("tax", &data.tax, false, c);

    if let Some(raw) = data.invoice_date.as_deref().filter(|d| !d.trim().is_empty()) {
        match crate::invoice::parse_date(raw) {
            None => c.error(
                "invoice_date",
                "Invoice date could not be parsed",
                Severity::High,
                None,
            ),
            Some(date) => {
                let oldest = today.checked_sub_months(Months::new(60)).unwrap_or(NaiveDate::MIN);
                let latest = today.checked_add_months(Months::new(12)).unwrap_or(NaiveDate::MAX);
                if date < oldest {
                    c.warning("invoice_date", "Invoice date is more than 5 years old", Severity::Medium);
                } else if date > latest {
                    c.warning(
                        "invoice_date",
                        "Invoice date is more than a year in the future",
                        Severity::Medium,
                    );
                }
            }
        }
    }

    if let Some(raw) = data.due_date.as_deref().filter(|d| !d.trim().is_empty()) {
        if crate::invoice::parse_date(raw).is_none() {
            c.warning("due_date", "Due date could not be parsed", Severity::Medium);
        }
    }

    if let Some(contact) = &data.contact {
        if let Some(email) = contact.email.as_deref().filter(|e| !e.trim().is_empty()) {
            if !RE_EMAIL.is_match(email) {
                c.warning("email", "Email address looks invalid", Severity::Low);
            }
        }
        if let Some(phone) = contact.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            let digits = phone.chars().filter(char::is_ascii_digit).count();
            if !(7..=15).contains(&digits) {
                c.warning(
                    "phone",
                    &format!("Phone number has {} digits", digits),
                    Severity::Low,
                );
            }
        }
    }
}

fn check_business_rules(data: &InvoiceData, c: &mut Collector) {
    if let (Some(invoice), Some(due)) = (data.invoice_date_parsed(), data.due_date_parsed()) {
        if due < invoice {
            c.error("due_date", "Due date is before invoice date", Severity::High, None);
        } else if due > invoice + Duration::days(365) {
            c.warning(
                "due_date",
                "Due date is more than a year after invoice date",
                Severity::Low,
            );
        }
    }

    let value = |a: &Option<Amount>| a.as_ref().and_then(|a| a.value);
    if let (Some(subtotal), Some(tax), Some(total)) =
        (value(&data.subtotal), value(&data.tax), value(&data.total_amount))
    {
        if (subtotal + tax - total).abs() > AMOUNT_TOLERANCE {
            c.warning(
                "total_amount",
                &format!(
                    "Subtotal {:.2} plus tax {:.2} does not equal total {:.2}",
                    subtotal, tax, total
                ),
                Severity::Medium,
            );
        }
    }

    for (i, item) in data.line_items.iter().enumerate() {
        let field = format!("line_items[{}]", i);
        if item.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
            c.warning(&field, "Line item has no description", Severity::Low);
        }
        if item.quantity.is_some_and(|q| q <= 0.0) {
            c.warning(&field, "Line item quantity must be positive", Severity::Medium);
        }
        if item.unit_price.is_some_and(|p| p < 0.0) {
            c.warning(&field, "Line item unit price is negative", Severity::Medium);
        }
        if let (Some(q), Some(p), Some(t)) = (item.quantity, item.unit_price, item.total) {
            if (q * p - t).abs() > AMOUNT_TOLERANCE {
                c.warning(
                    &field,
                    "Line item total does not equal quantity times unit price",
                    Severity::Medium,
                );
            }
        }
    }

    let line_totals: Vec<f64> = data.line_items.iter().filter_map(|i| i.total).collect();
    if !line_totals.is_empty() {
        let sum: f64 = line_totals.iter().sum();
        let (field, reference) = match value(&data.subtotal) {
            Some(s) => ("subtotal", Some(s)),
            None => ("total_amount", value(&data.total_amount)),
        };
        if let Some(reference) = reference.filter(|r| *r != 0.0) {
            if ((sum - reference) / reference).abs() > LINE_SUM_RELATIVE_TOLERANCE {
                c.warning(
                    field,
                    &format!("Line items sum to {:.2}, expected {:.2}", sum, reference),
                    Severity::Medium,
                );
            }
        }
    }
}

fn check_consistency(data: &InvoiceData, c: &mut Collector) {
    let mut currencies: Vec<&str> = [&data.total_amount, &data.subtotal, &data.tax]
        .into_iter()
        .filter_map(|a| a.as_ref().and_then(|a| a.currency.as_deref()))
        .collect();
    currencies.sort_unstable();
    currencies.dedup();
    if currencies.len() > 1 {
        c.error(
            "currency",
            &format!("Amounts use different currencies: {}", currencies.join(", ")),
            Severity::High,
            None,
        );
    }

    let contact = data.contact.as_ref();
    let strings = [
        ("invoice_number", data.invoice_number.as_deref()),
        ("invoice_date", data.invoice_date.as_deref()),
        ("due_date", data.due_date.as_deref()),
        ("company_name", data.company_name.as_deref()),
        ("email", contact.and_then(|c| c.email.as_deref())),
        ("phone", contact.and_then(|c| c.phone.as_deref())),
        ("address", contact.and_then(|c| c.address.as_deref())),
    ];
    for (field, value) in strings {
        if value.is_some_and(|v| v.trim().is_empty()) {
            c.error(field, &format!("{} is blank", field), Severity::Medium, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Contact, LineItem};
    use crate::validation::{AutoCorrect, ValidationRule};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn engine() -> ValidationEngine {
        ValidationEngine::new(Arc::new(RuleCache::new()))
    }

    fn complete() -> InvoiceData {
        InvoiceData {
            invoice_number: Some("INV-1001".to_string()),
            invoice_date: Some("2024-05-01".to_string()),
            company_name: Some("Acme GmbH".to_string()),
            total_amount: Some(Amount::new(1190.0).with_currency("EUR")),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_invoice_scores_100() {
        let result = engine().validate_at(&complete(), today());
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(result.score, 100);
        assert!(result.warnings.is_empty());
        assert!(result.field_validations["invoice_number"].valid);
    }

    #[test]
    fn test_missing_total_costs_thirty() {
        let mut data = complete();
        data.total_amount = None;
        let result = engine().validate_at(&data, today());
        assert!(!result.is_valid);
        assert!(result.score <= 70);
        assert_eq!(result.errors[0].field, "total_amount");
        assert_eq!(result.errors[0].weight, Some(30));
        assert!(!result.field_validations["total_amount"].valid);
    }

    #[test]
    fn test_empty_invoice_loses_all_required_weights() {
        let result = engine().validate_at(&InvoiceData::default(), today());
        assert_eq!(result.errors.len(), 4);
        assert_eq!(result.score, 100 - 25 - 30 - 20 - 15);
    }

    #[test]
    fn test_amount_format_checks() {
        let mut data = complete();
        data.total_amount = Some(Amount {
            value: None,
            raw: Some("one thousand".to_string()),
            currency: None,
        });
        data.tax = Some(Amount::new(-1.0));
        let result = engine().validate_at(&data, today());
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["total_amount", "tax"]);

        let mut data = complete();
        data.total_amount = Some(Amount::new(0.0));
        assert!(!engine().validate_at(&data, today()).is_valid);

        let mut data = complete();
        data.total_amount = Some(Amount::new(2e9));
        let result = engine().validate_at(&data, today());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_date_checks() {
        let mut data = complete();
        data.invoice_date = Some("next tuesday".to_string());
        let result = engine().validate_at(&data, today());
        assert_eq!(result.errors[0].field, "invoice_date");

        let mut data = complete();
        data.invoice_date = Some("2018-01-01".to_string());
        let result = engine().validate_at(&data, today());
        assert!(result.is_valid);
        assert_eq!(result.warnings[0].field, "invoice_date");

        let mut data = complete();
        data.invoice_date = Some("2026-01-01".to_string());
        assert_eq!(engine().validate_at(&data, today()).warnings.len(), 1);

        let mut data = complete();
        data.due_date = Some("2024-04-01".to_string());
        let result = engine().validate_at(&data, today());
        assert_eq!(result.errors[0].message, "Due date is before invoice date");

        let mut data = complete();
        data.due_date = Some("soon".to_string());
        let result = engine().validate_at(&data, today());
        assert!(result.is_valid);
        assert_eq!(result.warnings[0].field, "due_date");
    }

    #[test]
    fn test_totals_must_add_up() {
        let mut data = complete();
        data.subtotal = Some(Amount::new(1000.0).with_currency("EUR"));
        data.tax = Some(Amount::new(190.0).with_currency("EUR"));
        assert!(engine().validate_at(&data, today()).warnings.is_empty());

        data.tax = Some(Amount::new(150.0).with_currency("EUR"));
        let result = engine().validate_at(&data, today());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.score, 97);
    }

    #[test]
    fn test_line_items() {
        let mut data = complete();
        data.subtotal = Some(Amount::new(1000.0));
        data.tax = Some(Amount::new(190.0));
        data.line_items = vec![
            LineItem {
                description: Some("Consulting".to_string()),
                quantity: Some(10.0),
                unit_price: Some(100.0),
                total: Some(1000.0),
            },
        ];
        assert!(engine().validate_at(&data, today()).warnings.is_empty());

        data.line_items.push(LineItem {
            description: None,
            quantity: Some(0.0),
            unit_price: Some(5.0),
            total: Some(50.0),
        });
        let result = engine().validate_at(&data, today());
        let item_warnings = result
            .warnings
            .iter()
            .filter(|w| w.field == "line_items[1]")
            .count();
        assert_eq!(item_warnings, 3);
        assert!(result.warnings.iter().any(|w| w.field == "subtotal"));
    }

    #[test]
    fn test_currency_mismatch_is_error() {
        let mut data = complete();
        data.subtotal = Some(Amount::new(1000.0).with_currency("USD"));
        let result = engine().validate_at(&data, today());
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].field, "currency");
    }

    #[test]
    fn test_whitespace_only_strings_are_errors() {
        let mut data = complete();
        data.company_name = Some("   ".to_string());
        let result = engine().validate_at(&data, today());
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "company_name");
    }

    #[test]
    fn test_contact_checks() {
        let mut data = complete();
        data.contact = Some(Contact {
            email: Some("not-an-email".to_string()),
            phone: Some("12-34".to_string()),
            address: None,
        });
        let result = engine().validate_at(&data, today());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.score, 98);
    }

    #[test]
    fn test_custom_rules_by_tier() {
        let rules = Arc::new(RuleCache::new());
        rules
            .reload(vec![
                ValidationRule {
                    pattern: Some(r"^[A-Z]+-\d+$".to_string()),
                    auto_correct: AutoCorrect::Uppercase,
                    ..ValidationRule::new("number-format", "invoice_number", RuleTier::Critical)
                },
                ValidationRule {
                    max_value: Some(1000.0),
                    ..ValidationRule::new("total-cap", "total_amount", RuleTier::Important)
                },
                ValidationRule {
                    required: true,
                    ..ValidationRule::new("needs-email", "email", RuleTier::Optional)
                },
            ])
            .unwrap();
        let engine = ValidationEngine::new(rules);

        let mut data = complete();
        data.invoice_number = Some("inv-1001".to_string());
        let result = engine.validate_at(&data, today());

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].severity, Severity::Critical);
        assert_eq!(result.warnings.len(), 2);
        // 100 - 30 (critical rule) - 5 (important) - 1 (optional)
        assert_eq!(result.score, 64);
        assert_eq!(
            result.field_validations["invoice_number"].suggested_value.as_deref(),
            Some("INV-1001")
        );
    }
}
