//! Strict schema for extracted invoice fields.
//!
//! The OCR engine returns loosely-typed JSON. `InvoiceData::from_wire` is the
//! only place that JSON is interpreted; everything downstream works with the
//! typed representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;

/// Date layouts accepted from the engine, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// Field names accepted by `InvoiceData::field_text` and `InvoiceData::set_field`.
pub const FIELD_NAMES: &[&str] = &[
    "invoice_number",
    "invoice_date",
    "due_date",
    "company_name",
    "total_amount",
    "subtotal",
    "tax",
    "currency",
    "email",
    "phone",
    "address",
];

/// Parses a date in any of the supported layouts.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Parses a plain number, tolerating thousands separators and inner spaces.
/// Returns `None` for anything containing other characters.
pub fn parse_plain_number(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Maps currency symbols and aliases to ISO 4217 codes.
pub fn normalize_currency(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let code = match upper.as_str() {
        "$" | "US$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        "₹" | "RS." => "INR",
        "₨" | "RS" => "PKR",
        "SR" | "ر.س" => "SAR",
        "د.إ" => "AED",
        "KD" | "K.D" | "د.ك" => "KWD",
        "₩" => "KRW",
        "₽" => "RUB",
        "₺" => "TRY",
        _ => return upper,
    };
    code.to_string()
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_from(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_plain_number(s),
        _ => None,
    }
}

fn normalize_date_string(raw: String) -> String {
    match parse_date(&raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => raw,
    }
}

/// A monetary amount as extracted.
///
/// `value` holds the parsed number. When the engine returned text that does
/// not parse, `value` is `None` and the text is kept in `raw`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Amount {
    pub fn new(value: f64) -> Self {
        Self {
            value: Some(value),
            raw: None,
            currency: None,
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(normalize_currency(currency));
        self
    }

    /// Whether anything at all was extracted for this amount.
    pub fn is_present(&self) -> bool {
        self.value.is_some() || self.raw.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    /// Interprets an amount from the engine: a bare number, a numeric
    /// string, or an object `{ value, currency }`.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let (inner, currency) = match value {
            Value::Null => return None,
            Value::Object(map) => (
                map.get("value").cloned().unwrap_or(Value::Null),
                non_empty_string(map.get("currency")).map(|c| normalize_currency(&c)),
            ),
            other => (other.clone(), None),
        };

        let amount = match inner {
            Value::Number(n) => Amount {
                value: n.as_f64(),
                raw: None,
                currency,
            },
            Value::String(s) => match parse_plain_number(&s) {
                Some(v) => Amount {
                    value: Some(v),
                    raw: None,
                    currency,
                },
                None => Amount {
                    value: None,
                    raw: Some(s),
                    currency,
                },
            },
            _ => Amount {
                value: None,
                raw: None,
                currency,
            },
        };

        if amount.is_present() || amount.currency.is_some() {
            Some(amount)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Contact {
    fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.address.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total: Option<f64>,
}

/// Structured fields extracted from one invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub subtotal: Option<Amount>,
    #[serde(default)]
    pub tax: Option<Amount>,
    #[serde(default)]
    pub total_amount: Option<Amount>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl InvoiceData {
    /// Normalizes the engine's `invoice_data` object.
    pub fn from_wire(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Self::default();
        };

        let contact = map.get("contact").and_then(|c| {
            let contact = Contact {
                phone: non_empty_string(c.get("phone")),
                email: non_empty_string(c.get("email")).map(|e| e.trim().to_lowercase()),
                address: non_empty_string(c.get("address")),
            };
            (!contact.is_empty()).then_some(contact)
        });

        let line_items = map
            .get("line_items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .map(|item| LineItem {
                        description: non_empty_string(item.get("description")),
                        quantity: number_from(item.get("quantity")),
                        unit_price: number_from(item.get("unit_price")),
                        total: number_from(item.get("total").or_else(|| item.get("line_total"))),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            invoice_number: non_empty_string(map.get("invoice_number")),
            invoice_date: non_empty_string(map.get("invoice_date")).map(normalize_date_string),
            due_date: non_empty_string(map.get("due_date")).map(normalize_date_string),
            company_name: non_empty_string(map.get("company_name")),
            subtotal: map.get("subtotal").and_then(Amount::from_wire),
            tax: map
                .get("tax")
                .or_else(|| map.get("tax_amount"))
                .and_then(Amount::from_wire),
            total_amount: map.get("total_amount").and_then(Amount::from_wire),
            contact,
            line_items,
        }
    }

    pub fn invoice_date_parsed(&self) -> Option<NaiveDate> {
        self.invoice_date.as_deref().and_then(parse_date)
    }

    pub fn due_date_parsed(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_date)
    }

    pub fn total_value(&self) -> Option<f64> {
        self.total_amount.as_ref().and_then(|a| a.value)
    }

    /// Textual value of a named field, as custom rules and corrections see it.
    pub fn field_text(&self, field: &str) -> Option<String> {
        let amount_text = |amount: &Option<Amount>| {
            amount.as_ref().and_then(|a| match (a.value, &a.raw) {
                (Some(v), _) => Some(v.to_string()),
                (None, Some(raw)) => Some(raw.clone()),
                (None, None) => None,
            })
        };
        let contact = self.contact.as_ref();

        match field {
            "invoice_number" => self.invoice_number.clone(),
            "invoice_date" => self.invoice_date.clone(),
            "due_date" => self.due_date.clone(),
            "company_name" => self.company_name.clone(),
            "total_amount" => amount_text(&self.total_amount),
            "subtotal" => amount_text(&self.subtotal),
            "tax" => amount_text(&self.tax),
            "currency" => self.total_amount.as_ref().and_then(|a| a.currency.clone()),
            "email" => contact.and_then(|c| c.email.clone()),
            "phone" => contact.and_then(|c| c.phone.clone()),
            "address" => contact.and_then(|c| c.address.clone()),
            _ => None,
        }
    }

    /// Overwrites a named field from its textual form and returns the
    /// previous textual value.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<Option<String>, StateError> {
        if !FIELD_NAMES.contains(&field) {
            return Err(StateError::UnknownField(field.to_string()));
        }
        let previous = self.field_text(field);
        let text = Some(value.to_string());

        let parse_amount = |value: &str| {
            parse_plain_number(value).ok_or_else(|| StateError::InvalidFieldValue {
                field: field.to_string(),
                reason: format!("'{}' is not a number", value),
            })
        };
        let set_amount = |slot: &mut Option<Amount>, v: f64| {
            let currency = slot.as_ref().and_then(|a| a.currency.clone());
            *slot = Some(Amount {
                value: Some(v),
                raw: None,
                currency,
            });
        };

        match field {
            "invoice_number" => self.invoice_number = text,
            "company_name" => self.company_name = text,
            "invoice_date" | "due_date" => {
                let date = parse_date(value).ok_or_else(|| StateError::InvalidFieldValue {
                    field: field.to_string(),
                    reason: format!("'{}' is not a recognised date", value),
                })?;
                let iso = Some(date.format("%Y-%m-%d").to_string());
                if field == "invoice_date" {
                    self.invoice_date = iso;
                } else {
                    self.due_date = iso;
                }
            }
            "total_amount" => set_amount(&mut self.total_amount, parse_amount(value)?),
            "subtotal" => set_amount(&mut self.subtotal, parse_amount(value)?),
            "tax" => set_amount(&mut self.tax, parse_amount(value)?),
            "currency" => {
                let code = normalize_currency(value);
                for amount in [&mut self.total_amount, &mut self.subtotal, &mut self.tax]
                    .into_iter()
                    .flatten()
                {
                    amount.currency = Some(code.clone());
                }
                if self.total_amount.is_none() {
                    self.total_amount = Some(Amount {
                        value: None,
                        raw: None,
                        currency: Some(code),
                    });
                }
            }
            "email" | "phone" | "address" => {
                let contact = self.contact.get_or_insert_with(Contact::default);
                match field {
                    "email" => contact.email = Some(value.trim().to_lowercase()),
                    "phone" => contact.phone = text,
                    _ => contact.address = text,
                }
            }
            _ => unreachable!("field names checked above"),
        }

        Ok(previous)
    }
}
