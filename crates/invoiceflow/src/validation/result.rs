use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// One problem found in an extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
    /// Explicit score deduction. Only set for required-field errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl ValidationIssue {
    pub fn new(field: &str, message: &str, severity: Severity, weight: Option<u32>) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
            severity,
            weight,
        }
    }

    /// Points deducted when this issue is an error.
    pub fn error_weight(&self) -> u32 {
        self.weight.unwrap_or(match self.severity {
            Severity::Critical => 30,
            Severity::High => 20,
            Severity::Medium | Severity::Low => 10,
        })
    }

    /// Points deducted when this issue is a warning.
    pub fn warning_deduction(&self) -> u32 {
        match self.severity {
            Severity::High => 5,
            Severity::Medium => 3,
            Severity::Critical | Severity::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// 0..=100.
    pub score: u32,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub field_validations: BTreeMap<String, FieldValidation>,
}

/// `100 - Σ error weights - Σ warning deductions`, clamped to 0..=100.
pub fn score(errors: &[ValidationIssue], warnings: &[ValidationIssue]) -> u32 {
    let deducted: u64 = errors.iter().map(|e| e.error_weight() as u64).sum::<u64>()
        + warnings.iter().map(|w| w.warning_deduction() as u64).sum::<u64>();
    100u64.saturating_sub(deducted) as u32
}

impl ValidationResult {
    pub fn from_issues(
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
        field_validations: BTreeMap<String, FieldValidation>,
    ) -> Self {
        Self {
            is_valid: errors.is_empty(),
            score: score(&errors, &warnings),
            errors,
            warnings,
            field_validations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity, weight: Option<u32>) -> ValidationIssue {
        ValidationIssue::new("f", "m", severity, weight)
    }

    #[test]
    fn test_score_formula() {
        let errors = vec![issue(Severity::Critical, Some(25)), issue(Severity::High, None)];
        let warnings = vec![
            issue(Severity::High, None),
            issue(Severity::Medium, None),
            issue(Severity::Low, None),
        ];
        // 100 - (25 + 20) - (5 + 3 + 1)
        assert_eq!(score(&errors, &warnings), 46);
    }

    #[test]
    fn test_default_error_weights() {
        assert_eq!(issue(Severity::Critical, None).error_weight(), 30);
        assert_eq!(issue(Severity::High, None).error_weight(), 20);
        assert_eq!(issue(Severity::Medium, None).error_weight(), 10);
        assert_eq!(issue(Severity::Low, None).error_weight(), 10);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let errors = vec![issue(Severity::Critical, None); 5];
        assert_eq!(score(&errors, &[]), 0);
    }

    #[test]
    fn test_score_never_increases_as_issues_accumulate() {
        let all = [
            issue(Severity::Low, None),
            issue(Severity::Critical, Some(15)),
            issue(Severity::Medium, None),
            issue(Severity::High, None),
        ];
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut last = score(&errors, &warnings);
        for (i, item) in all.iter().cycle().take(20).enumerate() {
            if i % 2 == 0 {
                errors.push(item.clone());
            } else {
                warnings.push(item.clone());
            }
            let next = score(&errors, &warnings);
            assert!(next <= last);
            assert!(next <= 100);
            last = next;
        }
    }

    #[test]
    fn test_valid_iff_no_errors() {
        let only_warnings =
            ValidationResult::from_issues(vec![], vec![issue(Severity::High, None)], Default::default());
        assert!(only_warnings.is_valid);
        assert_eq!(only_warnings.score, 95);

        let with_error =
            ValidationResult::from_issues(vec![issue(Severity::Low, None)], vec![], Default::default());
        assert!(!with_error.is_valid);
    }
}
