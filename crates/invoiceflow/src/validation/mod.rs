//! Validation and scoring of extracted invoice data.

pub mod engine;
pub mod result;
pub mod rules;

pub use engine::{ValidationEngine, REQUIRED_FIELD_WEIGHTS};
pub use result::{FieldValidation, Severity, ValidationIssue, ValidationResult};
pub use rules::{AutoCorrect, CompiledRule, RuleCache, RuleError, RuleSet, RuleTier, ValidationRule};
