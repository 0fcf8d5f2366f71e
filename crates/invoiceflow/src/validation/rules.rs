//! Custom validation rules and the in-process rule cache.

use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invoice::fields::{parse_plain_number, FIELD_NAMES};

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule '{rule_id}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule '{rule_id}' targets unknown field '{field}'")]
    UnknownField { rule_id: String, field: String },

    #[error("Rule '{rule_id}' has inconsistent bounds: {reason}")]
    InvalidBounds { rule_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    Critical,
    Important,
    Optional,
}

impl RuleTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTier::Critical => "critical",
            RuleTier::Important => "important",
            RuleTier::Optional => "optional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(RuleTier::Critical),
            "important" => Some(RuleTier::Important),
            "optional" => Some(RuleTier::Optional),
            _ => None,
        }
    }
}

/// How a failing value could be repaired. Used for suggestions only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCorrect {
    #[default]
    None,
    Trim,
    Uppercase,
    Lowercase,
    DigitsOnly,
    Numeric,
}

impl AutoCorrect {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoCorrect::None => "none",
            AutoCorrect::Trim => "trim",
            AutoCorrect::Uppercase => "uppercase",
            AutoCorrect::Lowercase => "lowercase",
            AutoCorrect::DigitsOnly => "digits_only",
            AutoCorrect::Numeric => "numeric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "" => Some(AutoCorrect::None),
            "trim" => Some(AutoCorrect::Trim),
            "uppercase" => Some(AutoCorrect::Uppercase),
            "lowercase" => Some(AutoCorrect::Lowercase),
            "digits_only" => Some(AutoCorrect::DigitsOnly),
            "numeric" => Some(AutoCorrect::Numeric),
            _ => None,
        }
    }

    /// The corrected value, or `None` when the strategy does not apply.
    pub fn apply(&self, value: &str) -> Option<String> {
        let corrected = match self {
            AutoCorrect::None => return None,
            AutoCorrect::Trim => value.trim().to_string(),
            AutoCorrect::Uppercase => value.to_uppercase(),
            AutoCorrect::Lowercase => value.to_lowercase(),
            AutoCorrect::DigitsOnly => value.chars().filter(char::is_ascii_digit).collect(),
            AutoCorrect::Numeric => value
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect(),
        };
        Some(corrected)
    }
}

/// A rule as stored in the `validation_rules` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    pub field: String,
    pub tier: RuleTier,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub auto_correct: AutoCorrect,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ValidationRule {
    pub fn new(id: &str, field: &str, tier: RuleTier) -> Self {
        Self {
            id: id.to_string(),
            field: field.to_string(),
            tier,
            pattern: None,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            required: false,
            auto_correct: AutoCorrect::None,
            message: None,
            enabled: true,
        }
    }
}

/// A rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ValidationRule,
    pattern: Option<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: ValidationRule) -> Result<Self, RuleError> {
        if !FIELD_NAMES.contains(&rule.field.as_str()) {
            return Err(RuleError::UnknownField {
                rule_id: rule.id.clone(),
                field: rule.field.clone(),
            });
        }
        if let (Some(min), Some(max)) = (rule.min_length, rule.max_length) {
            if min > max {
                return Err(RuleError::InvalidBounds {
                    rule_id: rule.id.clone(),
                    reason: format!("min_length {} > max_length {}", min, max),
                });
            }
        }
        if let (Some(min), Some(max)) = (rule.min_value, rule.max_value) {
            if min > max {
                return Err(RuleError::InvalidBounds {
                    rule_id: rule.id.clone(),
                    reason: format!("min_value {} > max_value {}", min, max),
                });
            }
        }

        let pattern = rule
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| RuleError::InvalidPattern {
                rule_id: rule.id.clone(),
                source,
            })?;

        Ok(Self { rule, pattern })
    }

    /// Checks a present value. Returns the failure message, if any.
    pub fn check(&self, value: &str) -> Option<String> {
        let rule = &self.rule;
        let fail = |default: String| Some(rule.message.clone().unwrap_or(default));
        let length = value.trim().chars().count();

        if let Some(min) = rule.min_length {
            if length < min {
                return fail(format!("{} must be at least {} characters", rule.field, min));
            }
        }
        if let Some(max) = rule.max_length {
            if length > max {
                return fail(format!("{} must be at most {} characters", rule.field, max));
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(value) {
                return fail(format!("{} does not match the expected format", rule.field));
            }
        }
        if rule.min_value.is_some() || rule.max_value.is_some() {
            let Some(number) = parse_plain_number(value) else {
                return fail(format!("{} must be numeric", rule.field));
            };
            if rule.min_value.is_some_and(|min| number < min) {
                return fail(format!("{} is below the allowed minimum", rule.field));
            }
            if rule.max_value.is_some_and(|max| number > max) {
                return fail(format!("{} is above the allowed maximum", rule.field));
            }
        }
        None
    }

    pub fn missing_message(&self) -> String {
        self.rule
            .message
            .clone()
            .unwrap_or_else(|| format!("{} is required", self.rule.field))
    }
}

/// An immutable set of compiled, enabled rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compiles every enabled rule; the first bad rule rejects the whole set.
    pub fn compile(rules: Vec<ValidationRule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .filter(|r| r.enabled)
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Holds the active rule set. Readers take a cheap snapshot; reloads swap
/// the whole set at once.
#[derive(Debug, Default)]
pub struct RuleCache {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the stored rules and makes them active.
    pub async fn init(&self, store: &dyn crate::db::InvoiceStore) -> crate::error::Result<usize> {
        let rules = store.load_rules().await?;
        Ok(self.reload(rules)?)
    }

    /// Compiles `rules` and swaps them in. On error the previous set stays
    /// active.
    pub fn reload(&self, rules: Vec<ValidationRule>) -> Result<usize, RuleError> {
        let set = RuleSet::compile(rules)?;
        let count = set.len();
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(set);
        log::info!("Loaded {} validation rules", count);
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Drops all rules.
    pub fn shutdown(&self) {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(RuleSet::default());
    }
}
