//! Validation rule repository for the `validation_rules` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::validation::{AutoCorrect, RuleTier, ValidationRule};

fn rule_from_row(row: &Row<'_>) -> Result<(ValidationRule, String, String), rusqlite::Error> {
    let min_length: Option<i64> = row.get("min_length")?;
    let max_length: Option<i64> = row.get("max_length")?;
    Ok((
        ValidationRule {
            id: row.get("id")?,
            field: row.get("field")?,
            tier: RuleTier::Optional,
            pattern: row.get("pattern")?,
            min_length: min_length.map(|v| v.max(0) as usize),
            max_length: max_length.map(|v| v.max(0) as usize),
            min_value: row.get("min_value")?,
            max_value: row.get("max_value")?,
            required: row.get("required")?,
            auto_correct: AutoCorrect::None,
            message: row.get("message")?,
            enabled: row.get("enabled")?,
        },
        row.get("tier")?,
        row.get("auto_correct")?,
    ))
}

/// Inserts or replaces a rule.
pub fn upsert(db: &Database, rule: &ValidationRule) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO validation_rules (id, field, tier, pattern, min_length, max_length,
             min_value, max_value, required, auto_correct, message, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET field=excluded.field, tier=excluded.tier,
             pattern=excluded.pattern, min_length=excluded.min_length,
             max_length=excluded.max_length, min_value=excluded.min_value,
             max_value=excluded.max_value, required=excluded.required,
             auto_correct=excluded.auto_correct, message=excluded.message,
             enabled=excluded.enabled, updated_at=datetime('now')",
            params![
                rule.id,
                rule.field,
                rule.tier.as_str(),
                rule.pattern,
                rule.min_length.map(|v| v as i64),
                rule.max_length.map(|v| v as i64),
                rule.min_value,
                rule.max_value,
                rule.required,
                rule.auto_correct.as_str(),
                rule.message,
                rule.enabled,
            ],
        )?;
        Ok(())
    })
}

/// Lists all rules, enabled or not, ordered by id.
pub fn list(db: &Database) -> Result<Vec<ValidationRule>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM validation_rules ORDER BY id")?;
        let rows = stmt
            .query_map([], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter()
        .map(|(mut rule, tier, auto_correct)| {
            rule.tier = RuleTier::parse(&tier).ok_or_else(|| DatabaseError::InvalidRow {
                id: rule.id.clone(),
                reason: format!("unknown tier '{}'", tier),
            })?;
            rule.auto_correct =
                AutoCorrect::parse(&auto_correct).ok_or_else(|| DatabaseError::InvalidRow {
                    id: rule.id.clone(),
                    reason: format!("unknown auto_correct strategy '{}'", auto_correct),
                })?;
            Ok(rule)
        })
        .collect()
}

/// Deletes a rule. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM validation_rules WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> ValidationRule {
        ValidationRule {
            pattern: Some(r"^INV-\d+$".to_string()),
            min_length: Some(4),
            auto_correct: AutoCorrect::Uppercase,
            ..ValidationRule::new(id, "invoice_number", RuleTier::Critical)
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &rule("b")).unwrap();
        upsert(&db, &rule("a")).unwrap();

        let rules = list(&db).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "a");
        assert_eq!(rules[0], rule("a"));
    }

    #[test]
    fn test_upsert_replaces() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &rule("a")).unwrap();
        let mut changed = rule("a");
        changed.tier = RuleTier::Optional;
        changed.enabled = false;
        upsert(&db, &changed).unwrap();

        let rules = list(&db).unwrap();
        assert_eq!(rules, vec![changed]);
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &rule("a")).unwrap();
        assert!(delete(&db, "a").unwrap());
        assert!(!delete(&db, "a").unwrap());
        assert!(list(&db).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_strategy_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO validation_rules (id, field, tier, auto_correct) VALUES ('x', 'tax', 'optional', 'shout')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(matches!(list(&db), Err(DatabaseError::InvalidRow { .. })));
    }
}
