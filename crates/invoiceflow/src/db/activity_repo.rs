//! Append-only activity log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use serde_json::Value;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// One audit entry for an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub invoice_id: String,
    pub action: String,
    pub actor: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(invoice_id: &str, action: &str, actor: Option<&str>, details: Value) -> Self {
        Self {
            invoice_id: invoice_id.to_string(),
            action: action.to_string(),
            actor: actor.map(str::to_string),
            details,
            created_at: Utc::now(),
        }
    }
}

struct ActivityRow {
    invoice_id: String,
    action: String,
    actor: Option<String>,
    details: String,
    created_at: String,
}

impl ActivityRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            invoice_id: row.get("invoice_id")?,
            action: row.get("action")?,
            actor: row.get("actor")?,
            details: row.get("details")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_entry(self) -> Result<ActivityEntry, DatabaseError> {
        Ok(ActivityEntry {
            created_at: parse_timestamp(&self.invoice_id, &self.created_at)?,
            details: serde_json::from_str(&self.details)?,
            invoice_id: self.invoice_id,
            action: self.action,
            actor: self.actor,
        })
    }
}

pub fn insert(db: &Database, entry: &ActivityEntry) -> Result<(), DatabaseError> {
    let details = serde_json::to_string(&entry.details)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO activity_log (invoice_id, action, actor, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.invoice_id,
                entry.action,
                entry.actor,
                details,
                format_timestamp(&entry.created_at),
            ],
        )?;
        Ok(())
    })
}

/// Entries for one invoice, oldest first.
pub fn list_for_invoice(db: &Database, invoice_id: &str) -> Result<Vec<ActivityEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT invoice_id, action, actor, details, created_at FROM activity_log
             WHERE invoice_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![invoice_id], ActivityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ActivityRow::into_entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &ActivityEntry::new("inv-1", "uploaded", Some("alice"), json!({}))).unwrap();
        insert(
            &db,
            &ActivityEntry::new("inv-1", "processed", None, json!({"score": 92})),
        )
        .unwrap();
        insert(&db, &ActivityEntry::new("inv-2", "uploaded", None, json!({}))).unwrap();

        let entries = list_for_invoice(&db, "inv-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "uploaded");
        assert_eq!(entries[0].actor.as_deref(), Some("alice"));
        assert_eq!(entries[1].details["score"], 92);
    }

    #[test]
    fn test_unknown_invoice_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(list_for_invoice(&db, "nope").unwrap().is_empty());
    }
}
