//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_invoices_table",
        sql: include_str!("sql/001_create_invoices.sql"),
    },
    Migration {
        version: 2,
        description: "create_validation_rules_table",
        sql: include_str!("sql/002_create_validation_rules.sql"),
    },
    Migration {
        version: 3,
        description: "create_activity_log_table",
        sql: include_str!("sql/003_create_activity_log.sql"),
    },
    Migration {
        version: 4,
        description: "add_invoice_number_key",
        sql: include_str!("sql/004_add_invoice_number_key.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_invoices_table_has_query_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let columns = table_columns(&conn, "invoices");
        for expected in [
            "status",
            "invoice_number",
            "invoice_number_key",
            "invoice_date",
            "total_amount",
            "is_deleted",
            "processing_options",
        ] {
            assert!(columns.iter().any(|c| c == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_rule_tier_is_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO validation_rules (id, field, tier) VALUES ('r', 'invoice_number', 'urgent')",
            [],
        );
        assert!(bad.is_err());
    }
}
