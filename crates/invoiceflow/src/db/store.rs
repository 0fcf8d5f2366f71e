//! Async persistence seam used by the pipeline and service layer.

use async_trait::async_trait;

use super::{activity_repo, invoice_repo, rule_repo};
use super::{ActivityEntry, Database, DatabaseError, DuplicateQuery};
use crate::invoice::InvoiceRecord;
use crate::validation::ValidationRule;

/// Storage operations the processing core depends on.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), DatabaseError>;

    async fn load(&self, id: &str) -> Result<Option<InvoiceRecord>, DatabaseError>;

    /// Persists the full record. Fails with `NotFound` for unknown ids.
    async fn save(&self, record: &InvoiceRecord) -> Result<(), DatabaseError>;

    async fn find_duplicate(
        &self,
        query: &DuplicateQuery,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;

    /// Appends to the activity log. Failures are logged, never returned.
    async fn log_activity(&self, entry: ActivityEntry);

    async fn load_rules(&self) -> Result<Vec<ValidationRule>, DatabaseError>;
}

/// `InvoiceStore` backed by the SQLite `Database`.
#[derive(Clone)]
pub struct SqliteInvoiceStore {
    db: Database,
}

impl SqliteInvoiceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

#[async_trait]
impl InvoiceStore for SqliteInvoiceStore {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), DatabaseError> {
        let record = record.clone();
        self.blocking(move |db| invoice_repo::insert(db, &record)).await
    }

    async fn load(&self, id: &str) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let id = id.to_string();
        self.blocking(move |db| invoice_repo::find_by_id(db, &id)).await
    }

    async fn save(&self, record: &InvoiceRecord) -> Result<(), DatabaseError> {
        let record = record.clone();
        self.blocking(move |db| invoice_repo::update(db, &record)).await
    }

    async fn find_duplicate(
        &self,
        query: &DuplicateQuery,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let query = query.clone();
        self.blocking(move |db| invoice_repo::find_duplicate(db, &query))
            .await
    }

    async fn log_activity(&self, entry: ActivityEntry) {
        let action = entry.action.clone();
        let invoice_id = entry.invoice_id.clone();
        if let Err(e) = self
            .blocking(move |db| activity_repo::insert(db, &entry))
            .await
        {
            log::warn!(
                "Failed to record activity '{}' for invoice {}: {}",
                action,
                invoice_id,
                e
            );
        }
    }

    async fn load_rules(&self) -> Result<Vec<ValidationRule>, DatabaseError> {
        self.blocking(rule_repo::list).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::NewInvoice;
    use chrono::Utc;
    use serde_json::json;

    fn store() -> SqliteInvoiceStore {
        SqliteInvoiceStore::new(Database::open_in_memory().unwrap())
    }

    fn record() -> InvoiceRecord {
        InvoiceRecord::new(
            NewInvoice {
                owner_id: "user-1".to_string(),
                original_filename: "scan.png".to_string(),
                storage_path: "/tmp/scan.png".into(),
                file_size: 10,
                mime_type: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_load_save() {
        let store = store();
        let mut rec = record();
        store.insert(&rec).await.unwrap();

        rec.start_processing(Utc::now()).unwrap();
        store.save(&rec).await.unwrap();

        let loaded = store.load(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), rec.status());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_unknown_is_not_found() {
        let store = store();
        let rec = record();
        assert!(matches!(
            store.save(&rec).await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_log_activity_persists() {
        let store = store();
        store
            .log_activity(ActivityEntry::new("inv-1", "approved", Some("bob"), json!({})))
            .await;
        let entries = activity_repo::list_for_invoice(store.database(), "inv-1").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_load_rules_empty() {
        assert!(store().load_rules().await.unwrap().is_empty());
    }
}
