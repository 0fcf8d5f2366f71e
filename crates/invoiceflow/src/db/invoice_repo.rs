//! Invoice repository: CRUD and duplicate lookup for the `invoices` table.
//!
//! Queried columns are stored natively; nested structures (extracted data,
//! confidence, validation, audit trails) are JSON text columns.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::invoice::{InvoiceRecord, InvoiceStatus};

/// A raw invoice row from the database.
#[derive(Debug, Clone)]
struct InvoiceRow {
    id: String,
    owner_id: String,
    original_filename: String,
    storage_path: String,
    file_size: i64,
    mime_type: Option<String>,
    content_hash: Option<String>,
    status: String,
    processing_started_at: Option<String>,
    processing_completed_at: Option<String>,
    processing_time_ms: Option<i64>,
    retry_count: i64,
    error_message: Option<String>,
    error_details: Option<String>,
    processing_options: Option<String>,
    invoice_number: Option<String>,
    invoice_number_key: Option<String>,
    invoice_date: Option<String>,
    total_amount: Option<f64>,
    data: String,
    raw_text: Option<String>,
    confidence: Option<String>,
    validation: Option<String>,
    is_duplicate: bool,
    duplicate_of: Option<String>,
    duplicate_reason: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    rejection_reason: Option<String>,
    corrections: String,
    exports: String,
    is_deleted: bool,
    deleted_at: Option<String>,
    deleted_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InvoiceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            original_filename: row.get("original_filename")?,
            storage_path: row.get("storage_path")?,
            file_size: row.get("file_size")?,
            mime_type: row.get("mime_type")?,
            content_hash: row.get("content_hash")?,
            status: row.get("status")?,
            processing_started_at: row.get("processing_started_at")?,
            processing_completed_at: row.get("processing_completed_at")?,
            processing_time_ms: row.get("processing_time_ms")?,
            retry_count: row.get("retry_count")?,
            error_message: row.get("error_message")?,
            error_details: row.get("error_details")?,
            processing_options: row.get("processing_options")?,
            invoice_number: row.get("invoice_number")?,
            invoice_number_key: row.get("invoice_number_key")?,
            invoice_date: row.get("invoice_date")?,
            total_amount: row.get("total_amount")?,
            data: row.get("data")?,
            raw_text: row.get("raw_text")?,
            confidence: row.get("confidence")?,
            validation: row.get("validation")?,
            is_duplicate: row.get("is_duplicate")?,
            duplicate_of: row.get("duplicate_of")?,
            duplicate_reason: row.get("duplicate_reason")?,
            reviewed_by: row.get("reviewed_by")?,
            reviewed_at: row.get("reviewed_at")?,
            rejection_reason: row.get("rejection_reason")?,
            corrections: row.get("corrections")?,
            exports: row.get("exports")?,
            is_deleted: row.get("is_deleted")?,
            deleted_at: row.get("deleted_at")?,
            deleted_by: row.get("deleted_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn from_record(r: &InvoiceRecord) -> Result<Self, DatabaseError> {
        let ts = |v: &Option<DateTime<Utc>>| v.as_ref().map(format_timestamp);

        Ok(Self {
            id: r.id.clone(),
            owner_id: r.owner_id.clone(),
            original_filename: r.original_filename.clone(),
            storage_path: r.storage_path.clone(),
            file_size: r.file_size as i64,
            mime_type: r.mime_type.clone(),
            content_hash: r.content_hash.clone(),
            status: r.status().as_str().to_string(),
            processing_started_at: ts(&r.processing_started_at),
            processing_completed_at: ts(&r.processing_completed_at),
            processing_time_ms: r.processing_time_ms,
            retry_count: r.retry_count as i64,
            error_message: r.error_message.clone(),
            error_details: to_json_column(&r.error_details)?,
            processing_options: to_json_column(&r.processing_options)?,
            invoice_number: r.data.invoice_number.as_ref().map(|n| n.trim().to_string()),
            invoice_number_key: r.data.invoice_number.as_deref().map(invoice_number_key),
            invoice_date: r
                .data
                .invoice_date_parsed()
                .map(|d| d.format("%Y-%m-%d").to_string()),
            total_amount: r.data.total_value(),
            data: serde_json::to_string(&r.data)?,
            raw_text: r.raw_text.clone(),
            confidence: to_json_column(&r.confidence)?,
            validation: to_json_column(&r.validation)?,
            is_duplicate: r.is_duplicate,
            duplicate_of: r.duplicate_of.clone(),
            duplicate_reason: r.duplicate_reason.clone(),
            reviewed_by: r.reviewed_by.clone(),
            reviewed_at: ts(&r.reviewed_at),
            rejection_reason: r.rejection_reason.clone(),
            corrections: serde_json::to_string(&r.corrections)?,
            exports: serde_json::to_string(&r.exports)?,
            is_deleted: r.is_deleted,
            deleted_at: ts(&r.deleted_at),
            deleted_by: r.deleted_by.clone(),
            created_at: format_timestamp(&r.created_at),
            updated_at: format_timestamp(&r.updated_at),
        })
    }

    fn into_record(self) -> Result<InvoiceRecord, DatabaseError> {
        let id = self.id.clone();
        let ts = |v: Option<String>| v.map(|s| parse_timestamp(&id, &s)).transpose();
        let status: InvoiceStatus = self.status.parse().map_err(|e| DatabaseError::InvalidRow {
            id: id.clone(),
            reason: format!("{}", e),
        })?;
        Ok(InvoiceRecord {
            status,
            processing_started_at: ts(self.processing_started_at)?,
            processing_completed_at: ts(self.processing_completed_at)?,
            processing_time_ms: self.processing_time_ms,
            retry_count: self.retry_count.max(0) as u32,
            error_message: self.error_message,
            error_details: from_json_column(self.error_details)?,
            processing_options: from_json_column(self.processing_options)?,
            data: serde_json::from_str(&self.data)?,
            raw_text: self.raw_text,
            confidence: from_json_column(self.confidence)?,
            validation: from_json_column(self.validation)?,
            is_duplicate: self.is_duplicate,
            duplicate_of: self.duplicate_of,
            duplicate_reason: self.duplicate_reason,
            reviewed_by: self.reviewed_by,
            reviewed_at: ts(self.reviewed_at)?,
            rejection_reason: self.rejection_reason,
            corrections: serde_json::from_str(&self.corrections)?,
            exports: serde_json::from_str(&self.exports)?,
            is_deleted: self.is_deleted,
            deleted_at: ts(self.deleted_at)?,
            deleted_by: self.deleted_by,
            created_at: parse_timestamp(&id, &self.created_at)?,
            updated_at: parse_timestamp(&id, &self.updated_at)?,
            id: self.id,
            owner_id: self.owner_id,
            original_filename: self.original_filename,
            storage_path: self.storage_path,
            file_size: self.file_size.max(0) as u64,
            mime_type: self.mime_type,
            content_hash: self.content_hash,
        })
    }
}

/// Case-folded lookup key for duplicate matching. Folds non-ASCII letters
/// too, which SQLite's `lower()` does not.
pub fn invoice_number_key(number: &str) -> String {
    number.trim().to_lowercase()
}

fn to_json_column<T: Serialize>(value: &Option<T>) -> Result<Option<String>, DatabaseError> {
    Ok(match value {
        Some(inner) => Some(serde_json::to_string(inner)?),
        None => None,
    })
}

fn from_json_column<T: DeserializeOwned>(value: Option<String>) -> Result<Option<T>, DatabaseError> {
    Ok(match value {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    })
}

/// Criteria for an accepted invoice that the incoming one may repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateQuery {
    pub invoice_number: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub amount_min: f64,
    pub amount_max: f64,
    pub exclude_id: Option<String>,
}

/// Inserts a new invoice row.
pub fn insert(db: &Database, record: &InvoiceRecord) -> Result<(), DatabaseError> {
    let row = InvoiceRow::from_record(record)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO invoices (id, owner_id, original_filename, storage_path, file_size,
             mime_type, content_hash, status, processing_started_at, processing_completed_at,
             processing_time_ms, retry_count, error_message, error_details, invoice_number,
             invoice_date, total_amount, data, raw_text, confidence, validation, is_duplicate,
             duplicate_of, duplicate_reason, reviewed_by, reviewed_at, rejection_reason,
             corrections, exports, is_deleted, deleted_at, deleted_by, created_at, updated_at,
             invoice_number_key, processing_options)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34,
             ?35, ?36)",
            params![
                row.id,
                row.owner_id,
                row.original_filename,
                row.storage_path,
                row.file_size,
                row.mime_type,
                row.content_hash,
                row.status,
                row.processing_started_at,
                row.processing_completed_at,
                row.processing_time_ms,
                row.retry_count,
                row.error_message,
                row.error_details,
                row.invoice_number,
                row.invoice_date,
                row.total_amount,
                row.data,
                row.raw_text,
                row.confidence,
                row.validation,
                row.is_duplicate,
                row.duplicate_of,
                row.duplicate_reason,
                row.reviewed_by,
                row.reviewed_at,
                row.rejection_reason,
                row.corrections,
                row.exports,
                row.is_deleted,
                row.deleted_at,
                row.deleted_by,
                row.created_at,
                row.updated_at,
                row.invoice_number_key,
                row.processing_options,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites an existing invoice row. `id`, `owner_id` and `created_at` are kept.
pub fn update(db: &Database, record: &InvoiceRecord) -> Result<(), DatabaseError> {
    let row = InvoiceRow::from_record(record)?;
    let changed = db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE invoices SET original_filename=?2, storage_path=?3, file_size=?4,
             mime_type=?5, content_hash=?6, status=?7, processing_started_at=?8,
             processing_completed_at=?9, processing_time_ms=?10, retry_count=?11,
             error_message=?12, error_details=?13, invoice_number=?14, invoice_date=?15,
             total_amount=?16, data=?17, raw_text=?18, confidence=?19, validation=?20,
             is_duplicate=?21, duplicate_of=?22, duplicate_reason=?23, reviewed_by=?24,
             reviewed_at=?25, rejection_reason=?26, corrections=?27, exports=?28,
             is_deleted=?29, deleted_at=?30, deleted_by=?31, updated_at=?32,
             invoice_number_key=?33, processing_options=?34
             WHERE id=?1",
            params![
                row.id,
                row.original_filename,
                row.storage_path,
                row.file_size,
                row.mime_type,
                row.content_hash,
                row.status,
                row.processing_started_at,
                row.processing_completed_at,
                row.processing_time_ms,
                row.retry_count,
                row.error_message,
                row.error_details,
                row.invoice_number,
                row.invoice_date,
                row.total_amount,
                row.data,
                row.raw_text,
                row.confidence,
                row.validation,
                row.is_duplicate,
                row.duplicate_of,
                row.duplicate_reason,
                row.reviewed_by,
                row.reviewed_at,
                row.rejection_reason,
                row.corrections,
                row.exports,
                row.is_deleted,
                row.deleted_at,
                row.deleted_by,
                row.updated_at,
                row.invoice_number_key,
                row.processing_options,
            ],
        )?)
    })?;

    if changed == 0 {
        return Err(DatabaseError::NotFound(record.id.clone()));
    }
    Ok(())
}

/// Finds an invoice by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<InvoiceRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM invoices WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], InvoiceRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(InvoiceRow::into_record).transpose()
}

/// Most recently created accepted, non-deleted invoice matching `query`.
pub fn find_duplicate(
    db: &Database,
    query: &DuplicateQuery,
) -> Result<Option<InvoiceRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM invoices
             WHERE is_deleted = 0
               AND status IN ('processed', 'validated', 'approved')
               AND id != ?1
               AND invoice_number_key = ?2
               AND invoice_date BETWEEN ?3 AND ?4
               AND total_amount BETWEEN ?5 AND ?6
             ORDER BY created_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            params![
                query.exclude_id.as_deref().unwrap_or(""),
                invoice_number_key(&query.invoice_number),
                query.date_from.format("%Y-%m-%d").to_string(),
                query.date_to.format("%Y-%m-%d").to_string(),
                query.amount_min,
                query.amount_max,
            ],
            InvoiceRow::from_row,
        )?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(InvoiceRow::into_record).transpose()
}

/// Counts invoices by status.
pub fn count_by_status(db: &Database, status: InvoiceStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM invoices WHERE status = ?1 AND is_deleted = 0",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
