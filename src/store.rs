//! The `RecordStore` trait and its backends.
//!
//! Records are append-only: every ingestion run inserts a new row, and the
//! only mutation ever issued is a verification-status update. "No record
//! yet" is a normal state, so lookups return `Ok(None)` rather than an error.

use crate::error::StoreError;
use crate::record::{CanonicalIdentityFields, IdentityRecord, NewIdentityRecord, VerificationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Abstraction over the identity-record table.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one record at `pending` in a single atomic write; returns the stored row.
    async fn insert(&self, record: NewIdentityRecord) -> Result<IdentityRecord, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<IdentityRecord>, StoreError>;

    /// The record with the highest id, if any.
    async fn get_latest(&self) -> Result<Option<IdentityRecord>, StoreError>;

    /// Set the verification status. [`StoreError::NotFound`] for an unknown id.
    async fn update_status(&self, id: i64, status: VerificationStatus) -> Result<(), StoreError>;
}

// ─── Memory ──────────────────────────────────────────────────────────────────

/// Process-local store; ids start at 1.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: Mutex<Vec<IdentityRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: NewIdentityRecord) -> Result<IdentityRecord, StoreError> {
        let mut rows = self.rows.lock().await;
        let id = rows.last().map_or(1, |r| r.id + 1);
        let row = IdentityRecord::from_insert(id, record, Utc::now());
        rows.push(row.clone());
        Ok(row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.rows.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn get_latest(&self) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.rows.lock().await.iter().max_by_key(|r| r.id).cloned())
    }

    async fn update_status(&self, id: i64, status: VerificationStatus) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.verification_status = status;
        Ok(())
    }
}

// ─── SQLite ──────────────────────────────────────────────────────────────────

/// Schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS identity_records (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name              TEXT,
    last_name               TEXT,
    nationality             TEXT,
    document_number         TEXT,
    date_of_birth           TEXT,
    sex                     TEXT,
    expiry_date             TEXT,
    issuing_country         TEXT,
    machine_readable_line_1 TEXT,
    machine_readable_line_2 TEXT,
    document_scan_url       TEXT,
    face_photo_url          TEXT,
    signature_url           TEXT,
    selfie_url              TEXT,
    verification_status     TEXT NOT NULL DEFAULT 'pending'
        CHECK (verification_status IN ('pending', 'verified', 'rejected')),
    submitted_by            TEXT,
    created_at              TEXT NOT NULL
);

PRAGMA user_version = 1;
";

const COLUMNS: &str = "id, first_name, last_name, nationality, document_number, date_of_birth, \
sex, expiry_date, issuing_country, machine_readable_line_1, machine_readable_line_2, \
document_scan_url, face_photo_url, signature_url, selfie_url, verification_status, \
submitted_by, created_at";

/// Row as read from SQLite, before status and timestamp are parsed.
struct RawRecord {
    id: i64,
    fields: CanonicalIdentityFields,
    document_scan_url: Option<String>,
    face_photo_url: Option<String>,
    signature_url: Option<String>,
    selfie_url: Option<String>,
    verification_status: String,
    submitted_by: Option<String>,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            fields: CanonicalIdentityFields {
                first_name: row.get(1)?,
                last_name: row.get(2)?,
                nationality: row.get(3)?,
                document_number: row.get(4)?,
                date_of_birth: row.get(5)?,
                sex: row.get(6)?,
                expiry_date: row.get(7)?,
                issuing_country: row.get(8)?,
                machine_readable_line_1: row.get(9)?,
                machine_readable_line_2: row.get(10)?,
            },
            document_scan_url: row.get(11)?,
            face_photo_url: row.get(12)?,
            signature_url: row.get(13)?,
            selfie_url: row.get(14)?,
            verification_status: row.get(15)?,
            submitted_by: row.get(16)?,
            created_at: row.get(17)?,
        })
    }

    fn decode(self) -> Result<IdentityRecord, StoreError> {
        let verification_status = self
            .verification_status
            .parse::<VerificationStatus>()
            .map_err(StoreError::Corrupt)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StoreError::Corrupt(format!("created_at '{}': {e}", self.created_at)))?
            .with_timezone(&Utc);
        Ok(IdentityRecord {
            id: self.id,
            fields: self.fields,
            document_scan_url: self.document_scan_url,
            face_photo_url: self.face_photo_url,
            signature_url: self.signature_url,
            selfie_url: self.selfie_url,
            verification_status,
            submitted_by: self.submitted_by,
            created_at,
        })
    }
}

/// A record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteRecordStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_one(&self, sql: String, id: Option<i64>) -> Result<Option<IdentityRecord>, StoreError> {
        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let row = match id {
                    Some(id) => stmt
                        .query_row(rusqlite::params![id], RawRecord::from_row)
                        .optional()?,
                    None => stmt.query_row([], RawRecord::from_row).optional()?,
                };
                Ok(row)
            })
            .await?;
        raw.map(RawRecord::decode).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, record: NewIdentityRecord) -> Result<IdentityRecord, StoreError> {
        let created_at = Utc::now();
        let created = created_at.to_rfc3339();
        let row = record.clone();

        let id = self
            .conn
            .call(move |conn| {
                let f = &row.fields;
                conn.execute(
                    "INSERT INTO identity_records (
                        first_name, last_name, nationality, document_number, date_of_birth,
                        sex, expiry_date, issuing_country, machine_readable_line_1,
                        machine_readable_line_2, document_scan_url, face_photo_url,
                        signature_url, selfie_url, verification_status, submitted_by, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'pending', ?15, ?16)",
                    rusqlite::params![
                        f.first_name,
                        f.last_name,
                        f.nationality,
                        f.document_number,
                        f.date_of_birth,
                        f.sex,
                        f.expiry_date,
                        f.issuing_country,
                        f.machine_readable_line_1,
                        f.machine_readable_line_2,
                        row.document_scan_url,
                        row.face_photo_url,
                        row.signature_url,
                        row.selfie_url,
                        row.submitted_by,
                        created,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        info!("Inserted identity record {}", id);
        Ok(IdentityRecord::from_insert(id, record, created_at))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<IdentityRecord>, StoreError> {
        self.query_one(
            format!("SELECT {COLUMNS} FROM identity_records WHERE id = ?1"),
            Some(id),
        )
        .await
    }

    async fn get_latest(&self) -> Result<Option<IdentityRecord>, StoreError> {
        self.query_one(
            format!("SELECT {COLUMNS} FROM identity_records ORDER BY id DESC LIMIT 1"),
            None,
        )
        .await
    }

    async fn update_status(&self, id: i64, status: VerificationStatus) -> Result<(), StoreError> {
        let value = status.as_str();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE identity_records SET verification_status = ?1 WHERE id = ?2",
                    rusqlite::params![value, id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!("Record {} → {}", id, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(name: &str) -> NewIdentityRecord {
        NewIdentityRecord {
            fields: CanonicalIdentityFields {
                first_name: Some(name.to_string()),
                document_number: Some("X1".into()),
                ..Default::default()
            },
            document_scan_url: Some(format!("https://cdn/{name}.jpg")),
            face_photo_url: None,
            signature_url: None,
            selfie_url: None,
            submitted_by: Some("guest-1".into()),
        }
    }

    async fn exercise(store: &dyn RecordStore) {
        assert!(store.get_latest().await.unwrap().is_none());
        assert!(store.get_by_id(1).await.unwrap().is_none());

        let a = store.insert(new_record("Jane")).await.unwrap();
        let b = store.insert(new_record("John")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.verification_status, VerificationStatus::Pending);

        let latest = store.get_latest().await.unwrap().unwrap();
        assert_eq!(latest.id, b.id);
        assert_eq!(latest.fields.first_name.as_deref(), Some("John"));
        assert!(latest.face_photo_url.is_none());

        store
            .update_status(a.id, VerificationStatus::Verified)
            .await
            .unwrap();
        let fetched = store.get_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(fetched.verification_status, VerificationStatus::Verified);
        assert_eq!(fetched.document_scan_url.as_deref(), Some("https://cdn/Jane.jpg"));
        assert_eq!(fetched.submitted_by.as_deref(), Some("guest-1"));

        assert!(matches!(
            store.update_status(999, VerificationStatus::Rejected).await,
            Err(StoreError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryRecordStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise(&SqliteRecordStore::open_in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let id = {
            let store = SqliteRecordStore::open(&path).await.unwrap();
            store.insert(new_record("Jane")).await.unwrap().id
        };
        let store = SqliteRecordStore::open(&path).await.unwrap();
        let record = store.get_latest().await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.fields.document_number.as_deref(), Some("X1"));
    }
}
