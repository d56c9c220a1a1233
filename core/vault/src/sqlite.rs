//! SQLite-backed record store.
//!
//! Sizes are stored as INTEGER, timestamps as Unix milliseconds and
//! identifiers as their canonical text form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::records::{
    AccountKeyRecord, FileFilter, FileRecord, FileState, LocationRecord, RecordStore,
    SecretRecord,
};
use corecloud_common::{Error, FileId, LocationId, OwnerId, Result, SecretId, StoragePath};
use corecloud_crypto::Salt;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    owner TEXT PRIMARY KEY,
    login_salt BLOB NOT NULL,
    login_verifier BLOB NOT NULL,
    master_salt BLOB NOT NULL,
    sealed_master_key BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS locations (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    root TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS secrets (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    label TEXT NOT NULL,
    kind TEXT NOT NULL,
    username TEXT,
    notes TEXT,
    wrapped_dek BLOB NOT NULL,
    wrapped_payload BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL,
    checksum BLOB NOT NULL,
    category TEXT NOT NULL,
    location_id TEXT NOT NULL,
    wrapped_dek BLOB NOT NULL,
    window_size INTEGER NOT NULL,
    state TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_secrets_owner ON secrets(owner);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner, state);
"#;

const FILE_COLUMNS: &str = "id, owner, name, kind, size, checksum, category, location_id, \
                            wrapped_dek, window_size, state, created_at";

const SECRET_COLUMNS: &str =
    "id, owner, label, kind, username, notes, wrapped_dek, wrapped_payload, created_at";

/// Record store persisted in a single SQLite database.
///
/// The connection is shared behind a mutex and only ever locked inside
/// `spawn_blocking`, so no async task waits on it.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Create or open a record database.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;

        info!("Record store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Database("connection poisoned".to_string()))?;
            f(&conn).map_err(db_error)
        })
        .await
        .map_err(|e| Error::Database(format!("database task failed: {}", e)))?
    }
}

fn db_error(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert a column through a fallible parser, reporting failures as
/// conversion errors on that column.
fn column<T, E>(idx: usize, parsed: std::result::Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parsed.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(idx: usize, row: &Row<'_>) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn unsigned(idx: usize, row: &Row<'_>) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn signed(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountKeyRecord> {
    let login_salt: Vec<u8> = row.get(1)?;
    let master_salt: Vec<u8> = row.get(3)?;
    Ok(AccountKeyRecord {
        owner: column(0, OwnerId::new(row.get::<_, String>(0)?))?,
        login_salt: column(1, Salt::from_slice(&login_salt))?,
        login_verifier: row.get(2)?,
        master_salt: column(3, Salt::from_slice(&master_salt))?,
        sealed_master_key: row.get(4)?,
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        id: column(0, row.get::<_, String>(0)?.parse::<LocationId>())?,
        owner: column(1, OwnerId::new(row.get::<_, String>(1)?))?,
        root: column(2, StoragePath::parse(&row.get::<_, String>(2)?))?,
    })
}

fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<SecretRecord> {
    Ok(SecretRecord {
        id: column(0, row.get::<_, String>(0)?.parse::<SecretId>())?,
        owner: column(1, OwnerId::new(row.get::<_, String>(1)?))?,
        label: row.get(2)?,
        kind: column(3, row.get::<_, String>(3)?.parse())?,
        username: row.get(4)?,
        notes: row.get(5)?,
        wrapped_dek: row.get(6)?,
        wrapped_payload: row.get(7)?,
        created_at: timestamp(8, row)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: column(0, row.get::<_, String>(0)?.parse::<FileId>())?,
        owner: column(1, OwnerId::new(row.get::<_, String>(1)?))?,
        name: row.get(2)?,
        kind: row.get(3)?,
        size: unsigned(4, row)?,
        checksum: row.get(5)?,
        category: column(6, row.get::<_, String>(6)?.try_into())?,
        location_id: column(7, row.get::<_, String>(7)?.parse::<LocationId>())?,
        wrapped_dek: row.get(8)?,
        window_size: unsigned(9, row)?,
        state: column(10, row.get::<_, String>(10)?.parse::<FileState>())?,
        created_at: timestamp(11, row)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_account(&self, record: &AccountKeyRecord) -> Result<()> {
        let record = record.clone();
        let owner = record.owner.clone();
        let inserted = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO accounts \
                     (owner, login_salt, login_verifier, master_salt, sealed_master_key) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.owner.as_str(),
                        &record.login_salt.as_bytes()[..],
                        record.login_verifier,
                        &record.master_salt.as_bytes()[..],
                        record.sealed_master_key,
                    ],
                )
            })
            .await?;

        if inserted == 0 {
            return Err(Error::Validation(format!(
                "Account already provisioned: {}",
                owner
            )));
        }
        debug!(owner = %owner, "Account record inserted");
        Ok(())
    }

    async fn find_account(&self, owner: &OwnerId) -> Result<Option<AccountKeyRecord>> {
        let owner = owner.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT owner, login_salt, login_verifier, master_salt, sealed_master_key \
                 FROM accounts WHERE owner = ?1",
                [owner.as_str()],
                account_from_row,
            )
            .optional()
        })
        .await
    }

    async fn insert_location(&self, record: &LocationRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO locations (id, owner, root) VALUES (?1, ?2, ?3)",
                params![
                    record.id.to_string(),
                    record.owner.as_str(),
                    record.root.to_string_path(),
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn find_location(
        &self,
        id: &LocationId,
        owner: &OwnerId,
    ) -> Result<Option<LocationRecord>> {
        let (id, owner) = (id.to_string(), owner.clone());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, owner, root FROM locations WHERE id = ?1 AND owner = ?2",
                params![id, owner.as_str()],
                location_from_row,
            )
            .optional()
        })
        .await
    }

    async fn insert_secret(&self, record: &SecretRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO secrets ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    SECRET_COLUMNS
                ),
                params![
                    record.id.to_string(),
                    record.owner.as_str(),
                    record.label,
                    record.kind.as_str(),
                    record.username,
                    record.notes,
                    record.wrapped_dek,
                    record.wrapped_payload,
                    millis(&record.created_at),
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn find_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<Option<SecretRecord>> {
        let (id, owner) = (id.to_string(), owner.clone());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM secrets WHERE id = ?1 AND owner = ?2",
                    SECRET_COLUMNS
                ),
                params![id, owner.as_str()],
                secret_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_secrets(&self, owner: &OwnerId) -> Result<Vec<SecretRecord>> {
        let owner = owner.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM secrets WHERE owner = ?1 ORDER BY created_at",
                SECRET_COLUMNS
            ))?;
            let rows = stmt.query_map([owner.as_str()], secret_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn delete_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<bool> {
        let (id, owner) = (id.to_string(), owner.clone());
        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM secrets WHERE id = ?1 AND owner = ?2",
                    params![id, owner.as_str()],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn insert_file(&self, record: &FileRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO files ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    FILE_COLUMNS
                ),
                params![
                    record.id.to_string(),
                    record.owner.as_str(),
                    record.name,
                    record.kind,
                    signed(record.size)?,
                    record.checksum,
                    record.category.as_str(),
                    record.location_id.to_string(),
                    record.wrapped_dek,
                    signed(record.window_size)?,
                    record.state.as_str(),
                    millis(&record.created_at),
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn find_file(&self, id: &FileId, owner: &OwnerId) -> Result<Option<FileRecord>> {
        let (id, owner) = (id.to_string(), owner.clone());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM files WHERE id = ?1 AND owner = ?2",
                    FILE_COLUMNS
                ),
                params![id, owner.as_str()],
                file_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_files(&self, owner: &OwnerId, filter: &FileFilter) -> Result<Vec<FileRecord>> {
        let owner = owner.clone();
        let category = filter.category.as_ref().map(|c| c.as_str().to_string());
        let location = filter.location_id.map(|l| l.to_string());
        let kind = filter.kind.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM files \
                 WHERE owner = ?1 AND state = ?2 \
                 AND (?3 IS NULL OR category = ?3) \
                 AND (?4 IS NULL OR location_id = ?4) \
                 AND (?5 IS NULL OR kind = ?5) \
                 ORDER BY created_at",
                FILE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![
                    owner.as_str(),
                    FileState::Committed.as_str(),
                    category,
                    location,
                    kind
                ],
                file_from_row,
            )?;
            rows.collect()
        })
        .await
    }

    async fn mark_file_committed(&self, id: &FileId, owner: &OwnerId) -> Result<()> {
        let (key, owner) = (id.to_string(), owner.clone());
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE files SET state = ?1 WHERE id = ?2 AND owner = ?3 AND state = ?4",
                    params![
                        FileState::Committed.as_str(),
                        key,
                        owner.as_str(),
                        FileState::Pending.as_str()
                    ],
                )
            })
            .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Pending file not found: {}", id)));
        }
        Ok(())
    }

    async fn delete_file(&self, id: &FileId, owner: &OwnerId) -> Result<bool> {
        let (id, owner) = (id.to_string(), owner.clone());
        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM files WHERE id = ?1 AND owner = ?2",
                    params![id, owner.as_str()],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn list_pending_files(&self, before: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let before = millis(&before);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM files WHERE state = ?1 AND created_at < ?2 ORDER BY created_at",
                FILE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![FileState::Pending.as_str(), before],
                file_from_row,
            )?;
            rows.collect()
        })
        .await
    }
}
