//! `SQLite`-backed implementation of [`CheckpointStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Paths are stored as
//! raw bytes so names that are not valid UTF-8 reload unchanged.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use filerelay_types::{path_from_bytes, path_to_bytes, ItemKey, StageId};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// Idempotent DDL for the checkpoint table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS checkpoint_items (
    producer TEXT NOT NULL,
    stage TEXT NOT NULL,
    path BLOB NOT NULL,
    size INTEGER NOT NULL,
    mtime TEXT NOT NULL,
    PRIMARY KEY (producer, stage, path, size, mtime)
);
";

/// `SQLite`-backed checkpoint storage.
///
/// Create with [`SqliteCheckpointStore::open`] for file-backed persistence
/// or [`SqliteCheckpointStore::in_memory`] for tests.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteCheckpointStore {
    /// Open or create a checkpoint database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: ":memory:".to_string(),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn format_mtime(mtime: &DateTime<Utc>) -> String {
        mtime.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn parse_mtime(raw: &str) -> error::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StateError::Timestamp(raw.to_string()))
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, stage: &StageId) -> error::Result<HashSet<ItemKey>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT path, size, mtime FROM checkpoint_items \
             WHERE producer = ?1 AND stage = ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![stage.producer(), stage.stage()],
            |row| {
                // Rows written before paths became blobs hold TEXT.
                let path = match row.get_ref(0)? {
                    ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
                    other => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            0,
                            "path".to_string(),
                            other.data_type(),
                        ))
                    }
                };
                let size: i64 = row.get(1)?;
                let mtime: String = row.get(2)?;
                Ok((path, size, mtime))
            },
        )?;

        let mut keys = HashSet::new();
        for row in rows {
            let (path, size, mtime) = row?;
            keys.insert(ItemKey {
                path: path_from_bytes(path),
                size: u64::try_from(size).unwrap_or_default(),
                mtime: Self::parse_mtime(&mtime)?,
            });
        }
        Ok(keys)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn save(&self, stage: &StageId, keys: &HashSet<ItemKey>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM checkpoint_items WHERE producer = ?1 AND stage = ?2",
            rusqlite::params![stage.producer(), stage.stage()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO checkpoint_items (producer, stage, path, size, mtime) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for key in keys {
                stmt.execute(rusqlite::params![
                    stage.producer(),
                    stage.stage(),
                    path_to_bytes(&key.path),
                    key.size as i64,
                    Self::format_mtime(&key.mtime),
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(stage = %stage, items = keys.len(), "checkpoint written");
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
