//! SQLite checkpoint of the holding area.
//!
//! When enabled, every capture writes the whole [`PersistenceStore`] to a
//! small SQLite table so a host that restarts mid-transition can restore the
//! records it was about to rehydrate:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS transit_records (
//!     occupant_id TEXT PRIMARY KEY,
//!     position    INTEGER NOT NULL,
//!     data        BLOB NOT NULL,
//!     updated_at  TEXT NOT NULL,
//!     checksum    TEXT
//! );
//! ```
//!
//! Records are JSON inside a BLOB so the schema survives record changes.
//! Rows whose CRC-32 no longer matches are skipped on load.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{Result, StashError};
use crate::persistence::{PersistenceRecord, PersistenceStore};
use crate::types::OccupantId;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS transit_records (
    occupant_id TEXT PRIMARY KEY,
    position    INTEGER NOT NULL,
    data        BLOB NOT NULL,
    updated_at  TEXT NOT NULL,
    checksum    TEXT
);";

// ---------------------------------------------------------------------------
// CRC-32
// ---------------------------------------------------------------------------

fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309), bitwise.
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// TransitJournal
// ---------------------------------------------------------------------------

/// Open SQLite journal of in-flight persistence records.
pub struct TransitJournal {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for TransitJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitJournal")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransitJournal {
    /// Open (or create) the journal at `path`.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "Transit journal opened");
        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory journal.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Replace the journal contents with `store`.
    ///
    /// # Errors
    /// Returns [`StashError::Serialization`] if a record cannot be encoded, or
    /// [`StashError::Database`] on SQLite failures. Nothing is written on error.
    pub fn checkpoint(&mut self, store: &PersistenceStore) -> Result<usize> {
        let start = Instant::now();
        let now = Utc::now().to_rfc3339();
        let checksums = self.config.checksum_enabled;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM transit_records", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO transit_records (occupant_id, position, data, updated_at, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, record) in store.records().iter().enumerate() {
                let json = serde_json::to_vec(record)
                    .map_err(|e| StashError::Serialization(e.to_string()))?;
                let checksum = checksums.then(|| crc32_hex(&json));
                #[allow(clippy::cast_possible_wrap)]
                let position = position as i64;
                stmt.execute(params![
                    record.occupant.0.to_string(),
                    position,
                    json,
                    now,
                    checksum
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            records = store.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Transit journal checkpointed"
        );
        Ok(store.len())
    }

    /// Load every intact record in capture order.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures. Corrupt rows are
    /// logged and skipped.
    pub fn load(&self) -> Result<Vec<PersistenceRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT occupant_id, data, checksum FROM transit_records ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data, stored) = row?;
            if self.config.checksum_enabled
                && let Some(expected) = stored
            {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(
                        occupant = %id,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch, skipping transit record"
                    );
                    continue;
                }
            }
            match serde_json::from_slice::<PersistenceRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!(occupant = %id, error = %e, "Undecodable transit record skipped"),
            }
        }
        Ok(records)
    }

    /// Restore `store` from the journal. Returns the number of records loaded.
    ///
    /// # Errors
    /// Propagates [`TransitJournal::load`] errors; `store` is untouched then.
    pub fn restore_into(&self, store: &mut PersistenceStore) -> Result<usize> {
        let records = self.load()?;
        let n = records.len();
        store.restore(records);
        info!(records = n, "Holding area restored from journal");
        Ok(n)
    }

    /// Delete one occupant's row.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn remove(&self, occupant: OccupantId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM transit_records WHERE occupant_id = ?1",
            params![occupant.0.to_string()],
        )?;
        Ok(deleted > 0)
    }

    /// Delete every row (new session).
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM transit_records", [])?)
    }

    /// Number of journaled records.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn record_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transit_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Copy the journal to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(10), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Transit journal backup completed"
        );
        Ok(())
    }

    /// Run SQLite's integrity check.
    ///
    /// # Errors
    /// Returns [`StashError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path of the journal (`:memory:` for in-memory journals).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
