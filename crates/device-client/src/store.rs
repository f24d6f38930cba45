//! Durable local storage for the register.
//!
//! A single SQLite database holds the pairing credentials and the offline
//! queue. Writes go through one connection behind a mutex; a register is a
//! single-user device and contention is not a concern.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::error::{DeviceClientError, Result};
use crate::types::{DeviceCredentials, LocalQueueEntry, LocalQueueStats, LocalSyncStatus};

/// Local persistence seam. The SQLite implementation is the only production
/// one; the trait keeps the queue and scheduler testable in isolation.
pub trait LocalStore: Send + Sync {
    fn save_credentials(&self, credentials: &DeviceCredentials) -> Result<()>;
    fn credentials(&self) -> Result<Option<DeviceCredentials>>;
    fn clear_credentials(&self) -> Result<()>;

    fn insert_entry(&self, entry: &LocalQueueEntry) -> Result<()>;
    fn entry(&self, local_transaction_id: &str) -> Result<Option<LocalQueueEntry>>;
    fn entries_with_status(
        &self,
        status: LocalSyncStatus,
        limit: usize,
    ) -> Result<Vec<LocalQueueEntry>>;

    /// Move entries to a new status. Transitioning into SYNCING counts as a
    /// new upload attempt and bumps `attempt_count`.
    fn set_status(
        &self,
        local_transaction_ids: &[String],
        status: LocalSyncStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Put FAILED entries back in line at the given priority. Returns how
    /// many were requeued.
    fn requeue_failed(&self, priority: &str) -> Result<usize>;

    /// Delete COMPLETED entries acknowledged at or before `cutoff`. Entries
    /// in any other status are never deleted. Returns how many were removed.
    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn stats(&self) -> Result<LocalQueueStats>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device_credentials (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id TEXT NOT NULL,
    device_name TEXT NOT NULL,
    encryption_key BLOB NOT NULL,
    encryption_key_version INTEGER NOT NULL,
    terminal_connection_token TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS offline_queue (
    local_transaction_id TEXT PRIMARY KEY NOT NULL,
    encrypted_payload BLOB NOT NULL,
    encryption_iv BLOB NOT NULL,
    encryption_key_version INTEGER NOT NULL,
    transaction_timestamp TEXT NOT NULL,
    transaction_amount TEXT NOT NULL,
    priority TEXT NOT NULL DEFAULT 'HIGH',
    staff_actor TEXT,
    status TEXT NOT NULL DEFAULT 'QUEUED',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_status
    ON offline_queue (status, created_at);
"#;

/// SQLite-backed [`LocalStore`].
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Open (or create) the register database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        // A process death mid-upload leaves its snapshot in SYNCING with no
        // owner. Nothing was acknowledged, so those entries go back in line.
        let recovered = conn.execute(
            "UPDATE offline_queue SET status = 'QUEUED' WHERE status = 'SYNCING'",
            [],
        )?;
        if recovered > 0 {
            log::warn!("Recovered {} entries from an interrupted upload", recovered);
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DeviceClientError::Crypto("local store mutex is poisoned".into()))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DeviceClientError::invalid_request(format!("bad stored timestamp: {}", e)))
}

fn parse_amount(value: &str) -> Result<Decimal> {
    value
        .parse::<Decimal>()
        .map_err(|e| DeviceClientError::invalid_request(format!("bad stored amount: {}", e)))
}

/// Column-for-column row image; parsed into the domain type afterwards so
/// timestamp and decimal errors surface as client errors, not SQLite ones.
struct RawEntry {
    local_transaction_id: String,
    encrypted_payload: Vec<u8>,
    encryption_iv: Vec<u8>,
    encryption_key_version: i32,
    transaction_timestamp: String,
    transaction_amount: String,
    priority: String,
    staff_actor: Option<String>,
    status: String,
    attempt_count: i32,
    last_error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        local_transaction_id: row.get("local_transaction_id")?,
        encrypted_payload: row.get("encrypted_payload")?,
        encryption_iv: row.get("encryption_iv")?,
        encryption_key_version: row.get("encryption_key_version")?,
        transaction_timestamp: row.get("transaction_timestamp")?,
        transaction_amount: row.get("transaction_amount")?,
        priority: row.get("priority")?,
        staff_actor: row.get("staff_actor")?,
        status: row.get("status")?,
        attempt_count: row.get("attempt_count")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn to_entry(raw: RawEntry) -> Result<LocalQueueEntry> {
    Ok(LocalQueueEntry {
        transaction_timestamp: parse_timestamp(&raw.transaction_timestamp)?,
        transaction_amount: parse_amount(&raw.transaction_amount)?,
        created_at: parse_timestamp(&raw.created_at)?,
        completed_at: raw.completed_at.as_deref().map(parse_timestamp).transpose()?,
        status: LocalSyncStatus::parse(&raw.status).ok_or_else(|| {
            DeviceClientError::invalid_request(format!("unknown entry status {}", raw.status))
        })?,
        local_transaction_id: raw.local_transaction_id,
        encrypted_payload: raw.encrypted_payload,
        encryption_iv: raw.encryption_iv,
        encryption_key_version: raw.encryption_key_version,
        priority: raw.priority,
        staff_actor: raw.staff_actor,
        last_error: raw.last_error,
        attempt_count: raw.attempt_count,
    })
}

const ENTRY_COLUMNS: &str = "local_transaction_id, encrypted_payload, encryption_iv, \
     encryption_key_version, transaction_timestamp, transaction_amount, priority, \
     staff_actor, status, attempt_count, last_error, created_at, completed_at";

impl LocalStore for SqliteLocalStore {
    fn save_credentials(&self, credentials: &DeviceCredentials) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO device_credentials \
             (id, device_id, device_name, encryption_key, encryption_key_version, terminal_connection_token) \
             VALUES (1, ?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (id) DO UPDATE SET \
               device_id = excluded.device_id, \
               device_name = excluded.device_name, \
               encryption_key = excluded.encryption_key, \
               encryption_key_version = excluded.encryption_key_version, \
               terminal_connection_token = excluded.terminal_connection_token",
            params![
                credentials.device_id,
                credentials.device_name,
                credentials.encryption_key,
                credentials.encryption_key_version,
                credentials.terminal_connection_token,
            ],
        )?;
        Ok(())
    }

    fn credentials(&self) -> Result<Option<DeviceCredentials>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT device_id, device_name, encryption_key, encryption_key_version, \
                 terminal_connection_token FROM device_credentials WHERE id = 1",
                [],
                |row| {
                    Ok(DeviceCredentials {
                        device_id: row.get(0)?,
                        device_name: row.get(1)?,
                        encryption_key: row.get(2)?,
                        encryption_key_version: row.get(3)?,
                        terminal_connection_token: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn clear_credentials(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM device_credentials", [])?;
        Ok(())
    }

    fn insert_entry(&self, entry: &LocalQueueEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO offline_queue \
             (local_transaction_id, encrypted_payload, encryption_iv, encryption_key_version, \
              transaction_timestamp, transaction_amount, priority, staff_actor, status, \
              attempt_count, last_error, created_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.local_transaction_id,
                entry.encrypted_payload,
                entry.encryption_iv,
                entry.encryption_key_version,
                entry.transaction_timestamp.to_rfc3339(),
                entry.transaction_amount.to_string(),
                entry.priority,
                entry.staff_actor,
                entry.status.as_str(),
                entry.attempt_count,
                entry.last_error,
                entry.created_at.to_rfc3339(),
                entry.completed_at.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn entry(&self, local_transaction_id: &str) -> Result<Option<LocalQueueEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM offline_queue WHERE local_transaction_id = ?1",
                    ENTRY_COLUMNS
                ),
                params![local_transaction_id],
                row_to_raw,
            )
            .optional()?;
        row.map(to_entry).transpose()
    }

    fn entries_with_status(
        &self,
        status: LocalSyncStatus,
        limit: usize,
    ) -> Result<Vec<LocalQueueEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM offline_queue WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.as_str(), limit as i64], row_to_raw)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(to_entry(row?)?);
        }
        Ok(entries)
    }

    fn set_status(
        &self,
        local_transaction_ids: &[String],
        status: LocalSyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if local_transaction_ids.is_empty() {
            return Ok(());
        }
        let attempt_bump = i32::from(status == LocalSyncStatus::Syncing);
        let completed_at =
            (status == LocalSyncStatus::Completed).then(|| Utc::now().to_rfc3339());
        let mut conn = self.lock()?;
        // One transaction: a crash mid-update must not leave the snapshot
        // half-marked.
        let tx = conn.transaction()?;
        for id in local_transaction_ids {
            tx.execute(
                "UPDATE offline_queue SET status = ?1, last_error = ?2, \
                 attempt_count = attempt_count + ?3, \
                 completed_at = COALESCE(?4, completed_at) \
                 WHERE local_transaction_id = ?5",
                params![status.as_str(), error, attempt_bump, completed_at, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn requeue_failed(&self, priority: &str) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE offline_queue SET status = 'QUEUED', priority = ?1 WHERE status = 'FAILED'",
            params![priority],
        )?;
        Ok(changed)
    }

    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM offline_queue WHERE status = 'COMPLETED' \
             AND completed_at IS NOT NULL AND completed_at <= ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    fn stats(&self) -> Result<LocalQueueStats> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM offline_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = LocalQueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match LocalSyncStatus::parse(&status) {
                Some(LocalSyncStatus::Queued) => stats.queued = count,
                Some(LocalSyncStatus::Syncing) => stats.syncing = count,
                Some(LocalSyncStatus::Completed) => stats.completed = count,
                Some(LocalSyncStatus::Failed) | None => stats.failed += count,
            }
        }
        Ok(stats)
    }
}
