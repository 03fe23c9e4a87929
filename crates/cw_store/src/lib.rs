//! `cw_store` - SQLite storage layer for Cableward
//!
//! This crate provides:
//! - The six persisted entities and their validation
//! - Schema migrations
//! - Typed CRUD with the ordering and filter guarantees the engine relies on
//! - Upsert-by-MAC for discovered modems
//! - The append-only activity log
//! - Key/value settings with upsert semantics
//!
//! The store is synchronous: callers share one connection behind a mutex,
//! readers run against WAL snapshots, and writes that hit a busy database are
//! retried internally before a [`StoreError::Busy`] surfaces.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

pub mod mac;
pub mod migrations;
pub mod models;

mod activity;
mod cmts;
mod job;
mod modem;
mod rule;
mod settings;

pub use mac::{MacAddr, MacParseError};
pub use models::{
    ActivityEvent, Cmts, EventType, Job, JobStatus, MatchCriteria, MatchType, Modem, ModemStatus,
    Rule,
};

/// How many times a write is retried when the database reports busy.
const WRITE_RETRIES: u32 = 3;

/// Base delay between busy retries; doubles per attempt.
const WRITE_RETRY_BASE: Duration = Duration::from_millis(25);

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database busy after {WRITE_RETRIES} attempts: {0}")]
    Busy(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the underlying database reported a transient busy condition.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, ref message) = err {
            if inner.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = message.clone().unwrap_or_else(|| inner.to_string());
                return StoreError::Conflict(detail);
            }
        }
        StoreError::Database(err)
    }
}

/// Main storage handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    /// Open or create the database at `path`, applying pragmas and pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if directory creation, opening, pragma setup,
    /// or migration execution fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "Opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.to_string_lossy().to_string())
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if setup or migrations fail.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, db_path: String) -> Result<Self, StoreError> {
        // WAL keeps readers concurrent with the single writer; the busy
        // timeout absorbs short write contention before our own retry loop
        // kicks in.
        // journal_mode answers with the resulting mode ("wal", or "memory"
        // for in-memory databases), so it goes through query_row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(250))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };

        {
            let guard = store.conn.lock().unwrap();
            migrations::run_all(&guard)?;
        }

        Ok(store)
    }

    /// Database path this store was opened with.
    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Cheap connectivity probe for health reporting.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    /// Run a read-only closure against the connection.
    ///
    /// # Panics
    ///
    /// Panics if the connection mutex is poisoned.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a write closure, retrying on transient busy errors.
    ///
    /// # Panics
    ///
    /// Panics if the connection mutex is poisoned.
    pub(crate) fn write<T>(
        &self,
        f: impl Fn(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            let result = {
                let conn = self.conn.lock().unwrap();
                f(&conn)
            };

            match result {
                Err(err) if err.is_busy() && attempt < WRITE_RETRIES => {
                    let delay = WRITE_RETRY_BASE * 2u32.pow(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64,
                        "Database busy, retrying write");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) if err.is_busy() => {
                    return Err(StoreError::Busy(err.to_string()));
                }
                other => return other,
            }
        }
    }

    /// Seed one CMTS, one modem, and one rule for tests and demos.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any of the inserts fail.
    pub fn load_test_fixtures(&self) -> Result<(), StoreError> {
        let cmts_id = self.create_cmts(&Cmts {
            id: 0,
            name: "Test CMTS".to_string(),
            ip_address: "192.168.1.1".to_string(),
            snmp_port: 161,
            community_read: "public".to_string(),
            community_write: Some("private".to_string()),
            cm_community_string: Some("cable-modem".to_string()),
            snmp_version: 2,
            enabled: true,
            created_at: 0,
            updated_at: 0,
        })?;

        self.upsert_modem(&Modem {
            id: 0,
            cmts_id,
            mac_address: "00:01:5C:11:22:33".to_string(),
            ip_address: "10.0.0.100".to_string(),
            sys_descr: "Arris SB8200 DOCSIS 3.1".to_string(),
            current_firmware: "1.0.0".to_string(),
            signal_level: 5.0,
            status: ModemStatus::Online,
            last_seen: 0,
        })?;

        self.create_rule(&Rule {
            id: 0,
            name: "Test Rule".to_string(),
            description: "Test upgrade rule".to_string(),
            match_type: MatchType::MacRange,
            match_criteria: r#"{"start_mac":"00:01:5C:00:00:00","end_mac":"00:01:5C:FF:FF:FF"}"#
                .to_string(),
            tftp_server_ip: "192.168.1.50".to_string(),
            firmware_filename: "firmware-v2.0.0.bin".to_string(),
            enabled: true,
            priority: 100,
            created_at: 0,
            updated_at: 0,
        })?;

        Ok(())
    }
}

/// Current time as epoch seconds, the timestamp unit used everywhere.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
