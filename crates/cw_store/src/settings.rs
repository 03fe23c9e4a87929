//! Key/value settings
//!
//! Settings are strings parsed on read. They sit at the bottom of the
//! configuration authority chain: process flags and environment variables
//! override them, they override built-in defaults.

use std::collections::BTreeMap;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension};

use crate::{now, Store, StoreError};

impl Store {
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent.
    pub fn get_setting(&self, key: &str) -> Result<String, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("setting {key}")))
        })
    }

    /// Get and parse a setting, falling back to `default` when the key is
    /// absent or does not parse.
    pub fn setting_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_setting(key) {
            Ok(raw) => raw.trim().parse().unwrap_or(default),
            Err(_) => default,
        }
    }

    /// Upsert a setting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value, now()],
            )?;
            Ok(())
        })
    }

    /// All settings, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_settings(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().collect())
        })
    }
}
