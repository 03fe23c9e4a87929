//! Cable modem inventory operations
//!
//! Modems are keyed system-wide on canonical MAC address: discovery always
//! upserts, and staleness is handled by the cleanup sweep rather than by the
//! discovery path.

use rusqlite::{params, OptionalExtension, Row};

use crate::cmts::count_table;
use crate::models::{Modem, ModemStatus};
use crate::{now, Store, StoreError};

fn row_to_modem(row: &Row<'_>) -> rusqlite::Result<Modem> {
    let status: String = row.get(7)?;
    Ok(Modem {
        id: row.get(0)?,
        cmts_id: row.get(1)?,
        mac_address: row.get(2)?,
        ip_address: row.get(3)?,
        sys_descr: row.get(4)?,
        current_firmware: row.get(5)?,
        signal_level: row.get(6)?,
        status: status.parse().unwrap_or(ModemStatus::Unknown),
        last_seen: row.get(8)?,
    })
}

const MODEM_COLUMNS: &str = "id, cmts_id, mac_address, ip_address, sys_descr, current_firmware,
    signal_level, status, last_seen";

impl Store {
    /// Insert or refresh a modem keyed on MAC, stamping `last_seen = now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the MAC does not parse, or a
    /// database failure.
    pub fn upsert_modem(&self, modem: &Modem) -> Result<(), StoreError> {
        modem.validate()?;

        self.write(|conn| {
            conn.execute(
                "INSERT INTO cable_modem (cmts_id, mac_address, ip_address, sys_descr,
                    current_firmware, signal_level, status, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(mac_address) DO UPDATE SET
                    cmts_id = excluded.cmts_id,
                    ip_address = excluded.ip_address,
                    sys_descr = excluded.sys_descr,
                    current_firmware = excluded.current_firmware,
                    signal_level = excluded.signal_level,
                    status = excluded.status,
                    last_seen = excluded.last_seen",
                params![
                    modem.cmts_id,
                    modem.mac_address,
                    modem.ip_address,
                    modem.sys_descr,
                    modem.current_firmware,
                    modem.signal_level,
                    modem.status.as_str(),
                    now(),
                ],
            )?;
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no modem has this id.
    pub fn get_modem(&self, id: i64) -> Result<Modem, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {MODEM_COLUMNS} FROM cable_modem WHERE id = ?1"),
                params![id],
                row_to_modem,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("modem {id}")))
        })
    }

    /// Lookup by canonical MAC; `None` when never discovered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn get_modem_by_mac(&self, mac: &str) -> Result<Option<Modem>, StoreError> {
        self.read(|conn| {
            let modem = conn
                .query_row(
                    &format!("SELECT {MODEM_COLUMNS} FROM cable_modem WHERE mac_address = ?1"),
                    params![mac],
                    row_to_modem,
                )
                .optional()?;
            Ok(modem)
        })
    }

    /// All modems, most recently seen first, optionally scoped to one CMTS.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_modems(&self, cmts_id: Option<i64>) -> Result<Vec<Modem>, StoreError> {
        self.read(|conn| {
            let rows = match cmts_id {
                Some(id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MODEM_COLUMNS} FROM cable_modem
                         WHERE cmts_id = ?1 ORDER BY last_seen DESC"
                    ))?;
                    let out = stmt
                        .query_map(params![id], row_to_modem)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    out
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MODEM_COLUMNS} FROM cable_modem ORDER BY last_seen DESC"
                    ))?;
                    let out = stmt
                        .query_map([], row_to_modem)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    out
                }
            };
            Ok(rows)
        })
    }

    /// Delete one modem row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    pub fn delete_modem(&self, id: i64) -> Result<(), StoreError> {
        self.write(|conn| {
            let affected = conn.execute("DELETE FROM cable_modem WHERE id = ?1", params![id])?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("modem {id}")));
            }
            Ok(())
        })
    }

    /// Age out the inventory: modems unseen for `offline_after_minutes` are
    /// marked offline, and modems offline for `delete_after_days` are
    /// removed. Returns `(marked_offline, deleted)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn cleanup_stale_modems(
        &self,
        offline_after_minutes: i64,
        delete_after_days: i64,
    ) -> Result<(usize, usize), StoreError> {
        self.write(|conn| {
            let ts = now();
            let offline_cutoff = ts - offline_after_minutes * 60;
            let delete_cutoff = ts - delete_after_days * 86_400;

            let marked = conn.execute(
                "UPDATE cable_modem SET status = 'offline'
                 WHERE last_seen < ?1 AND status != 'offline'",
                params![offline_cutoff],
            )?;

            let deleted = conn.execute(
                "DELETE FROM cable_modem WHERE status = 'offline' AND last_seen < ?1",
                params![delete_cutoff],
            )?;

            Ok((marked, deleted))
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_modems(&self) -> Result<i64, StoreError> {
        self.read(count_table("cable_modem"))
    }
}
