//! CMTS head-end CRUD

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::Cmts;
use crate::{now, Store, StoreError};

fn row_to_cmts(row: &Row<'_>) -> rusqlite::Result<Cmts> {
    Ok(Cmts {
        id: row.get(0)?,
        name: row.get(1)?,
        ip_address: row.get(2)?,
        snmp_port: row.get(3)?,
        community_read: row.get(4)?,
        community_write: row.get(5)?,
        cm_community_string: row.get(6)?,
        snmp_version: row.get(7)?,
        enabled: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const CMTS_COLUMNS: &str = "id, name, ip_address, snmp_port, community_read, community_write,
    cm_community_string, snmp_version, enabled, created_at, updated_at";

impl Store {
    /// Insert a new CMTS, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for rejected input, otherwise any
    /// database failure.
    pub fn create_cmts(&self, cmts: &Cmts) -> Result<i64, StoreError> {
        cmts.validate()?;

        self.write(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO cmts (name, ip_address, snmp_port, community_read, community_write,
                    cm_community_string, snmp_version, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    cmts.name,
                    cmts.ip_address,
                    cmts.snmp_port,
                    cmts.community_read,
                    cmts.community_write,
                    cmts.cm_community_string,
                    cmts.snmp_version,
                    cmts.enabled,
                    ts,
                    ts,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no CMTS has this id.
    pub fn get_cmts(&self, id: i64) -> Result<Cmts, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {CMTS_COLUMNS} FROM cmts WHERE id = ?1"),
                params![id],
                row_to_cmts,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("CMTS {id}")))
        })
    }

    /// All head-ends, ordered by name ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_cmts(&self) -> Result<Vec<Cmts>, StoreError> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CMTS_COLUMNS} FROM cmts ORDER BY name ASC"))?;
            let rows = stmt
                .query_map([], row_to_cmts)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for rejected input and
    /// [`StoreError::NotFound`] when the row does not exist.
    pub fn update_cmts(&self, cmts: &Cmts) -> Result<(), StoreError> {
        cmts.validate()?;

        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE cmts SET name = ?1, ip_address = ?2, snmp_port = ?3,
                    community_read = ?4, community_write = ?5, cm_community_string = ?6,
                    snmp_version = ?7, enabled = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    cmts.name,
                    cmts.ip_address,
                    cmts.snmp_port,
                    cmts.community_read,
                    cmts.community_write,
                    cmts.cm_community_string,
                    cmts.snmp_version,
                    cmts.enabled,
                    now(),
                    cmts.id,
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("CMTS {}", cmts.id)));
            }
            Ok(())
        })
    }

    /// Delete a CMTS. Attached modems cascade.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    pub fn delete_cmts(&self, id: i64) -> Result<(), StoreError> {
        self.write(|conn| {
            let affected = conn.execute("DELETE FROM cmts WHERE id = ?1", params![id])?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("CMTS {id}")));
            }
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_cmts(&self) -> Result<i64, StoreError> {
        self.read(count_table("cmts"))
    }
}

pub(crate) fn count_table(
    table: &'static str,
) -> impl Fn(&Connection) -> Result<i64, StoreError> {
    move |conn| {
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}
