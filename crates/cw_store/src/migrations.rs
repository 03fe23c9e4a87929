//! Database migrations for cw_store

use rusqlite::Connection;
use tracing::{debug, info};

use crate::StoreError;

/// Migration definition
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("migrations/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        name: "job_retry_after",
        sql: include_str!("migrations/002_job_retry_after.sql"),
    },
];

/// Settings seeded on first run; `ON CONFLICT DO NOTHING` keeps operator
/// overrides across restarts.
const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("workers", "5"),
    ("poll_interval", "30"),
    ("discovery_interval", "60"),
    ("evaluation_interval", "120"),
    ("job_timeout", "300"),
    ("retry_attempts", "3"),
    ("signal_level_min", "-15.0"),
    ("signal_level_max", "15.0"),
    ("max_upgrades_per_cmts", "10"),
];

/// Run all pending migrations, then seed default settings.
pub fn run_all(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
    ",
    )?;

    let current_version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    debug!(current_version, "Checking migrations");

    for migration in MIGRATIONS {
        if i64::from(migration.version) > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );

            conn.execute_batch(migration.sql).map_err(|e| {
                StoreError::Migration(format!(
                    "failed to apply migration {}: {e}",
                    migration.name
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.name,
                    chrono::Utc::now().timestamp()
                ],
            )?;
        }
    }

    seed_default_settings(conn)?;

    Ok(())
}

fn seed_default_settings(conn: &Connection) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();
    for (key, value) in DEFAULT_SETTINGS {
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO NOTHING",
            rusqlite::params![key, value, now],
        )?;
    }
    Ok(())
}
