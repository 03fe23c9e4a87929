//! Upgrade job persistence
//!
//! Job rows are append-heavy and transition-driven: creation never merges
//! (deduplication belongs to the rule-evaluation and sweep paths), and
//! updates rewrite the mutable transition fields only.

use rusqlite::{params, OptionalExtension, Row};

use crate::cmts::count_table;
use crate::models::{Job, JobStatus};
use crate::{now, Store, StoreError};

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(5)?;
    Ok(Job {
        id: row.get(0)?,
        modem_id: row.get(1)?,
        rule_id: row.get(2)?,
        cmts_id: row.get(3)?,
        mac_address: row.get(4)?,
        status: status.parse().unwrap_or(JobStatus::Failed),
        tftp_server_ip: row.get(6)?,
        firmware_filename: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        error_message: row.get(10)?,
        created_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
        retry_after: row.get(14)?,
    })
}

const JOB_COLUMNS: &str = "id, modem_id, rule_id, cmts_id, mac_address, status, tftp_server_ip,
    firmware_filename, retry_count, max_retries, error_message, created_at, started_at,
    completed_at, retry_after";

impl Store {
    /// Insert a new job row, returning its id. Never merges with existing
    /// jobs; callers are responsible for MAC-level deduplication.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn create_job(&self, job: &Job) -> Result<i64, StoreError> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO upgrade_job (modem_id, rule_id, cmts_id, mac_address, status,
                    tftp_server_ip, firmware_filename, retry_count, max_retries, created_at,
                    retry_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.modem_id,
                    job.rule_id,
                    job.cmts_id,
                    job.mac_address,
                    job.status.as_str(),
                    job.tftp_server_ip,
                    job.firmware_filename,
                    job.retry_count,
                    job.max_retries,
                    now(),
                    job.retry_after,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no job has this id.
    pub fn get_job(&self, id: i64) -> Result<Job, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM upgrade_job WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
        })
    }

    /// Jobs newest-first, optionally filtered by status and capped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, StoreError> {
        self.read(|conn| {
            let cap = limit.map_or(i64::MAX, |l| l as i64);
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM upgrade_job
                         WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
                    ))?;
                    let out = stmt
                        .query_map(params![status.as_str(), cap], row_to_job)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    out
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM upgrade_job
                         ORDER BY created_at DESC, id DESC LIMIT ?1"
                    ))?;
                    let out = stmt
                        .query_map(params![cap], row_to_job)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    out
                }
            };
            Ok(rows)
        })
    }

    /// Jobs for one MAC in any of the given states. Used by both
    /// deduplication paths.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_jobs_for_mac(
        &self,
        mac: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        self.read(|conn| {
            let placeholders = statuses
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM upgrade_job
                 WHERE mac_address = ?1 AND status IN ({placeholders})
                 ORDER BY created_at DESC, id DESC"
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<&dyn rusqlite::ToSql> = vec![&mac];
            let status_strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            for s in &status_strs {
                values.push(s);
            }

            let rows = stmt
                .query_map(values.as_slice(), row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Persist a job's transition fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    pub fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE upgrade_job SET status = ?1, retry_count = ?2, error_message = ?3,
                    started_at = ?4, completed_at = ?5, retry_after = ?6
                 WHERE id = ?7",
                params![
                    job.status.as_str(),
                    job.retry_count,
                    job.error_message,
                    job.started_at,
                    job.completed_at,
                    job.retry_after,
                    job.id,
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("job {}", job.id)));
            }
            Ok(())
        })
    }

    /// Management retry: back to PENDING with a clean slate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    pub fn reset_job_for_retry(&self, id: i64) -> Result<(), StoreError> {
        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE upgrade_job SET status = 'PENDING', retry_count = 0,
                    error_message = NULL, started_at = NULL, completed_at = NULL,
                    retry_after = NULL
                 WHERE id = ?1",
                params![id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("job {id}")));
            }
            Ok(())
        })
    }

    /// Per-status job counts for the metrics surface.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, i64)>, StoreError> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM upgrade_job GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| {
                    let status: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((status, count))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(raw, count)| raw.parse::<JobStatus>().ok().map(|s| (s, count)))
                .collect())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_jobs(&self) -> Result<i64, StoreError> {
        self.read(count_table("upgrade_job"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_job(mac: &str) -> Job {
        Job {
            id: 0,
            modem_id: 1,
            rule_id: 1,
            cmts_id: 1,
            mac_address: mac.to_string(),
            status: JobStatus::Pending,
            tftp_server_ip: "192.0.2.50".to_string(),
            firmware_filename: "fw-v2.0.0.bin".to_string(),
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: 0,
            started_at: None,
            completed_at: None,
            retry_after: None,
        }
    }

    #[test]
    fn create_and_fetch() {
        let store = Store::open_memory().unwrap();
        let id = store.create_job(&pending_job("00:01:5C:AA:BB:CC")).unwrap();
        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.created_at > 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn list_filters_by_status_and_limit() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            let id = store
                .create_job(&pending_job(&format!("00:01:5C:00:00:0{i}")))
                .unwrap();
            if i < 2 {
                let mut job = store.get_job(id).unwrap();
                job.status = JobStatus::InProgress;
                store.update_job(&job).unwrap();
            }
        }

        assert_eq!(
            store.list_jobs(Some(JobStatus::Pending), None).unwrap().len(),
            3
        );
        assert_eq!(
            store
                .list_jobs(Some(JobStatus::InProgress), None)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.list_jobs(None, Some(4)).unwrap().len(), 4);
    }

    #[test]
    fn list_jobs_for_mac_matches_states() {
        let store = Store::open_memory().unwrap();
        let mac = "00:01:5C:AA:BB:CC";
        let id = store.create_job(&pending_job(mac)).unwrap();
        store.create_job(&pending_job("00:01:5C:00:00:99")).unwrap();

        let hits = store
            .list_jobs_for_mac(mac, &[JobStatus::Pending, JobStatus::InProgress])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        let none = store.list_jobs_for_mac(mac, &[JobStatus::Completed]).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn reset_job_for_retry_clears_fields() {
        let store = Store::open_memory().unwrap();
        let id = store.create_job(&pending_job("00:01:5C:AA:BB:CC")).unwrap();

        let mut job = store.get_job(id).unwrap();
        job.status = JobStatus::Failed;
        job.retry_count = 3;
        job.error_message = Some("upgrade timeout".to_string());
        job.started_at = Some(100);
        job.completed_at = Some(200);
        store.update_job(&job).unwrap();

        store.reset_job_for_retry(id).unwrap();
        let reset = store.get_job(id).unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert!(reset.error_message.is_none());
        assert!(reset.started_at.is_none());
        assert!(reset.completed_at.is_none());
        assert!(reset.retry_after.is_none());
    }

    #[test]
    fn count_by_status() {
        let store = Store::open_memory().unwrap();
        store.create_job(&pending_job("00:01:5C:00:00:01")).unwrap();
        store.create_job(&pending_job("00:01:5C:00:00:02")).unwrap();

        let counts = store.count_jobs_by_status().unwrap();
        assert_eq!(counts, vec![(JobStatus::Pending, 2)]);
        assert_eq!(store.count_jobs().unwrap(), 2);
    }
}
