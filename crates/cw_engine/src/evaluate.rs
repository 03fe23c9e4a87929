//! Rule evaluation
//!
//! One pass: enabled rules in priority order against the eligible slice of
//! the inventory, creating one PENDING job per matched modem that needs the
//! firmware and has no live job yet. The pass is idempotent - re-running it
//! with no state change creates nothing new.

use tracing::{debug, info, warn};

use cw_store::{Job, JobStatus};

use crate::{Engine, EngineError};

impl Engine {
    /// Evaluate all enabled rules against all eligible modems. Returns the
    /// number of jobs created.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule or modem lists cannot be read;
    /// per-modem failures are logged and skipped.
    pub fn evaluate_rules(&self) -> Result<usize, EngineError> {
        let rules: Vec<_> = self
            .store
            .list_rules()?
            .into_iter()
            .filter(|rule| rule.enabled)
            .collect();

        if rules.is_empty() {
            info!("No enabled rules found");
            return Ok(0);
        }

        let all_modems = self.store.list_modems(None)?;
        let total_modems = all_modems.len();
        let modems = self.matcher.filter_eligible(
            all_modems,
            self.config.signal_level_min,
            self.config.signal_level_max,
        );

        info!(
            total_modems,
            eligible_modems = modems.len(),
            active_rules = rules.len(),
            "Starting rule evaluation"
        );

        let mut jobs_created = 0;
        for modem in &modems {
            let Some(rule) = self.matcher.match_modem_to_rules(modem, &rules) else {
                continue;
            };

            if !self.matcher.should_upgrade(modem, rule) {
                continue;
            }

            // A live job for this MAC means this pass has nothing to add.
            match self
                .store
                .list_jobs_for_mac(&modem.mac_address, &[JobStatus::Pending, JobStatus::InProgress])
            {
                Ok(existing) if !existing.is_empty() => {
                    debug!(
                        mac = %modem.mac_address,
                        job_id = existing[0].id,
                        status = existing[0].status.as_str(),
                        "Job already exists for modem, skipping"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(mac = %modem.mac_address, error = %err,
                        "Failed to check existing jobs, skipping modem");
                    continue;
                }
            }

            let job = Job {
                id: 0,
                modem_id: modem.id,
                rule_id: rule.id,
                cmts_id: modem.cmts_id,
                mac_address: modem.mac_address.clone(),
                status: JobStatus::Pending,
                // Snapshots: rule edits must not touch this job.
                tftp_server_ip: rule.tftp_server_ip.clone(),
                firmware_filename: rule.firmware_filename.clone(),
                retry_count: 0,
                max_retries: self.config.retry_attempts,
                error_message: None,
                created_at: 0,
                started_at: None,
                completed_at: None,
                retry_after: None,
            };

            match self.store.create_job(&job) {
                Ok(job_id) => {
                    info!(
                        job_id,
                        mac = %modem.mac_address,
                        rule = %rule.name,
                        firmware = %rule.firmware_filename,
                        "Created upgrade job"
                    );
                    jobs_created += 1;
                }
                Err(err) => {
                    warn!(mac = %modem.mac_address, error = %err, "Failed to create upgrade job");
                }
            }
        }

        info!(jobs_created, "Rule evaluation completed");
        Ok(jobs_created)
    }
}
