//! Worker pool and job execution
//!
//! A fixed set of workers drains the dispatch channel. One worker drives one
//! job end-to-end: per-CMTS slot, SNMP session to the modem, the trigger
//! sequence, then the monitor loop until the modem reports an outcome or the
//! job ceiling passes. Failures feed the retry accounting; the worker itself
//! never dies over one bad job.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use cw_store::{ActivityEvent, EventType, Job, JobStatus};

use crate::{Engine, EngineError};

/// Backoff before retry `n` (1-based): `min(30 * 2^(n-1), 300)` seconds.
#[must_use]
pub fn backoff_secs(retry_count: u32) -> u64 {
    if retry_count == 0 {
        return 0;
    }
    let exp = (retry_count - 1).min(16);
    (30u64 << exp).min(300)
}

pub(crate) async fn run_worker(
    engine: Arc<Engine>,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
) {
    debug!(worker_id, "Worker started");

    loop {
        let job = {
            let mut guard = rx.lock().await;
            tokio::select! {
                () = engine.cancel_token().cancelled() => None,
                job = guard.recv() => job,
            }
        };

        let Some(job) = job else {
            debug!(worker_id, "Worker stopped");
            return;
        };

        let job_id = job.id;
        if let Err(err) = process_job(&engine, job).await {
            error!(worker_id, job_id, error = %err, "Failed to process job");
        }
    }
}

/// Drive one job through the state machine.
async fn process_job(engine: &Engine, queued: Job) -> Result<(), EngineError> {
    // Re-read the row: the channel entry may be stale (another dispatch of
    // the same job, an operator retry, or a terminal transition).
    let mut job = engine.store.get_job(queued.id)?;
    if job.status != JobStatus::Pending {
        debug!(job_id = job.id, status = job.status.as_str(), "Skipping stale channel entry");
        return Ok(());
    }

    // Same-MAC guard: two evaluators racing can leave duplicate PENDING
    // rows; only one may ever be IN_PROGRESS.
    let live = engine
        .store
        .list_jobs_for_mac(&job.mac_address, &[JobStatus::InProgress])?;
    if !live.is_empty() {
        debug!(job_id = job.id, mac = %job.mac_address,
            "Leaving job pending - modem already being upgraded");
        return Ok(());
    }

    info!(job_id = job.id, mac = %job.mac_address, "Processing upgrade job");

    job.status = JobStatus::InProgress;
    job.started_at = Some(chrono::Utc::now().timestamp());
    job.retry_after = None;
    engine.store.update_job(&job)?;

    engine.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::UpgradeStarted,
        "job",
        job.id,
        format!("Started firmware upgrade for modem {}", job.mac_address),
    ));

    match execute_upgrade(engine, &job).await {
        Ok(()) => {
            job.status = JobStatus::Completed;
            job.completed_at = Some(chrono::Utc::now().timestamp());
            job.error_message = None;
            engine.store.update_job(&job)?;

            engine.store.log_activity_best_effort(&ActivityEvent::new(
                EventType::UpgradeCompleted,
                "job",
                job.id,
                format!("Completed firmware upgrade for modem {}", job.mac_address),
            ));

            info!(job_id = job.id, mac = %job.mac_address, "Upgrade job completed");
            Ok(())
        }
        Err(EngineError::Cancelled) => {
            // Shutdown mid-flight: the row stays IN_PROGRESS for the startup
            // recovery sweep or an operator to decide.
            warn!(job_id = job.id, mac = %job.mac_address, "Job interrupted by shutdown");
            Ok(())
        }
        Err(err) => handle_job_failure(engine, job, &err),
    }
}

/// SNMP phase of a job, under the per-CMTS slot.
async fn execute_upgrade(engine: &Engine, job: &Job) -> Result<(), EngineError> {
    // Permit drops on every exit path out of this function.
    let _permit = engine.limits.acquire(job.cmts_id).await;
    debug!(job_id = job.id, cmts_id = job.cmts_id, mac = %job.mac_address,
        "Acquired CMTS rate limit slot");

    let modem = engine
        .store
        .get_modem(job.modem_id)
        .map_err(EngineError::Store)?;
    if modem.ip_address.is_empty() {
        return Err(EngineError::ModemUnaddressed);
    }

    let cmts = engine.store.get_cmts(job.cmts_id)?;

    // Prefer the dedicated cable-modem community, fall back to the write
    // community; with neither there is nothing to SET with.
    let community = cmts
        .cm_community_string
        .as_deref()
        .filter(|c| !c.is_empty())
        .or(cmts.community_write.as_deref().filter(|c| !c.is_empty()))
        .ok_or(EngineError::MissingWriteCommunity(cmts.id))?;

    info!(modem_ip = %modem.ip_address, mac = %job.mac_address,
        "Connecting to cable modem via SNMP");
    let client = engine
        .connector
        .modem_session(&modem.ip_address, community, 161)
        .await?;

    info!(mac = %job.mac_address, tftp_server = %job.tftp_server_ip,
        firmware = %job.firmware_filename, "Triggering firmware upgrade");
    client
        .trigger_firmware_upgrade(&job.tftp_server_ip, &job.firmware_filename)
        .await?;

    monitor_upgrade(engine, job, &client).await
}

/// Poll the modem until it reports an outcome or the job ceiling passes.
/// Transient status-read errors count against the ceiling but do not abort.
async fn monitor_upgrade(
    engine: &Engine,
    job: &Job,
    client: &cw_snmp::SnmpClient,
) -> Result<(), EngineError> {
    let deadline = Instant::now() + engine.config.job_timeout;
    let mut ticker = tokio::time::interval(engine.config.monitor_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; burn it so the modem gets one
    // full interval to start the transfer before we ask.
    ticker.tick().await;

    info!(mac = %job.mac_address, timeout_secs = engine.config.job_timeout.as_secs(),
        "Monitoring upgrade progress");

    loop {
        tokio::select! {
            () = engine.cancel_token().cancelled() => {
                return Err(EngineError::Cancelled);
            }
            _ = ticker.tick() => {}
        }

        if Instant::now() >= deadline {
            return Err(EngineError::Timeout(engine.config.job_timeout));
        }

        match client.check_upgrade_status().await {
            Ok(cw_snmp::UpgradeStatus::Completed) => {
                info!(mac = %job.mac_address, "Firmware upgrade completed successfully");
                return Ok(());
            }
            Ok(cw_snmp::UpgradeStatus::Failed) => {
                return Err(EngineError::UpgradeRemote);
            }
            Ok(cw_snmp::UpgradeStatus::InProgress) => {
                debug!(mac = %job.mac_address, "Upgrade still in progress");
            }
            Ok(cw_snmp::UpgradeStatus::Unknown) => {
                warn!(mac = %job.mac_address, "Unknown upgrade status");
            }
            Err(err) => {
                // UDP loss mid-flash is routine; keep polling.
                warn!(mac = %job.mac_address, error = %err,
                    "Failed to check upgrade status, will retry");
            }
        }
    }
}

/// Retry accounting. Retryable failures go back to PENDING with a
/// `retry_after` gate; exhausted ones go terminal.
fn handle_job_failure(engine: &Engine, mut job: Job, err: &EngineError) -> Result<(), EngineError> {
    error!(
        job_id = job.id,
        mac = %job.mac_address,
        retry_count = job.retry_count,
        max_retries = job.max_retries,
        error = %err,
        "Job failed"
    );

    let attempts = (job.retry_count + 1).min(job.max_retries.max(1));
    job.retry_count = attempts;
    job.error_message = Some(err.to_string());

    if attempts < job.max_retries {
        let backoff = backoff_secs(attempts);
        job.status = JobStatus::Pending;
        job.started_at = None;
        job.retry_after = Some(chrono::Utc::now().timestamp() + backoff as i64);
        engine.store.update_job(&job)?;

        engine.store.log_activity_best_effort(&ActivityEvent::new(
            EventType::UpgradeFailed,
            "job",
            job.id,
            format!(
                "Upgrade failed for modem {}, will retry in {}s (attempt {}/{}): {}",
                job.mac_address, backoff, attempts, job.max_retries, err
            ),
        ));

        info!(job_id = job.id, mac = %job.mac_address, retry_count = attempts,
            backoff_seconds = backoff, "Job will be retried with exponential backoff");
        return Ok(());
    }

    job.status = JobStatus::Failed;
    job.completed_at = Some(chrono::Utc::now().timestamp());
    job.retry_after = None;
    engine.store.update_job(&job)?;

    engine.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::UpgradeFailed,
        "job",
        job.id,
        format!(
            "Upgrade permanently failed for modem {} after {} attempts: {}",
            job.mac_address, attempts, err
        ),
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_secs(1), 30);
        assert_eq!(backoff_secs(2), 60);
        assert_eq!(backoff_secs(3), 120);
        assert_eq!(backoff_secs(4), 240);
        assert_eq!(backoff_secs(5), 300);
        assert_eq!(backoff_secs(12), 300);
        // Shift-width guard: huge retry counts stay capped.
        assert_eq!(backoff_secs(u32::MAX), 300);
    }
}
