//! Periodic drivers
//!
//! Four independent loops share the engine: discovery, rule evaluation,
//! the pending-job sweep, and stale-modem cleanup. Each watches the root
//! cancellation token and holds nothing across ticks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use cw_store::{ActivityEvent, EventType, JobStatus, StoreError};

use crate::{Engine, EngineError};

/// Modems unseen this long are marked offline by the cleanup pass.
pub const STALE_OFFLINE_MINUTES: i64 = 10;

/// Modems offline this long are deleted by the cleanup pass.
pub const STALE_DELETE_DAYS: i64 = 7;

/// Cleanup cadence.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerTask {
    Discovery,
    Evaluation,
    PendingSweep,
    Cleanup,
}

impl SchedulerTask {
    fn name(self) -> &'static str {
        match self {
            SchedulerTask::Discovery => "discovery",
            SchedulerTask::Evaluation => "rule-evaluation",
            SchedulerTask::PendingSweep => "pending-sweep",
            SchedulerTask::Cleanup => "cleanup",
        }
    }
}

pub(crate) async fn run_scheduler(engine: Arc<Engine>, task: SchedulerTask) {
    let period = match task {
        SchedulerTask::Discovery => engine.config().discovery_interval,
        SchedulerTask::Evaluation => engine.config().evaluation_interval,
        SchedulerTask::PendingSweep => engine.config().poll_interval,
        SchedulerTask::Cleanup => CLEANUP_INTERVAL,
    };

    info!(scheduler = task.name(), interval_secs = period.as_secs(), "Scheduler started");

    // Let initial discovery populate the inventory before the first
    // evaluation pass.
    if task == SchedulerTask::Evaluation {
        tokio::select! {
            () = engine.cancel_token().cancelled() => return,
            () = tokio::time::sleep(engine.config().evaluation_warmup) => {}
        }
    }

    // The first tick completes immediately, which gives discovery and
    // cleanup their run-at-startup semantics.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = engine.cancel_token().cancelled() => {
                info!(scheduler = task.name(), "Scheduler stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let outcome = match task {
            SchedulerTask::Discovery => engine.discover_all().map(|_| ()),
            SchedulerTask::Evaluation => engine.evaluate_rules().map(|_| ()),
            SchedulerTask::PendingSweep => sweep_pending_jobs(&engine),
            SchedulerTask::Cleanup => run_cleanup(&engine),
        };

        if let Err(err) = outcome {
            error!(scheduler = task.name(), error = %err, "Scheduler tick failed");
        }
    }
}

/// Read up to 100 PENDING jobs and push the dispatchable ones onto the
/// worker channel. A job is held back while its backoff gate is in the
/// future or another job for the same MAC is live; a job whose modem row is
/// gone is marked SKIPPED, since it can never run.
pub(crate) fn sweep_pending_jobs(engine: &Engine) -> Result<(), EngineError> {
    let pending = engine.store.list_jobs(Some(JobStatus::Pending), Some(100))?;
    if pending.is_empty() {
        return Ok(());
    }

    let in_progress = engine.store.list_jobs(Some(JobStatus::InProgress), None)?;
    let mut busy_macs: HashSet<String> =
        in_progress.into_iter().map(|job| job.mac_address).collect();

    let now = chrono::Utc::now().timestamp();
    let tx = engine.job_sender();

    for mut job in pending {
        if let Some(after) = job.retry_after {
            if after > now {
                debug!(job_id = job.id, retry_after = after, "Holding job for backoff");
                continue;
            }
        }

        if busy_macs.contains(&job.mac_address) {
            debug!(job_id = job.id, mac = %job.mac_address,
                "Skipping job - modem already being upgraded");
            continue;
        }

        match engine.store.get_modem(job.modem_id) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                job.status = JobStatus::Skipped;
                job.completed_at = Some(now);
                job.error_message = Some("modem no longer in inventory".to_string());
                if let Err(err) = engine.store.update_job(&job) {
                    warn!(job_id = job.id, error = %err, "Failed to mark job skipped");
                    continue;
                }
                engine.store.log_activity_best_effort(&ActivityEvent::new(
                    EventType::SystemEvent,
                    "job",
                    job.id,
                    format!("Skipped job for vanished modem {}", job.mac_address),
                ));
                continue;
            }
            Err(err) => {
                warn!(job_id = job.id, error = %err, "Failed to load modem for job, deferring");
                continue;
            }
        }

        let mac = job.mac_address.clone();
        match tx.try_send(job) {
            Ok(()) => {
                debug!(mac = %mac, "Queued pending job");
                // One dispatch per MAC per tick.
                busy_macs.insert(mac);
            }
            Err(TrySendError::Full(_)) => {
                warn!("Job queue full, deferring remaining pending jobs to next sweep");
                return Ok(());
            }
            Err(TrySendError::Closed(_)) => return Ok(()),
        }
    }

    Ok(())
}

/// Age out the inventory and record what happened.
pub(crate) fn run_cleanup(engine: &Engine) -> Result<(), EngineError> {
    let (marked_offline, deleted) = engine
        .store
        .cleanup_stale_modems(STALE_OFFLINE_MINUTES, STALE_DELETE_DAYS)?;

    if marked_offline == 0 && deleted == 0 {
        return Ok(());
    }

    info!(marked_offline, deleted, "Stale modem cleanup completed");

    if marked_offline > 0 {
        engine.store.log_activity_best_effort(&ActivityEvent::new(
            EventType::ModemLost,
            "system",
            0,
            format!("Marked {marked_offline} stale modems as offline"),
        ));
    }

    if deleted > 0 {
        engine.store.log_activity_best_effort(&ActivityEvent::new(
            EventType::ModemCleanup,
            "system",
            0,
            format!("Deleted {deleted} old offline modems"),
        ));
    }

    Ok(())
}

/// Startup pass: IN_PROGRESS rows older than the job ceiling were orphaned
/// by a previous process and go back to PENDING. Fresher rows are left for
/// the operator.
pub(crate) fn recover_orphaned_jobs(engine: &Engine) -> Result<(), EngineError> {
    let in_progress = engine.store.list_jobs(Some(JobStatus::InProgress), None)?;
    if in_progress.is_empty() {
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp();
    let ceiling = engine.config().job_timeout.as_secs() as i64;

    let mut recovered = 0;
    for mut job in in_progress {
        let orphaned = job.started_at.is_none_or(|started| now - started > ceiling);
        if !orphaned {
            continue;
        }

        job.status = JobStatus::Pending;
        job.started_at = None;
        job.retry_after = None;
        if let Err(err) = engine.store.update_job(&job) {
            warn!(job_id = job.id, error = %err, "Failed to recover orphaned job");
            continue;
        }
        recovered += 1;
    }

    if recovered > 0 {
        info!(recovered, "Recovered orphaned in-progress jobs");
        engine.store.log_activity_best_effort(&ActivityEvent::new(
            EventType::SystemEvent,
            "system",
            0,
            format!("Recovered {recovered} orphaned in-progress jobs to pending"),
        ));
    }

    Ok(())
}
