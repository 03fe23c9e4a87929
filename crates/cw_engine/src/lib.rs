//! `cw_engine` - Discovery, rule matching, and upgrade orchestration
//!
//! This crate provides:
//! - The rule matcher (MAC ranges and sysDescr regexes, priority order)
//! - The discovery coordinator (bounded fan-out per CMTS)
//! - The job state machine with retry backoff
//! - The worker pool with per-CMTS concurrency caps
//! - The four periodic schedulers
//!
//! # Engine design principles
//!
//! 1. **Fail-soft**: schedulers and fan-out tasks log and drop a failing
//!    unit of work (one modem, one job, one rule); they never tear the
//!    engine down.
//! 2. **Durable jobs**: the in-memory channel is only a dispatch path;
//!    anything it drops re-materializes from the store on the next sweep.
//! 3. **One cancellation signal**: every scheduler, worker, and monitor loop
//!    watches the same token.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cw_snmp::SnmpError;
use cw_store::{Job, Store, StoreError};

pub mod connect;
pub mod discovery;
pub mod evaluate;
pub mod limits;
pub mod matcher;
pub mod scheduler;
pub mod worker;

pub use connect::{SnmpConnector, UdpConnector};
pub use discovery::DiscoverySummary;
pub use matcher::Matcher;

/// Capacity of the worker dispatch channel. A full channel is backpressure:
/// the sweep stops enqueueing for the tick and retries next time.
pub const JOB_CHANNEL_CAPACITY: usize = 100;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    #[error("CMTS {0} is disabled")]
    CmtsDisabled(i64),

    #[error("modem has no IP address")]
    ModemUnaddressed,

    #[error("no SNMP write community available for CMTS {0}")]
    MissingWriteCommunity(i64),

    #[error("modem reported upgrade failure")]
    UpgradeRemote,

    #[error("upgrade timeout after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,
}

/// Resolved engine tuning. File values win over persisted settings, which
/// win over the built-in defaults named in the docs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Pending-sweep tick.
    pub poll_interval: Duration,
    /// Discovery tick.
    pub discovery_interval: Duration,
    /// Rule-evaluation tick.
    pub evaluation_interval: Duration,
    /// Delay before the first rule evaluation so initial discovery can land.
    pub evaluation_warmup: Duration,
    /// Per-job wall-clock ceiling.
    pub job_timeout: Duration,
    /// Poll cadence inside the upgrade monitor loop.
    pub monitor_interval: Duration,
    /// Default `max_retries` stamped on new jobs.
    pub retry_attempts: u32,
    /// Eligibility window, dBmV.
    pub signal_level_min: f64,
    pub signal_level_max: f64,
    /// Per-CMTS concurrent upgrade cap.
    pub max_upgrades_per_cmts: usize,
    /// Fan-out width of one discovery run.
    pub discovery_workers: usize,
    /// Sustained query rate cap across one discovery run, per second.
    pub discovery_rate_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval: Duration::from_secs(30),
            discovery_interval: Duration::from_secs(60),
            evaluation_interval: Duration::from_secs(120),
            evaluation_warmup: Duration::from_secs(30),
            job_timeout: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(10),
            retry_attempts: 3,
            signal_level_min: -15.0,
            signal_level_max: 15.0,
            max_upgrades_per_cmts: 10,
            discovery_workers: 50,
            discovery_rate_limit: 200,
        }
    }
}

impl EngineConfig {
    /// Resolve the tuning chain for one knob set: explicit file values,
    /// then persisted settings rows, then defaults.
    #[must_use]
    pub fn resolve(file: &FileOverrides, store: &Store) -> Self {
        let defaults = Self::default();

        let discovery_interval = Duration::from_secs(file.discovery_interval_secs.unwrap_or_else(
            || store.setting_or("discovery_interval", defaults.discovery_interval.as_secs()),
        ));

        // Evaluation defaults to twice the discovery cadence unless pinned.
        let evaluation_interval = Duration::from_secs(
            file.evaluation_interval_secs
                .unwrap_or_else(|| store.setting_or("evaluation_interval", discovery_interval.as_secs() * 2)),
        );

        Self {
            workers: file
                .workers
                .unwrap_or_else(|| store.setting_or("workers", defaults.workers)),
            poll_interval: Duration::from_secs(file.poll_interval_secs.unwrap_or_else(|| {
                store.setting_or("poll_interval", defaults.poll_interval.as_secs())
            })),
            discovery_interval,
            evaluation_interval,
            evaluation_warmup: defaults.evaluation_warmup,
            job_timeout: Duration::from_secs(file.job_timeout_secs.unwrap_or_else(|| {
                store.setting_or("job_timeout", defaults.job_timeout.as_secs())
            })),
            monitor_interval: defaults.monitor_interval,
            retry_attempts: file
                .retry_attempts
                .unwrap_or_else(|| store.setting_or("retry_attempts", defaults.retry_attempts)),
            signal_level_min: file.signal_level_min.unwrap_or_else(|| {
                store.setting_or("signal_level_min", defaults.signal_level_min)
            }),
            signal_level_max: file.signal_level_max.unwrap_or_else(|| {
                store.setting_or("signal_level_max", defaults.signal_level_max)
            }),
            max_upgrades_per_cmts: file.max_upgrades_per_cmts.unwrap_or_else(|| {
                store.setting_or("max_upgrades_per_cmts", defaults.max_upgrades_per_cmts)
            }),
            discovery_workers: defaults.discovery_workers,
            discovery_rate_limit: defaults.discovery_rate_limit,
        }
    }
}

/// Engine knobs a config file may pin. Mirrors the optional `[engine]`
/// section of the config crate without depending on it.
#[derive(Debug, Clone, Default)]
pub struct FileOverrides {
    pub workers: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub discovery_interval_secs: Option<u64>,
    pub evaluation_interval_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub signal_level_min: Option<f64>,
    pub signal_level_max: Option<f64>,
    pub max_upgrades_per_cmts: Option<usize>,
}

/// The orchestration engine. Cheap to share behind an `Arc`; [`Engine::run`]
/// owns the worker pool and schedulers until the token cancels.
pub struct Engine {
    pub(crate) store: Store,
    pub(crate) connector: Arc<dyn SnmpConnector>,
    pub(crate) config: EngineConfig,
    pub(crate) limits: limits::CmtsLimits,
    pub(crate) matcher: Matcher,
    job_tx: mpsc::Sender<Job>,
    job_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Store,
        connector: Arc<dyn SnmpConnector>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::channel(JOB_CHANNEL_CAPACITY);
        let limits = limits::CmtsLimits::new(config.max_upgrades_per_cmts);

        Arc::new(Self {
            store,
            connector,
            config,
            limits,
            matcher: Matcher::new(),
            job_tx,
            job_rx: tokio::sync::Mutex::new(Some(job_rx)),
            cancel,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn job_sender(&self) -> mpsc::Sender<Job> {
        self.job_tx.clone()
    }

    /// One pending-sweep pass, outside the scheduler cadence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the job lists cannot be read.
    pub fn sweep_pending_jobs(&self) -> Result<(), EngineError> {
        scheduler::sweep_pending_jobs(self)
    }

    /// One stale-modem cleanup pass, outside the scheduler cadence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the cleanup query fails.
    pub fn run_cleanup(&self) -> Result<(), EngineError> {
        scheduler::run_cleanup(self)
    }

    /// Requeue IN_PROGRESS jobs orphaned by a previous process. Also runs
    /// once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the job list cannot be read.
    pub fn recover_orphaned_jobs(&self) -> Result<(), EngineError> {
        scheduler::recover_orphaned_jobs(self)
    }

    /// Jobs currently sitting in the dispatch channel.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.job_tx.max_capacity() - self.job_tx.capacity()
    }

    /// Run workers and schedulers until the cancellation token fires.
    /// In-flight IN_PROGRESS jobs are left in that state; queued channel
    /// entries are dropped and re-materialize from the store on next start.
    ///
    /// # Panics
    ///
    /// Panics if called twice on the same engine.
    pub async fn run(self: Arc<Self>) {
        info!(
            workers = self.config.workers,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            discovery_interval_secs = self.config.discovery_interval.as_secs(),
            "Starting upgrade engine"
        );

        if let Err(err) = scheduler::recover_orphaned_jobs(&self) {
            error!(error = %err, "Startup job recovery failed");
        }

        let rx = self
            .job_rx
            .lock()
            .await
            .take()
            .expect("engine already running");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::new();

        for worker_id in 0..self.config.workers {
            let engine = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                worker::run_worker(engine, worker_id, rx).await;
            }));
        }

        for task in [
            scheduler::SchedulerTask::Discovery,
            scheduler::SchedulerTask::Evaluation,
            scheduler::SchedulerTask::PendingSweep,
            scheduler::SchedulerTask::Cleanup,
        ] {
            let engine = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                scheduler::run_scheduler(engine, task).await;
            }));
        }

        self.cancel.cancelled().await;
        info!("Upgrade engine shutting down");

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.discovery_interval, Duration::from_secs(60));
        assert_eq!(config.evaluation_interval, Duration::from_secs(120));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.max_upgrades_per_cmts, 10);
        assert_eq!(config.discovery_workers, 50);
        assert_eq!(config.discovery_rate_limit, 200);
    }

    #[test]
    fn resolve_prefers_file_then_settings() {
        let store = Store::open_memory().unwrap();
        store.set_setting("workers", "7").unwrap();
        store.set_setting("discovery_interval", "90").unwrap();

        // Settings win over defaults.
        let config = EngineConfig::resolve(&FileOverrides::default(), &store);
        assert_eq!(config.workers, 7);
        assert_eq!(config.discovery_interval, Duration::from_secs(90));
        // Unpinned evaluation tracks 2x discovery... unless the settings row
        // (seeded at 120) pins it, which it does here.
        assert_eq!(config.evaluation_interval, Duration::from_secs(120));

        // File wins over settings.
        let overrides = FileOverrides {
            workers: Some(2),
            evaluation_interval_secs: Some(45),
            ..FileOverrides::default()
        };
        let config = EngineConfig::resolve(&overrides, &store);
        assert_eq!(config.workers, 2);
        assert_eq!(config.evaluation_interval, Duration::from_secs(45));
    }
}
