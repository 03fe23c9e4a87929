//! Discovery coordinator
//!
//! One run per CMTS: walk the MAC table once, then fan per-modem detail
//! polls out across a bounded set of tasks throttled by a shared rate gate
//! so the head-end is not overwhelmed. Results funnel through a
//! single-consumer channel into the store, serializing row writes per run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use cw_snmp::client::{extract_firmware_from_sys_descr, DiscoveredModem};
use cw_snmp::SnmpClient;
use cw_store::{ActivityEvent, Cmts, EventType, Modem};

use crate::{Engine, EngineError};

/// Outcome of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoverySummary {
    pub cmts_id: i64,
    /// Rows in the MAC table walk.
    pub found: usize,
    /// Modems written to the inventory.
    pub upserted: usize,
    /// Modems dropped because a detail poll failed.
    pub failed: usize,
    pub duration: Duration,
}

/// Token-dispensing clock bounding sustained query rate across the fan-out.
struct RateGate {
    ticker: Mutex<tokio::time::Interval>,
}

impl RateGate {
    fn new(per_second: u32) -> Self {
        let period = Duration::from_secs(1) / per_second.max(1);
        Self {
            ticker: Mutex::new(tokio::time::interval(period)),
        }
    }

    async fn wait(&self) {
        self.ticker.lock().await.tick().await;
    }
}

impl Engine {
    /// Discover one CMTS end-to-end. Individual modem failures are logged
    /// and dropped; the run itself only fails when the CMTS cannot be
    /// loaded, is disabled, or the table walk fails.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for the whole-run failures above.
    pub async fn discover(&self, cmts_id: i64) -> Result<DiscoverySummary, EngineError> {
        let cmts = self.store.get_cmts(cmts_id)?;
        if !cmts.enabled {
            return Err(EngineError::CmtsDisabled(cmts_id));
        }

        let started = Instant::now();
        info!(cmts_id, cmts = %cmts.name, "Starting modem discovery");

        let client = self.connector.cmts_session(&cmts).await?;
        let batch = client.discover_modems().await?;
        let found = batch.len();

        let (tx, mut rx) = mpsc::channel::<Modem>(64);

        // Single consumer serializes the upserts for this run.
        let store = self.store.clone();
        let consumer = tokio::spawn(async move {
            let mut upserted = 0usize;
            while let Some(modem) = rx.recv().await {
                match store.upsert_modem(&modem) {
                    Ok(()) => upserted += 1,
                    Err(err) => {
                        error!(mac = %modem.mac_address, error = %err, "Failed to upsert modem");
                    }
                }
            }
            upserted
        });

        let gate = RateGate::new(self.config.discovery_rate_limit);
        let failed = AtomicUsize::new(0);

        futures::stream::iter(batch)
            .for_each_concurrent(self.config.discovery_workers.max(1), |discovered| {
                let tx = tx.clone();
                let client = &client;
                let cmts = &cmts;
                let gate = &gate;
                let failed = &failed;
                async move {
                    if self.cancel_token().is_cancelled() {
                        return;
                    }
                    gate.wait().await;

                    match self.poll_modem_details(client, cmts, &discovered).await {
                        Ok(modem) => {
                            let _ = tx.send(modem).await;
                        }
                        Err(err) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                mac = %discovered.mac,
                                index = %discovered.index,
                                error = %err,
                                "Dropping modem from discovery batch"
                            );
                        }
                    }
                }
            })
            .await;
        drop(tx);

        let upserted = consumer.await.unwrap_or(0);
        let summary = DiscoverySummary {
            cmts_id,
            found,
            upserted,
            failed: failed.load(Ordering::Relaxed),
            duration: started.elapsed(),
        };

        info!(
            cmts_id,
            cmts = %cmts.name,
            found = summary.found,
            upserted = summary.upserted,
            failed = summary.failed,
            duration_ms = summary.duration.as_millis() as u64,
            "Modem discovery completed"
        );

        self.store.log_activity_best_effort(
            &ActivityEvent::new(
                EventType::ModemDiscovered,
                "cmts",
                cmts_id,
                format!("Discovered {} modems on CMTS {}", summary.upserted, cmts.name),
            )
            .with_details(serde_json::json!({
                "found": summary.found,
                "upserted": summary.upserted,
                "failed": summary.failed,
                "duration_ms": summary.duration.as_millis() as u64,
            })),
        );

        Ok(summary)
    }

    /// The three-or-four GETs for one modem. Any required GET failing drops
    /// the modem from this run; the direct sysDescr probe is best-effort.
    async fn poll_modem_details(
        &self,
        client: &SnmpClient,
        cmts: &Cmts,
        discovered: &DiscoveredModem,
    ) -> Result<Modem, EngineError> {
        let ip_address = client.get_modem_ip(&discovered.index).await?;
        let signal_level = client.get_signal_level(&discovered.index).await?;
        let status = client.get_modem_status(&discovered.index).await?;

        let sys_descr = match cmts.cm_community_string.as_deref() {
            Some(community) if !community.is_empty() && !ip_address.is_empty() => {
                self.probe_sys_descr(&ip_address, community).await
            }
            _ => String::new(),
        };

        Ok(Modem {
            id: 0,
            cmts_id: cmts.id,
            mac_address: discovered.mac.to_string(),
            ip_address,
            current_firmware: extract_firmware_from_sys_descr(&sys_descr),
            sys_descr,
            signal_level,
            status,
            last_seen: 0,
        })
    }

    /// Direct-to-modem sysDescr. Unreachable modems are common mid-reboot,
    /// so failures degrade to an empty string.
    async fn probe_sys_descr(&self, ip: &str, community: &str) -> String {
        match self.connector.modem_session(ip, community, 161).await {
            Ok(session) => match session.get_sys_descr().await {
                Ok(descr) => descr,
                Err(err) => {
                    debug!(ip, error = %err, "sysDescr probe failed");
                    String::new()
                }
            },
            Err(err) => {
                debug!(ip, error = %err, "Could not open modem session for sysDescr probe");
                String::new()
            }
        }
    }

    /// Launch a detached discovery per enabled CMTS and return immediately
    /// with the number launched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only when the CMTS list cannot be read.
    pub fn discover_all(self: &std::sync::Arc<Self>) -> Result<usize, EngineError> {
        let cmts_list = self.store.list_cmts()?;

        let mut launched = 0;
        for cmts in cmts_list {
            if !cmts.enabled {
                debug!(cmts = %cmts.name, "Skipping disabled CMTS");
                continue;
            }

            let engine = std::sync::Arc::clone(self);
            let (id, name) = (cmts.id, cmts.name);
            tokio::spawn(async move {
                if let Err(err) = engine.discover(id).await {
                    error!(cmts_id = id, cmts = %name, error = %err, "Scheduled discovery failed");
                }
            });
            launched += 1;
        }

        if launched > 0 {
            info!(cmts_count = launched, "Triggered discovery for all enabled CMTS");
        }
        Ok(launched)
    }
}

