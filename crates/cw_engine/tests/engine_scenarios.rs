//! End-to-end engine scenarios over the in-memory store and a scripted
//! SNMP transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cw_engine::{Engine, EngineConfig, SnmpConnector};
use cw_snmp::{oids, MemoryTransport, SnmpClient, SnmpError, SnmpValue};
use cw_store::{Cmts, EventType, Job, JobStatus, MatchType, Modem, ModemStatus, Rule, Store};

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

/// Connector handing out scripted transports keyed by endpoint IP.
#[derive(Default)]
struct MockConnector {
    cmts: Mutex<HashMap<String, Arc<MemoryTransport>>>,
    modems: Mutex<HashMap<String, Arc<MemoryTransport>>>,
}

impl MockConnector {
    fn register_cmts(&self, ip: &str, transport: Arc<MemoryTransport>) {
        self.cmts.lock().unwrap().insert(ip.to_string(), transport);
    }

    fn register_modem(&self, ip: &str, transport: Arc<MemoryTransport>) {
        self.modems.lock().unwrap().insert(ip.to_string(), transport);
    }
}

#[async_trait]
impl SnmpConnector for MockConnector {
    async fn cmts_session(&self, cmts: &Cmts) -> Result<SnmpClient, SnmpError> {
        self.cmts
            .lock()
            .unwrap()
            .get(&cmts.ip_address)
            .map(|t| SnmpClient::with_transport(Arc::clone(t) as Arc<dyn cw_snmp::SnmpTransport>))
            .ok_or_else(|| SnmpError::Connect {
                target: cmts.ip_address.clone(),
                detail: "no scripted CMTS transport".to_string(),
            })
    }

    async fn modem_session(
        &self,
        ip: &str,
        _community: &str,
        _port: u16,
    ) -> Result<SnmpClient, SnmpError> {
        self.modems
            .lock()
            .unwrap()
            .get(ip)
            .map(|t| SnmpClient::with_transport(Arc::clone(t) as Arc<dyn cw_snmp::SnmpTransport>))
            .ok_or_else(|| SnmpError::Connect {
                target: ip.to_string(),
                detail: "no scripted modem transport".to_string(),
            })
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        poll_interval: Duration::from_millis(50),
        discovery_interval: Duration::from_secs(3600),
        evaluation_interval: Duration::from_secs(3600),
        evaluation_warmup: Duration::ZERO,
        job_timeout: Duration::from_millis(500),
        monitor_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

fn lab_cmts() -> Cmts {
    Cmts {
        id: 0,
        name: "Lab".to_string(),
        ip_address: "192.0.2.1".to_string(),
        snmp_port: 161,
        community_read: "public".to_string(),
        community_write: Some("private".to_string()),
        cm_community_string: None,
        snmp_version: 2,
        enabled: true,
        created_at: 0,
        updated_at: 0,
    }
}

fn online_modem(cmts_id: i64, mac: &str, ip: &str) -> Modem {
    Modem {
        id: 0,
        cmts_id,
        mac_address: mac.to_string(),
        ip_address: ip.to_string(),
        sys_descr: "Arris SB8200 DOCSIS 3.1".to_string(),
        current_firmware: "1.0.0".to_string(),
        signal_level: 6.0,
        status: ModemStatus::Online,
        last_seen: 0,
    }
}

fn mac_range_rule(priority: i64, firmware: &str) -> Rule {
    Rule {
        id: 0,
        name: format!("range-{priority}"),
        description: String::new(),
        match_type: MatchType::MacRange,
        match_criteria: r#"{"start_mac":"00:01:5C:00:00:00","end_mac":"00:01:5C:FF:FF:FF"}"#
            .to_string(),
        tftp_server_ip: "192.0.2.50".to_string(),
        firmware_filename: firmware.to_string(),
        enabled: true,
        priority,
        created_at: 0,
        updated_at: 0,
    }
}

fn pending_job(store: &Store, mac: &str, cmts_id: i64, retry_count: u32) -> i64 {
    let modem = store
        .get_modem_by_mac(mac)
        .unwrap()
        .expect("modem fixture missing");
    let id = store
        .create_job(&Job {
            id: 0,
            modem_id: modem.id,
            rule_id: 1,
            cmts_id,
            mac_address: mac.to_string(),
            status: JobStatus::Pending,
            tftp_server_ip: "192.0.2.50".to_string(),
            firmware_filename: "arris-sb8200-v2.0.0.bin".to_string(),
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: 0,
            started_at: None,
            completed_at: None,
            retry_after: None,
        })
        .unwrap();
    if retry_count > 0 {
        let mut job = store.get_job(id).unwrap();
        job.retry_count = retry_count;
        store.update_job(&job).unwrap();
    }
    id
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// S1 - happy path + idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_mac_range_evaluation_is_idempotent() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:AA:BB:CC", "10.0.0.10"))
        .unwrap();
    store
        .create_rule(&mac_range_rule(100, "arris-sb8200-v2.0.0.bin"))
        .unwrap();

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );

    let created = engine.evaluate_rules().unwrap();
    assert_eq!(created, 1);

    let jobs = store.list_jobs(None, None).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert_eq!(jobs[0].mac_address, "00:01:5C:AA:BB:CC");
    assert_eq!(jobs[0].firmware_filename, "arris-sb8200-v2.0.0.bin");
    assert_eq!(jobs[0].tftp_server_ip, "192.0.2.50");
    assert_eq!(jobs[0].retry_count, 0);

    // Second pass with no state change creates nothing.
    let created = engine.evaluate_rules().unwrap();
    assert_eq!(created, 0);
    assert_eq!(store.list_jobs(None, None).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// S2 - eligibility filter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_offline_modems_are_not_evaluated() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();

    let mut a = online_modem(cmts_id, "00:01:5C:00:00:0A", "10.0.0.10");
    a.signal_level = 0.0;
    store.upsert_modem(&a).unwrap();

    let mut b = online_modem(cmts_id, "00:01:5C:00:00:0B", "10.0.0.11");
    b.signal_level = 0.0;
    b.status = ModemStatus::Offline;
    store.upsert_modem(&b).unwrap();

    store
        .create_rule(&Rule {
            match_type: MatchType::SysdescrRegex,
            match_criteria: r#"{"pattern":"Arris"}"#.to_string(),
            ..mac_range_rule(100, "fw-v2.0.0.bin")
        })
        .unwrap();

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );

    assert_eq!(engine.evaluate_rules().unwrap(), 1);
    let jobs = store.list_jobs(None, None).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].mac_address, "00:01:5C:00:00:0A");
}

// ---------------------------------------------------------------------------
// S3 - priority ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_highest_priority_rule_wins() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:11:22:33", "10.0.0.10"))
        .unwrap();

    store.create_rule(&mac_range_rule(100, "fw-A.bin")).unwrap();
    store
        .create_rule(&Rule {
            name: "regex-50".to_string(),
            match_type: MatchType::SysdescrRegex,
            match_criteria: r#"{"pattern":"Arris"}"#.to_string(),
            priority: 50,
            ..mac_range_rule(50, "fw-B.bin")
        })
        .unwrap();

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );

    assert_eq!(engine.evaluate_rules().unwrap(), 1);
    let jobs = store.list_jobs(None, None).unwrap();
    assert_eq!(jobs[0].firmware_filename, "fw-A.bin");
}

// ---------------------------------------------------------------------------
// S4 - pending sweep dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_sweep_holds_jobs_for_macs_in_progress() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:00:00:01", "10.0.0.10"))
        .unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:00:00:02", "10.0.0.11"))
        .unwrap();

    // First job for modem 1 is already being worked.
    let busy = pending_job(&store, "00:01:5C:00:00:01", cmts_id, 0);
    let mut job = store.get_job(busy).unwrap();
    job.status = JobStatus::InProgress;
    job.started_at = Some(chrono::Utc::now().timestamp());
    store.update_job(&job).unwrap();

    // Second job for the same MAC, plus one for a different modem.
    let held = pending_job(&store, "00:01:5C:00:00:01", cmts_id, 0);
    let free = pending_job(&store, "00:01:5C:00:00:02", cmts_id, 0);

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );

    engine.sweep_pending_jobs().unwrap();

    // Only the unrelated job was dispatched; the duplicate stays PENDING
    // until the first terminates.
    assert_eq!(engine.queued_jobs(), 1);
    assert_eq!(store.get_job(held).unwrap().status, JobStatus::Pending);
    assert_eq!(store.get_job(free).unwrap().status, JobStatus::Pending);
    assert_eq!(store.get_job(busy).unwrap().status, JobStatus::InProgress);
}

#[tokio::test]
async fn s4b_sweep_skips_jobs_for_vanished_modems() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:00:00:01", "10.0.0.10"))
        .unwrap();
    let job_id = pending_job(&store, "00:01:5C:00:00:01", cmts_id, 0);

    let modem = store
        .get_modem_by_mac("00:01:5C:00:00:01")
        .unwrap()
        .unwrap();
    store.delete_modem(modem.id).unwrap();

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );
    engine.sweep_pending_jobs().unwrap();

    let job = store.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert!(job.completed_at.is_some());
    assert_eq!(engine.queued_jobs(), 0);
}

// ---------------------------------------------------------------------------
// S5 - retry with backoff
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_transport_failure_requeues_with_backoff() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:AA:BB:CC", "10.0.0.10"))
        .unwrap();
    let job_id = pending_job(&store, "00:01:5C:AA:BB:CC", cmts_id, 1);

    // No modem transport registered: the session open fails as a transport
    // error every time.
    let cancel = CancellationToken::new();
    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        cancel.clone(),
    );
    let runner = tokio::spawn(Arc::clone(&engine).run());

    let before = chrono::Utc::now().timestamp();
    {
        let store = store.clone();
        wait_until(
            move || store.get_job(job_id).unwrap().retry_count == 2,
            "retry_count to reach 2",
        )
        .await;
    }

    let job = store.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.error_message.as_deref().unwrap_or("").contains("SNMP"));
    assert!(job.started_at.is_none());
    // backoff(2) = 60s; the row may not be dispatched again before then.
    let retry_after = job.retry_after.expect("retry_after set");
    assert!(retry_after >= before + 59, "retry_after too early: {retry_after}");

    // Several sweep cycles pass; the gate holds.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let job = store.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 2);

    cancel.cancel();
    runner.await.unwrap();
}

// ---------------------------------------------------------------------------
// S6 - terminal failure
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_exhausted_retries_go_terminal() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:AA:BB:CC", "10.0.0.10"))
        .unwrap();
    let job_id = pending_job(&store, "00:01:5C:AA:BB:CC", cmts_id, 3);

    let cancel = CancellationToken::new();
    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        cancel.clone(),
    );
    let runner = tokio::spawn(Arc::clone(&engine).run());

    {
        let store = store.clone();
        wait_until(
            move || store.get_job(job_id).unwrap().status == JobStatus::Failed,
            "job to go terminal",
        )
        .await;
    }

    let job = store.get_job(job_id).unwrap();
    assert!(job.completed_at.is_some());
    assert!(job.started_at.is_some());
    assert!(job.started_at.unwrap() <= job.completed_at.unwrap());
    assert_eq!(job.retry_count, 3);

    let failures: Vec<_> = store
        .list_activity(50, 0)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::UpgradeFailed)
        .collect();
    assert!(
        failures
            .iter()
            .any(|e| e.message.contains("after 3 attempts")),
        "terminal failure event should carry the attempt count"
    );

    cancel.cancel();
    runner.await.unwrap();
}

// ---------------------------------------------------------------------------
// Discovery end-to-end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovery_populates_inventory_and_drops_failures() {
    let store = Store::open_memory().unwrap();
    let mut cmts = lab_cmts();
    cmts.cm_community_string = Some("cm-priv".to_string());
    let cmts_id = store.create_cmts(&cmts).unwrap();

    let cmts_transport = Arc::new(MemoryTransport::new("cmts"));
    let mac_col = cw_snmp::oids::DOCS_IF_CMTS_CM_STATUS_MAC;
    cmts_transport.insert(
        format!("{mac_col}.1001"),
        SnmpValue::OctetString(vec![0x00, 0x01, 0x5C, 0x00, 0x00, 0x01]),
    );
    cmts_transport.insert(
        format!("{mac_col}.1002"),
        SnmpValue::OctetString(vec![0x00, 0x01, 0x5C, 0x00, 0x00, 0x02]),
    );
    cmts_transport.insert(
        format!("{mac_col}.1003"),
        SnmpValue::OctetString(vec![0x00, 0x01, 0x5C, 0x00, 0x00, 0x03]),
    );
    for (index, ip, power, status) in [
        ("1001", [10u8, 0, 0, 10], 65i64, 12i64),
        ("1002", [10, 0, 0, 11], -30, 2),
    ] {
        cmts_transport.insert(
            format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_IP),
            SnmpValue::IpAddress(ip),
        );
        cmts_transport.insert(
            format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_POWER),
            SnmpValue::Integer(power),
        );
        cmts_transport.insert(
            format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_VALUE),
            SnmpValue::Integer(status),
        );
    }
    // Third modem: the IP column errors, so the task drops it.
    cmts_transport.fail_oid(format!("{}.1003", oids::DOCS_IF_CMTS_CM_STATUS_IP));

    let connector = Arc::new(MockConnector::default());
    connector.register_cmts("192.0.2.1", Arc::clone(&cmts_transport));

    // Direct-to-modem sysDescr probe for the first modem only; the second
    // degrades to an empty sysDescr.
    let modem_transport = Arc::new(MemoryTransport::new("modem"));
    modem_transport.insert(
        oids::SYS_DESCR,
        SnmpValue::OctetString(b"Arris CM8200 DOCSIS 3.1 Cable Modem SW V 2.0.0".to_vec()),
    );
    connector.register_modem("10.0.0.10", modem_transport);

    let engine = Engine::new(
        store.clone(),
        connector,
        fast_config(),
        CancellationToken::new(),
    );

    let summary = engine.discover(cmts_id).await.unwrap();
    assert_eq!(summary.found, 3);
    assert_eq!(summary.upserted, 2);
    assert_eq!(summary.failed, 1);

    let first = store
        .get_modem_by_mac("00:01:5C:00:00:01")
        .unwrap()
        .unwrap();
    assert_eq!(first.ip_address, "10.0.0.10");
    assert_eq!(first.status, ModemStatus::Online);
    assert!((first.signal_level - 6.5).abs() < f64::EPSILON);
    assert_eq!(first.current_firmware, "2.0.0");
    assert!(first.last_seen > 0);

    let second = store
        .get_modem_by_mac("00:01:5C:00:00:02")
        .unwrap()
        .unwrap();
    assert_eq!(second.status, ModemStatus::Offline);
    assert!((second.signal_level + 3.0).abs() < f64::EPSILON);
    assert_eq!(second.sys_descr, "");

    assert!(store.get_modem_by_mac("00:01:5C:00:00:03").unwrap().is_none());

    // Discovery summary lands in the activity log.
    let events = store.list_activity(10, 0).unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ModemDiscovered));
}

#[tokio::test]
async fn discovery_refuses_disabled_cmts() {
    let store = Store::open_memory().unwrap();
    let mut cmts = lab_cmts();
    cmts.enabled = false;
    let cmts_id = store.create_cmts(&cmts).unwrap();

    let engine = Engine::new(
        store,
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );
    assert!(engine.discover(cmts_id).await.is_err());
}

// ---------------------------------------------------------------------------
// Upgrade end-to-end
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upgrade_completes_with_ordered_sets() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:AA:BB:CC", "10.0.0.10"))
        .unwrap();
    let job_id = pending_job(&store, "00:01:5C:AA:BB:CC", cmts_id, 0);

    let modem_transport = Arc::new(MemoryTransport::new("modem"));
    modem_transport.insert(
        oids::SYS_DESCR,
        SnmpValue::OctetString(b"Arris SB8200".to_vec()),
    );
    // completeFromMgt
    modem_transport.insert(oids::DOCS_DEV_SW_OPER_STATUS, SnmpValue::Integer(3));

    let connector = Arc::new(MockConnector::default());
    connector.register_modem("10.0.0.10", Arc::clone(&modem_transport));

    let cancel = CancellationToken::new();
    let engine = Engine::new(store.clone(), connector, fast_config(), cancel.clone());
    let runner = tokio::spawn(Arc::clone(&engine).run());

    {
        let store = store.clone();
        wait_until(
            move || store.get_job(job_id).unwrap().status == JobStatus::Completed,
            "job to complete",
        )
        .await;
    }

    let job = store.get_job(job_id).unwrap();
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.started_at.unwrap() <= job.completed_at.unwrap());

    // The trigger SETs went out in protocol order.
    let sets = modem_transport.sets();
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[0].0, oids::DOCS_DEV_SW_SERVER);
    assert_eq!(sets[1].0, oids::DOCS_DEV_SW_FILENAME);
    assert_eq!(sets[2].0, oids::DOCS_DEV_SW_ADMIN_STATUS);
    assert_eq!(sets[2].1, SnmpValue::Integer(1));

    let events = store.list_activity(50, 0).unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::UpgradeStarted));
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::UpgradeCompleted));

    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upgrade_times_out_when_modem_never_finishes() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:AA:BB:CC", "10.0.0.10"))
        .unwrap();
    // Last allowed attempt: a timeout goes straight to FAILED.
    let job_id = pending_job(&store, "00:01:5C:AA:BB:CC", cmts_id, 2);

    let modem_transport = Arc::new(MemoryTransport::new("modem"));
    modem_transport.insert(
        oids::SYS_DESCR,
        SnmpValue::OctetString(b"Arris SB8200".to_vec()),
    );
    modem_transport.insert(oids::DOCS_DEV_SW_OPER_STATUS, SnmpValue::Integer(1));

    let connector = Arc::new(MockConnector::default());
    connector.register_modem("10.0.0.10", Arc::clone(&modem_transport));

    let cancel = CancellationToken::new();
    let engine = Engine::new(store.clone(), connector, fast_config(), cancel.clone());
    let runner = tokio::spawn(Arc::clone(&engine).run());

    {
        let store = store.clone();
        wait_until(
            move || store.get_job(job_id).unwrap().status == JobStatus::Failed,
            "job to time out",
        )
        .await;
    }

    let job = store.get_job(job_id).unwrap();
    assert!(job
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("timeout"));

    cancel.cancel();
    runner.await.unwrap();
}

// ---------------------------------------------------------------------------
// Startup recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphaned_in_progress_jobs_recover_to_pending() {
    let store = Store::open_memory().unwrap();
    let cmts_id = store.create_cmts(&lab_cmts()).unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:00:00:01", "10.0.0.10"))
        .unwrap();
    store
        .upsert_modem(&online_modem(cmts_id, "00:01:5C:00:00:02", "10.0.0.11"))
        .unwrap();

    // One stale orphan, one fresh in-progress row.
    let stale = pending_job(&store, "00:01:5C:00:00:01", cmts_id, 0);
    let mut job = store.get_job(stale).unwrap();
    job.status = JobStatus::InProgress;
    job.started_at = Some(chrono::Utc::now().timestamp() - 3600);
    store.update_job(&job).unwrap();

    let fresh = pending_job(&store, "00:01:5C:00:00:02", cmts_id, 0);
    let mut job = store.get_job(fresh).unwrap();
    job.status = JobStatus::InProgress;
    job.started_at = Some(chrono::Utc::now().timestamp());
    store.update_job(&job).unwrap();

    let engine = Engine::new(
        store.clone(),
        Arc::new(MockConnector::default()),
        fast_config(),
        CancellationToken::new(),
    );
    engine.recover_orphaned_jobs().unwrap();

    assert_eq!(store.get_job(stale).unwrap().status, JobStatus::Pending);
    assert_eq!(store.get_job(fresh).unwrap().status, JobStatus::InProgress);
}
