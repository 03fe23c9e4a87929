//! Typed DOCSIS client on top of a transport
//!
//! One client wraps one session, bound either to a CMTS (discovery walks and
//! per-index GETs) or directly to a modem (sysDescr, the firmware trigger,
//! and progress polling).

use std::net::Ipv4Addr;
use std::sync::Arc;

use cw_store::{Cmts, MacAddr, ModemStatus};
use tracing::{debug, info, warn};

use crate::oids;
use crate::transport::{SnmpTransport, SnmpValue};
use crate::udp::UdpTransport;
use crate::SnmpError;

/// Progress of a firmware load as reported by docsDevSwOperStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    InProgress,
    Completed,
    Failed,
    Unknown,
}

impl UpgradeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeStatus::InProgress => "in_progress",
            UpgradeStatus::Completed => "completed",
            UpgradeStatus::Failed => "failed",
            UpgradeStatus::Unknown => "unknown",
        }
    }
}

/// One `(interface index, MAC)` pair off the CMTS status table.
#[derive(Debug, Clone)]
pub struct DiscoveredModem {
    /// OID suffix under the MAC column; index for the sibling columns.
    pub index: String,
    pub mac: MacAddr,
}

pub struct SnmpClient {
    transport: Arc<dyn SnmpTransport>,
}

impl SnmpClient {
    /// Open a session to a CMTS using its read community.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError::Connect`] when the session cannot be opened
    /// within the connect ceiling.
    pub async fn connect_cmts(cmts: &Cmts) -> Result<Self, SnmpError> {
        let transport = UdpTransport::connect(
            &cmts.ip_address,
            cmts.snmp_port,
            &cmts.community_read,
            cmts.snmp_version,
        )
        .await?;
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Open a session directly to a modem with a write-capable community.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError::Connect`] when the session cannot be opened
    /// within the connect ceiling.
    pub async fn connect_modem(ip: &str, community: &str, port: u16) -> Result<Self, SnmpError> {
        let transport = UdpTransport::connect(ip, port, community, 2).await?;
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Wrap an existing transport (tests use this with the in-memory mock).
    #[must_use]
    pub fn with_transport(transport: Arc<dyn SnmpTransport>) -> Self {
        Self { transport }
    }

    /// Endpoint description for logging.
    #[must_use]
    pub fn target(&self) -> String {
        self.transport.target()
    }

    /// Walk the docsIfCmtsCmStatus MAC column, returning every modem the
    /// head-end currently knows about. Rows that do not carry a 6-byte MAC
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError`] when the walk itself fails.
    pub async fn discover_modems(&self) -> Result<Vec<DiscoveredModem>, SnmpError> {
        let rows = self.transport.walk(oids::DOCS_IF_CMTS_CM_STATUS_MAC).await?;

        let mut modems = Vec::with_capacity(rows.len());
        for (oid, value) in rows {
            let Some(index) = oid
                .strip_prefix(oids::DOCS_IF_CMTS_CM_STATUS_MAC)
                .and_then(|s| s.strip_prefix('.'))
            else {
                continue;
            };

            match value.as_bytes() {
                Some(bytes) if bytes.len() == 6 => {
                    let mac = MacAddr::from_octets([
                        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
                    ]);
                    modems.push(DiscoveredModem {
                        index: index.to_string(),
                        mac,
                    });
                }
                _ => {
                    warn!(oid = %oid, "Skipping walk row without a parseable MAC");
                }
            }
        }

        debug!(target = %self.target(), modems = modems.len(), "MAC table walk complete");
        Ok(modems)
    }

    /// # Errors
    ///
    /// Returns [`SnmpError`] when the GET fails or the value is not an
    /// address.
    pub async fn get_modem_ip(&self, index: &str) -> Result<String, SnmpError> {
        let oid = format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_IP);
        let value = self.transport.get(&oid).await?;
        value
            .as_ipv4()
            .ok_or_else(|| SnmpError::Decode(format!("no IP address at {oid}")))
    }

    /// Downstream power in dBmV (the wire carries tenths).
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError`] when the GET fails or the value is not numeric.
    pub async fn get_signal_level(&self, index: &str) -> Result<f64, SnmpError> {
        let oid = format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_POWER);
        let value = self.transport.get(&oid).await?;
        let tenths = value
            .as_i64()
            .ok_or_else(|| SnmpError::Decode(format!("non-numeric power at {oid}")))?;
        Ok(tenths as f64 / 10.0)
    }

    /// Registration state of a modem, decoded per the DOCSIS status table.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError`] when the GET fails or the value is not numeric.
    pub async fn get_modem_status(&self, index: &str) -> Result<ModemStatus, SnmpError> {
        let oid = format!("{}.{index}", oids::DOCS_IF_CMTS_CM_STATUS_VALUE);
        let value = self.transport.get(&oid).await?;
        let raw = value
            .as_i64()
            .ok_or_else(|| SnmpError::Decode(format!("non-numeric status at {oid}")))?;
        Ok(decode_modem_status(raw))
    }

    /// sysDescr of whatever endpoint this session is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError`] when the GET fails.
    pub async fn get_sys_descr(&self) -> Result<String, SnmpError> {
        let value = self.transport.get(oids::SYS_DESCR).await?;
        value
            .as_text()
            .ok_or_else(|| SnmpError::Decode("sysDescr is not an octet string".to_string()))
    }

    /// Issue the firmware trigger sequence: TFTP server, filename, then
    /// admin-status 1 (upgradeFromMgt). Order is mandatory and a failure at
    /// any step aborts the rest. A liveness GET of sysDescr runs first so an
    /// unreachable modem fails fast instead of half-configuring.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError::Transport`] when the endpoint is unreachable,
    /// [`SnmpError::Decode`] for a malformed TFTP address, and
    /// [`SnmpError::SetRejected`] when the agent refuses a SET.
    pub async fn trigger_firmware_upgrade(
        &self,
        tftp_server: &str,
        filename: &str,
    ) -> Result<(), SnmpError> {
        self.get_sys_descr().await.map_err(|err| {
            warn!(target = %self.target(), error = %err, "Liveness check before upgrade failed");
            err
        })?;

        let server: Ipv4Addr = tftp_server
            .parse()
            .map_err(|_| SnmpError::Decode(format!("invalid TFTP server address {tftp_server}")))?;

        self.transport
            .set(
                oids::DOCS_DEV_SW_SERVER,
                SnmpValue::IpAddress(server.octets()),
            )
            .await?;
        debug!(target = %self.target(), tftp_server, "TFTP server set");

        self.transport
            .set(
                oids::DOCS_DEV_SW_FILENAME,
                SnmpValue::OctetString(filename.as_bytes().to_vec()),
            )
            .await?;
        debug!(target = %self.target(), filename, "Firmware filename set");

        self.transport
            .set(oids::DOCS_DEV_SW_ADMIN_STATUS, SnmpValue::Integer(1))
            .await?;

        info!(target = %self.target(), tftp_server, filename, "Firmware upgrade triggered");
        Ok(())
    }

    /// Poll docsDevSwOperStatus for upgrade progress.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError`] when the GET fails.
    pub async fn check_upgrade_status(&self) -> Result<UpgradeStatus, SnmpError> {
        let value = self.transport.get(oids::DOCS_DEV_SW_OPER_STATUS).await?;
        Ok(match value.as_i64() {
            Some(1) => UpgradeStatus::InProgress,
            Some(2 | 3) => UpgradeStatus::Completed,
            Some(4) => UpgradeStatus::Failed,
            _ => UpgradeStatus::Unknown,
        })
    }
}

/// docsIfCmtsCmStatusValue decoding. 12 = operational, 13 = accessDenied,
/// 1..=3 = other/notReady/notSynchronized; everything else is a partial
/// registration state.
#[must_use]
pub fn decode_modem_status(raw: i64) -> ModemStatus {
    match raw {
        12 => ModemStatus::Online,
        13 => ModemStatus::Denied,
        1..=3 => ModemStatus::Offline,
        _ => ModemStatus::Partial,
    }
}

/// Best-effort firmware version out of a modem's sysDescr. Understands the
/// two common vendor spellings:
/// `... SW_REV: SB6141-7.0.0.1-SCM01-SHPC ...` and `... SW V 1.2.3`
/// (with or without the space after the `V`, either case).
#[must_use]
pub fn extract_firmware_from_sys_descr(sys_descr: &str) -> String {
    // Byte offsets below come from the uppercased copy; vendor strings are
    // ASCII in practice and anything else is not worth guessing at.
    if sys_descr.is_empty() || !sys_descr.is_ascii() {
        return String::new();
    }

    let upper = sys_descr.to_uppercase();

    if let Some(idx) = upper.find("SW_REV:") {
        let rest = &sys_descr[idx + "SW_REV:".len()..];
        if let Some(token) = rest.split_whitespace().next() {
            return token.trim_end_matches(';').to_string();
        }
    }

    if let Some(idx) = upper.find("SW V") {
        // Skip the whole marker: the version token may sit flush against the
        // V ("SW v1.2.3") or after whitespace ("SW V 1.2.3").
        let rest = &sys_descr[idx + "SW V".len()..];
        if let Some(token) = rest.split_whitespace().next() {
            return token.trim_start_matches(['v', 'V']).to_string();
        }
    }

    String::new()
}
