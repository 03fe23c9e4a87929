//! Session construction seam
//!
//! The engine never builds transports directly; it asks a connector for a
//! client bound to a CMTS or to a modem. Production uses UDP sessions, tests
//! substitute in-memory transports.

use async_trait::async_trait;

use cw_snmp::{SnmpClient, SnmpError};
use cw_store::Cmts;

#[async_trait]
pub trait SnmpConnector: Send + Sync {
    /// Session to a head-end using its read community.
    async fn cmts_session(&self, cmts: &Cmts) -> Result<SnmpClient, SnmpError>;

    /// Session directly to a modem with a write-capable community.
    async fn modem_session(
        &self,
        ip: &str,
        community: &str,
        port: u16,
    ) -> Result<SnmpClient, SnmpError>;
}

/// Production connector: one UDP session per call.
#[derive(Debug, Default)]
pub struct UdpConnector;

#[async_trait]
impl SnmpConnector for UdpConnector {
    async fn cmts_session(&self, cmts: &Cmts) -> Result<SnmpClient, SnmpError> {
        SnmpClient::connect_cmts(cmts).await
    }

    async fn modem_session(
        &self,
        ip: &str,
        community: &str,
        port: u16,
    ) -> Result<SnmpClient, SnmpError> {
        SnmpClient::connect_modem(ip, community, port).await
    }
}
