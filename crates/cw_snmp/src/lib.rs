//! `cw_snmp` - DOCSIS SNMP adapter for Cableward
//!
//! This crate provides:
//! - The `SnmpTransport` abstraction over the wire-level SNMP library
//! - A UDP transport (one session per adapter) and an in-memory test double
//! - The typed `SnmpClient`: MAC-table walks, per-modem detail GETs, the
//!   ordered firmware-trigger SET sequence, and status decoding
//!
//! Sessions are owned by the caller for the duration of an operation and are
//! never shared across concurrent activities.

use std::time::Duration;

use thiserror::Error;

pub mod client;
pub mod mock;
pub mod oids;
pub mod transport;
pub mod udp;

pub use client::{SnmpClient, UpgradeStatus};
pub use mock::MemoryTransport;
pub use transport::{SnmpTransport, SnmpValue};
pub use udp::UdpTransport;

/// Per-request timeout for GET/SET/walk exchanges.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries per GET/SET request on top of the request timeout.
pub const REQUEST_RETRIES: u32 = 3;

/// Wall-clock ceiling for opening a session.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Cap on OIDs fetched per bulk request.
pub const MAX_OIDS_PER_REQUEST: u32 = 60;

/// SNMP adapter errors. Transport-level failures (unreachable, timed out)
/// are kept distinct from semantic ones (the agent answered and said no) so
/// operators can tell the two apart.
#[derive(Error, Debug)]
pub enum SnmpError {
    #[error("failed to open SNMP session to {target}: {detail}")]
    Connect { target: String, detail: String },

    #[error("SNMP request to {target} timed out after {REQUEST_RETRIES} retries")]
    Timeout { target: String },

    #[error("SNMP transport error ({target}): {detail}")]
    Transport { target: String, detail: String },

    #[error("SNMP SET of {oid} rejected by {target}: {detail}")]
    SetRejected {
        target: String,
        oid: String,
        detail: String,
    },

    #[error("no value at {oid} on {target}")]
    NoSuchValue { target: String, oid: String },

    #[error("could not decode SNMP value: {0}")]
    Decode(String),
}

impl SnmpError {
    /// True for failures that indicate the endpoint never answered, as
    /// opposed to answering with an error.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SnmpError::Connect { .. } | SnmpError::Timeout { .. } | SnmpError::Transport { .. }
        )
    }
}
