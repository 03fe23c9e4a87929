//! UDP transport backed by the `snmp2` crate
//!
//! One synchronous session per transport, driven from async callers through
//! `spawn_blocking`. The session's receive timeout bounds each exchange; the
//! transport adds the retry loop on top.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use snmp2::{Oid, SyncSession, Value};
use tracing::debug;

use crate::transport::{SnmpTransport, SnmpValue};
use crate::{SnmpError, CONNECT_TIMEOUT, MAX_OIDS_PER_REQUEST, REQUEST_RETRIES, REQUEST_TIMEOUT};

pub struct UdpTransport {
    session: Arc<Mutex<SyncSession>>,
    target: String,
}

impl UdpTransport {
    /// Open a session to `host:port`, failing if the socket is not ready
    /// within [`CONNECT_TIMEOUT`]. SNMP v3 endpoints are spoken to as v2c;
    /// credentialed v3 is not carried here.
    ///
    /// # Errors
    ///
    /// Returns [`SnmpError::Connect`] naming the host, port, version, and
    /// community on any setup failure.
    pub async fn connect(
        host: &str,
        port: u16,
        community: &str,
        version: u8,
    ) -> Result<Self, SnmpError> {
        let target = format!("{host}:{port} (v{version}, community '{community}')");
        let addr = format!("{host}:{port}");
        let community_bytes = community.as_bytes().to_vec();

        let connect = tokio::task::spawn_blocking(move || {
            if version == 1 {
                SyncSession::new_v1(addr.as_str(), &community_bytes, Some(REQUEST_TIMEOUT), 0)
            } else {
                SyncSession::new_v2c(addr.as_str(), &community_bytes, Some(REQUEST_TIMEOUT), 0)
            }
        });

        let session = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| SnmpError::Connect {
                target: target.clone(),
                detail: format!("no session within {}s", CONNECT_TIMEOUT.as_secs()),
            })?
            .map_err(|join| SnmpError::Connect {
                target: target.clone(),
                detail: join.to_string(),
            })?
            .map_err(|err| SnmpError::Connect {
                target: target.clone(),
                detail: format!("{err:?}"),
            })?;

        debug!(target = %target, "SNMP session established");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            target,
        })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, SnmpError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SyncSession) -> Result<T, SnmpError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap();
            op(&mut guard)
        })
        .await
        .map_err(|join| SnmpError::Transport {
            target,
            detail: join.to_string(),
        })?
    }
}

fn parse_oid(raw: &str) -> Result<Oid<'static>, SnmpError> {
    let parts = raw
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| SnmpError::Decode(format!("bad OID component in {raw}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Oid::from(parts.as_slice()).map_err(|_| SnmpError::Decode(format!("bad OID {raw}")))
}

fn to_owned_value(target: &str, oid: &str, value: &Value<'_>) -> Result<SnmpValue, SnmpError> {
    Ok(match value {
        Value::Integer(v) => SnmpValue::Integer(*v),
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::IpAddress(octets) => SnmpValue::IpAddress(*octets),
        Value::Counter32(v) => SnmpValue::Counter32(*v),
        Value::Unsigned32(v) => SnmpValue::Unsigned32(*v),
        Value::Timeticks(v) => SnmpValue::Timeticks(*v),
        Value::Counter64(v) => SnmpValue::Counter64(*v),
        Value::ObjectIdentifier(inner) => SnmpValue::Oid(inner.to_string()),
        Value::Null => SnmpValue::Null,
        Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {
            return Err(SnmpError::NoSuchValue {
                target: target.to_string(),
                oid: oid.to_string(),
            })
        }
        other => {
            return Err(SnmpError::Decode(format!(
                "unexpected value type at {oid}: {other:?}"
            )))
        }
    })
}

fn to_wire_value(value: &SnmpValue) -> Result<Value<'_>, SnmpError> {
    Ok(match value {
        SnmpValue::Integer(v) => Value::Integer(*v),
        SnmpValue::OctetString(bytes) => Value::OctetString(bytes),
        SnmpValue::IpAddress(octets) => Value::IpAddress(*octets),
        SnmpValue::Counter32(v) => Value::Counter32(*v),
        SnmpValue::Unsigned32(v) => Value::Unsigned32(*v),
        other => {
            return Err(SnmpError::Decode(format!(
                "value type not settable: {other:?}"
            )))
        }
    })
}

#[async_trait]
impl SnmpTransport for UdpTransport {
    async fn get(&self, oid: &str) -> Result<SnmpValue, SnmpError> {
        let mut last_err = None;

        for attempt in 0..REQUEST_RETRIES {
            let oid_owned = oid.to_string();
            let target = self.target.clone();
            let result = self
                .run_blocking(move |session| {
                    let parsed = parse_oid(&oid_owned)?;
                    let pdu = session.get(&parsed).map_err(|err| SnmpError::Transport {
                        target: target.clone(),
                        detail: format!("{err:?}"),
                    })?;
                    let mut varbinds = pdu.varbinds;
                    match varbinds.next() {
                        Some((_, value)) => to_owned_value(&target, &oid_owned, &value),
                        None => Err(SnmpError::NoSuchValue {
                            target,
                            oid: oid_owned.clone(),
                        }),
                    }
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transport() => {
                    debug!(oid, attempt, error = %err, "SNMP GET attempt failed");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or(SnmpError::Timeout {
            target: self.target.clone(),
        }))
    }

    async fn set(&self, oid: &str, value: SnmpValue) -> Result<(), SnmpError> {
        let oid_owned = oid.to_string();
        let target = self.target.clone();
        self.run_blocking(move |session| {
            let parsed = parse_oid(&oid_owned)?;
            let wire = to_wire_value(&value)?;
            session
                .set(&[(&parsed, wire)])
                .map_err(|err| SnmpError::SetRejected {
                    target: target.clone(),
                    oid: oid_owned.clone(),
                    detail: format!("{err:?}"),
                })?;
            Ok(())
        })
        .await
    }

    async fn walk(&self, base_oid: &str) -> Result<Vec<(String, SnmpValue)>, SnmpError> {
        let base = base_oid.to_string();
        let target = self.target.clone();
        self.run_blocking(move |session| {
            let prefix = format!("{base}.");
            let mut results = Vec::new();
            let mut cursor = base.clone();

            loop {
                let parsed = parse_oid(&cursor)?;
                let pdu = session
                    .getbulk(&[&parsed], 0, MAX_OIDS_PER_REQUEST)
                    .map_err(|err| SnmpError::Transport {
                        target: target.clone(),
                        detail: format!("{err:?}"),
                    })?;

                let mut page_tail = None;
                let mut done = false;
                for (oid, value) in pdu.varbinds {
                    let oid_str = oid.to_string();
                    if !oid_str.starts_with(&prefix) {
                        done = true;
                        break;
                    }
                    match to_owned_value(&target, &oid_str, &value) {
                        Ok(owned) => {
                            page_tail = Some(oid_str.clone());
                            results.push((oid_str, owned));
                        }
                        // EndOfMibView lands here.
                        Err(SnmpError::NoSuchValue { .. }) => {
                            done = true;
                            break;
                        }
                        Err(err) => return Err(err),
                    }
                }

                match page_tail {
                    Some(tail) if !done => cursor = tail,
                    _ => break,
                }
            }

            Ok(results)
        })
        .await
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}
