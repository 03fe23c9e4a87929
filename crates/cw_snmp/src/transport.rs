//! Wire-level transport abstraction
//!
//! The engine only ever sees this trait: the real UDP session and the
//! in-memory double used by tests implement the same three verbs.

use async_trait::async_trait;

use crate::SnmpError;

/// An owned SNMP value, decoupled from any response buffer lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    IpAddress([u8; 4]),
    Counter32(u32),
    Unsigned32(u32),
    Timeticks(u32),
    Counter64(u64),
    Oid(String),
    Null,
}

impl SnmpValue {
    /// Integer-family value as i64, if this is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) | SnmpValue::Unsigned32(v) | SnmpValue::Timeticks(v) => {
                Some(i64::from(*v))
            }
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SnmpValue::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Octet string rendered as UTF-8 (lossy).
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Dotted IPv4 form, accepting either the IpAddress type or a 4-byte
    /// octet string (some agents answer with the latter).
    #[must_use]
    pub fn as_ipv4(&self) -> Option<String> {
        let octets = match self {
            SnmpValue::IpAddress(octets) => *octets,
            SnmpValue::OctetString(bytes) if bytes.len() == 4 => {
                [bytes[0], bytes[1], bytes[2], bytes[3]]
            }
            _ => return None,
        };
        Some(format!(
            "{}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        ))
    }
}

/// The three verbs the adapter needs from a session.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Read a single value.
    async fn get(&self, oid: &str) -> Result<SnmpValue, SnmpError>;

    /// Write a single value; the three upgrade SETs go through here in
    /// strict order.
    async fn set(&self, oid: &str, value: SnmpValue) -> Result<(), SnmpError>;

    /// Enumerate an entire table column under `base_oid`, returning
    /// `(full_oid, value)` pairs in table order.
    async fn walk(&self, base_oid: &str) -> Result<Vec<(String, SnmpValue)>, SnmpError>;

    /// Human-readable endpoint description for log and error context.
    fn target(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_family_coercion() {
        assert_eq!(SnmpValue::Integer(12).as_i64(), Some(12));
        assert_eq!(SnmpValue::Counter32(7).as_i64(), Some(7));
        assert_eq!(SnmpValue::Counter64(u64::MAX).as_i64(), None);
        assert_eq!(SnmpValue::Null.as_i64(), None);
    }

    #[test]
    fn ipv4_from_both_encodings() {
        assert_eq!(
            SnmpValue::IpAddress([10, 0, 0, 5]).as_ipv4().unwrap(),
            "10.0.0.5"
        );
        assert_eq!(
            SnmpValue::OctetString(vec![192, 0, 2, 1]).as_ipv4().unwrap(),
            "192.0.2.1"
        );
        assert!(SnmpValue::OctetString(vec![1, 2, 3]).as_ipv4().is_none());
    }

    #[test]
    fn text_rendering() {
        let value = SnmpValue::OctetString(b"Arris SB8200".to_vec());
        assert_eq!(value.as_text().unwrap(), "Arris SB8200");
        assert!(SnmpValue::Integer(1).as_text().is_none());
    }
}
