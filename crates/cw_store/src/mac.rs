//! MAC address normalization
//!
//! Modem MACs arrive in whatever notation the head-end or the operator used:
//! colon, hyphen, Cisco dot-triplet, or bare hex. Everything is normalized to
//! a 48-bit integer and rendered back in the canonical uppercase
//! `XX:XX:XX:XX:XX:XX` form the rest of the system keys on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 48-bit MAC address, ordered and compared as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr(u64);

/// Error returned when a MAC address string cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError(String);

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address: {}", self.0)
    }
}

impl std::error::Error for MacParseError {}

impl MacAddr {
    /// Parse any of the accepted notations, case-insensitive:
    /// `00:01:5C:AA:BB:CC`, `00-01-5C-AA-BB-CC`, `0001.5CAA.BBCC`,
    /// `00015CAABBCC`.
    ///
    /// # Errors
    ///
    /// Returns [`MacParseError`] when the input does not reduce to exactly
    /// twelve hex digits.
    pub fn parse(raw: &str) -> Result<Self, MacParseError> {
        let hex: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacParseError(raw.trim().to_string()));
        }

        let value = u64::from_str_radix(&hex, 16).map_err(|_| MacParseError(raw.to_string()))?;
        Ok(MacAddr(value))
    }

    /// Build from raw octets as they come off an SNMP walk.
    #[must_use]
    pub fn from_octets(octets: [u8; 6]) -> Self {
        let mut value = 0u64;
        for octet in octets {
            value = (value << 8) | u64::from(octet);
        }
        MacAddr(value)
    }

    /// The 48-bit integer form, used for range comparison.
    #[must_use]
    pub fn to_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn octets(self) -> [u8; 6] {
        let v = self.0;
        [
            (v >> 40) as u8,
            (v >> 32) as u8,
            (v >> 24) as u8,
            (v >> 16) as u8,
            (v >> 8) as u8,
            v as u8,
        ]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddr::parse(s)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MacAddr::parse(&raw).map_err(serde::de::Error::custom)
    }
}
