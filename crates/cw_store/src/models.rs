//! Entity types for the Cableward data model
//!
//! Every entity carries a monotonic integer id assigned on insert and
//! epoch-second timestamps. Enumerations are persisted as their canonical
//! string form (`as_str`) and parsed back with `FromStr`.

use serde::{Deserialize, Serialize};

use crate::mac::MacAddr;
use crate::StoreError;

/// A managed CMTS head-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cmts {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_snmp_port")]
    pub snmp_port: u16,
    pub community_read: String,
    #[serde(default)]
    pub community_write: Option<String>,
    /// Community used when talking directly to a modem behind this head-end.
    #[serde(default)]
    pub cm_community_string: Option<String>,
    #[serde(default = "default_snmp_version")]
    pub snmp_version: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_snmp_port() -> u16 {
    161
}

fn default_snmp_version() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

impl Cmts {
    /// Validate a CMTS before it is written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::validation("name", "name is required"));
        }
        if self.ip_address.trim().is_empty() {
            return Err(StoreError::validation(
                "ip_address",
                "IP address is required",
            ));
        }
        if self.snmp_port == 0 {
            return Err(StoreError::validation(
                "snmp_port",
                "port must be between 1 and 65535",
            ));
        }
        if self.community_read.trim().is_empty() {
            return Err(StoreError::validation(
                "community_read",
                "SNMP read community is required",
            ));
        }
        if !(1..=3).contains(&self.snmp_version) {
            return Err(StoreError::validation(
                "snmp_version",
                "SNMP version must be 1, 2, or 3",
            ));
        }
        Ok(())
    }
}

/// Registration state of a discovered modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemStatus {
    Online,
    Offline,
    Denied,
    Partial,
    Unknown,
}

impl ModemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModemStatus::Online => "online",
            ModemStatus::Offline => "offline",
            ModemStatus::Denied => "denied",
            ModemStatus::Partial => "partial",
            ModemStatus::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ModemStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "online" => Ok(ModemStatus::Online),
            "offline" => Ok(ModemStatus::Offline),
            "denied" => Ok(ModemStatus::Denied),
            "partial" => Ok(ModemStatus::Partial),
            "unknown" => Ok(ModemStatus::Unknown),
            other => Err(format!("unknown modem status: {other}")),
        }
    }
}

/// A discovered cable modem, keyed system-wide by canonical MAC address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modem {
    #[serde(default)]
    pub id: i64,
    pub cmts_id: i64,
    /// Canonical `XX:XX:XX:XX:XX:XX`, uppercase.
    pub mac_address: String,
    pub ip_address: String,
    pub sys_descr: String,
    pub current_firmware: String,
    /// Downstream power in dBmV.
    pub signal_level: f64,
    pub status: ModemStatus,
    pub last_seen: i64,
}

impl Modem {
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the MAC address does not parse.
    pub fn validate(&self) -> Result<(), StoreError> {
        MacAddr::parse(&self.mac_address)
            .map_err(|e| StoreError::validation("mac_address", e.to_string()))?;
        if self.cmts_id <= 0 {
            return Err(StoreError::validation(
                "cmts_id",
                "modem must reference a CMTS",
            ));
        }
        Ok(())
    }
}

/// Discriminant for the two rule criteria shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    MacRange,
    SysdescrRegex,
}

impl MatchType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::MacRange => "MAC_RANGE",
            MatchType::SysdescrRegex => "SYSDESCR_REGEX",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "MAC_RANGE" => Ok(MatchType::MacRange),
            "SYSDESCR_REGEX" => Ok(MatchType::SysdescrRegex),
            other => Err(format!("unknown match type: {other}")),
        }
    }
}

/// Validated rule criteria. Persisted as a JSON blob whose shape is implied
/// by [`MatchType`]; held in memory as the parsed variant so nothing
/// downstream has to re-interpret strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCriteria {
    /// Inclusive MAC range, both ends canonicalized.
    MacRange { start: MacAddr, end: MacAddr },
    /// Regex applied to the modem's sysDescr.
    SysDescr { pattern: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
}

impl MatchCriteria {
    /// Parse and fully validate a criteria blob for the given match type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the blob is not valid JSON,
    /// is missing required fields, contains an unparseable MAC, an inverted
    /// range, or a regex that does not compile.
    pub fn parse(match_type: MatchType, raw: &str) -> Result<Self, StoreError> {
        let raw: RawCriteria = serde_json::from_str(raw)
            .map_err(|e| StoreError::validation("match_criteria", format!("invalid JSON: {e}")))?;

        match match_type {
            MatchType::MacRange => {
                let start = raw.start_mac.as_deref().ok_or_else(|| {
                    StoreError::validation("match_criteria", "start_mac is required for MAC_RANGE")
                })?;
                let end = raw.end_mac.as_deref().ok_or_else(|| {
                    StoreError::validation("match_criteria", "end_mac is required for MAC_RANGE")
                })?;
                let start = MacAddr::parse(start).map_err(|e| {
                    StoreError::validation("match_criteria", format!("invalid start_mac: {e}"))
                })?;
                let end = MacAddr::parse(end).map_err(|e| {
                    StoreError::validation("match_criteria", format!("invalid end_mac: {e}"))
                })?;
                if start > end {
                    return Err(StoreError::validation(
                        "match_criteria",
                        "start_mac must be less than or equal to end_mac",
                    ));
                }
                Ok(MatchCriteria::MacRange { start, end })
            }
            MatchType::SysdescrRegex => {
                let pattern = raw.pattern.as_deref().ok_or_else(|| {
                    StoreError::validation(
                        "match_criteria",
                        "pattern is required for SYSDESCR_REGEX",
                    )
                })?;
                if pattern.is_empty() {
                    return Err(StoreError::validation("match_criteria", "pattern is empty"));
                }
                regex::Regex::new(pattern).map_err(|e| {
                    StoreError::validation("match_criteria", format!("invalid regex pattern: {e}"))
                })?;
                Ok(MatchCriteria::SysDescr {
                    pattern: pattern.to_string(),
                })
            }
        }
    }

    /// The match type this criteria belongs to.
    #[must_use]
    pub fn match_type(&self) -> MatchType {
        match self {
            MatchCriteria::MacRange { .. } => MatchType::MacRange,
            MatchCriteria::SysDescr { .. } => MatchType::SysdescrRegex,
        }
    }

    /// Serialize back to the persisted JSON blob shape.
    #[must_use]
    pub fn to_blob(&self) -> String {
        let raw = match self {
            MatchCriteria::MacRange { start, end } => RawCriteria {
                start_mac: Some(start.to_string()),
                end_mac: Some(end.to_string()),
                ..RawCriteria::default()
            },
            MatchCriteria::SysDescr { pattern } => RawCriteria {
                pattern: Some(pattern.clone()),
                ..RawCriteria::default()
            },
        };
        serde_json::to_string(&raw).unwrap_or_default()
    }
}

/// An operator-authored upgrade policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub match_type: MatchType,
    /// JSON criteria blob; parsed against `match_type` on validation.
    pub match_criteria: String,
    pub tftp_server_ip: String,
    pub firmware_filename: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Rule {
    /// Parse the criteria blob into its validated variant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the blob does not match the
    /// shape implied by `match_type`.
    pub fn criteria(&self) -> Result<MatchCriteria, StoreError> {
        MatchCriteria::parse(self.match_type, &self.match_criteria)
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::validation("name", "name is required"));
        }
        if self.tftp_server_ip.trim().is_empty() {
            return Err(StoreError::validation(
                "tftp_server_ip",
                "TFTP server IP is required",
            ));
        }
        if self.firmware_filename.trim().is_empty() {
            return Err(StoreError::validation(
                "firmware_filename",
                "firmware filename is required",
            ));
        }
        self.criteria()?;
        Ok(())
    }
}

/// Lifecycle state of an upgrade job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "SKIPPED",
        }
    }

    /// Terminal states never leave the store again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "SKIPPED" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One firmware upgrade attempt for one (modem, rule) pair.
///
/// TFTP server, filename, and retry budget are snapshotted from the rule at
/// creation so rule edits cannot mutate an in-flight job. `cmts_id` and
/// `mac_address` are denormalized for rate-limit routing and deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: i64,
    pub modem_id: i64,
    pub rule_id: i64,
    pub cmts_id: i64,
    pub mac_address: String,
    pub status: JobStatus,
    pub tftp_server_ip: String,
    pub firmware_filename: String,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Earliest epoch second at which the pending sweep may dispatch this
    /// job again after a retryable failure.
    #[serde(default)]
    pub retry_after: Option<i64>,
}

/// Audit event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ModemDiscovered,
    ModemLost,
    ModemCleanup,
    UpgradeStarted,
    UpgradeCompleted,
    UpgradeFailed,
    RuleCreated,
    RuleUpdated,
    RuleDeleted,
    CmtsAdded,
    CmtsUpdated,
    CmtsDeleted,
    SystemEvent,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ModemDiscovered => "MODEM_DISCOVERED",
            EventType::ModemLost => "MODEM_LOST",
            EventType::ModemCleanup => "MODEM_CLEANUP",
            EventType::UpgradeStarted => "UPGRADE_STARTED",
            EventType::UpgradeCompleted => "UPGRADE_COMPLETED",
            EventType::UpgradeFailed => "UPGRADE_FAILED",
            EventType::RuleCreated => "RULE_CREATED",
            EventType::RuleUpdated => "RULE_UPDATED",
            EventType::RuleDeleted => "RULE_DELETED",
            EventType::CmtsAdded => "CMTS_ADDED",
            EventType::CmtsUpdated => "CMTS_UPDATED",
            EventType::CmtsDeleted => "CMTS_DELETED",
            EventType::SystemEvent => "SYSTEM_EVENT",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "MODEM_DISCOVERED" => Ok(EventType::ModemDiscovered),
            "MODEM_LOST" => Ok(EventType::ModemLost),
            "MODEM_CLEANUP" => Ok(EventType::ModemCleanup),
            "UPGRADE_STARTED" => Ok(EventType::UpgradeStarted),
            "UPGRADE_COMPLETED" => Ok(EventType::UpgradeCompleted),
            "UPGRADE_FAILED" => Ok(EventType::UpgradeFailed),
            "RULE_CREATED" => Ok(EventType::RuleCreated),
            "RULE_UPDATED" => Ok(EventType::RuleUpdated),
            "RULE_DELETED" => Ok(EventType::RuleDeleted),
            "CMTS_ADDED" => Ok(EventType::CmtsAdded),
            "CMTS_UPDATED" => Ok(EventType::CmtsUpdated),
            "CMTS_DELETED" => Ok(EventType::CmtsDeleted),
            "SYSTEM_EVENT" => Ok(EventType::SystemEvent),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(default)]
    pub id: i64,
    pub event_type: EventType,
    pub entity_type: String,
    pub entity_id: i64,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: i64,
}

impl ActivityEvent {
    /// Shorthand for the common detail-less case.
    #[must_use]
    pub fn new(
        event_type: EventType,
        entity_type: impl Into<String>,
        entity_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            event_type,
            entity_type: entity_type.into(),
            entity_id,
            message: message.into(),
            details: None,
            created_at: 0,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
