//! Rule matching
//!
//! Pure evaluation of a modem against an ordered rule set. Callers pass the
//! rules pre-sorted by descending priority (the store's `list_rules` order);
//! the first enabled rule whose criteria match wins. Rules that error during
//! evaluation are logged and skipped so one bad rule cannot halt the scan.

use regex::Regex;
use tracing::{debug, warn};

use cw_store::{MacAddr, MatchCriteria, MatchType, Modem, ModemStatus, Rule, StoreError};

#[derive(Debug, Default)]
pub struct Matcher;

impl Matcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// First enabled rule in `rules` order whose criteria match, or `None`.
    #[must_use]
    pub fn match_modem_to_rules<'r>(&self, modem: &Modem, rules: &'r [Rule]) -> Option<&'r Rule> {
        for rule in rules {
            if !rule.enabled {
                continue;
            }

            match self.matches_rule(modem, rule) {
                Ok(true) => {
                    debug!(
                        mac = %modem.mac_address,
                        rule_id = rule.id,
                        rule_name = %rule.name,
                        "Modem matched to rule"
                    );
                    return Some(rule);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        rule_id = rule.id,
                        rule_name = %rule.name,
                        error = %err,
                        "Error evaluating rule"
                    );
                }
            }
        }
        None
    }

    /// Does this modem match this one rule?
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the rule's criteria blob does
    /// not parse or the modem MAC is malformed.
    pub fn matches_rule(&self, modem: &Modem, rule: &Rule) -> Result<bool, StoreError> {
        match rule.criteria()? {
            MatchCriteria::MacRange { start, end } => {
                let mac = MacAddr::parse(&modem.mac_address)
                    .map_err(|e| StoreError::Validation {
                        field: "mac_address".to_string(),
                        message: e.to_string(),
                    })?;
                Ok(start <= mac && mac <= end)
            }
            MatchCriteria::SysDescr { pattern } => {
                if modem.sys_descr.is_empty() {
                    return Ok(false);
                }
                let re = Regex::new(&pattern).map_err(|e| StoreError::Validation {
                    field: "match_criteria".to_string(),
                    message: e.to_string(),
                })?;
                Ok(re.is_match(&modem.sys_descr))
            }
        }
    }

    /// Dry-run validation of a criteria blob, for the management layer to
    /// call before persisting a rule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] describing the defect.
    pub fn validate_criteria(&self, match_type: MatchType, raw: &str) -> Result<(), StoreError> {
        MatchCriteria::parse(match_type, raw).map(|_| ())
    }

    /// Whether the modem actually needs the rule's firmware. False only when
    /// the current firmware equals the version token extracted from the
    /// rule's filename; an unextractable target means "assume needed".
    #[must_use]
    pub fn should_upgrade(&self, modem: &Modem, rule: &Rule) -> bool {
        if modem.current_firmware.is_empty() {
            debug!(mac = %modem.mac_address, "Current firmware unknown, assuming upgrade needed");
            return true;
        }

        let target = extract_firmware_version(&rule.firmware_filename);
        if target.is_empty() {
            return true;
        }

        if modem.current_firmware == target {
            debug!(
                mac = %modem.mac_address,
                firmware = %modem.current_firmware,
                "Modem already running target firmware"
            );
            return false;
        }

        true
    }

    /// Keep only modems that are online with downstream power inside the
    /// window. Bounds are inclusive.
    #[must_use]
    pub fn filter_eligible(
        &self,
        modems: Vec<Modem>,
        signal_min: f64,
        signal_max: f64,
    ) -> Vec<Modem> {
        let total = modems.len();
        let eligible: Vec<Modem> = modems
            .into_iter()
            .filter(|modem| {
                if modem.status != ModemStatus::Online {
                    debug!(mac = %modem.mac_address, status = modem.status.as_str(),
                        "Skipping modem - not online");
                    return false;
                }
                if modem.signal_level < signal_min || modem.signal_level > signal_max {
                    debug!(mac = %modem.mac_address, signal = modem.signal_level,
                        "Skipping modem - signal outside window");
                    return false;
                }
                true
            })
            .collect();

        debug!(total, eligible = eligible.len(), "Filtered eligible modems");
        eligible
    }
}

/// Version token out of a firmware filename: `v?<digits>(.<digits>)+`,
/// returned without the `v` prefix. Empty when nothing matches.
#[must_use]
pub fn extract_firmware_version(filename: &str) -> String {
    // Compiled per call; rule evaluation volume is small.
    let re = Regex::new(r"v?(\d+(?:\.\d+)+)").expect("static pattern");
    re.captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modem(mac: &str, sys_descr: &str, status: ModemStatus, signal: f64) -> Modem {
        Modem {
            id: 1,
            cmts_id: 1,
            mac_address: mac.to_string(),
            ip_address: "10.0.0.2".to_string(),
            sys_descr: sys_descr.to_string(),
            current_firmware: String::new(),
            signal_level: signal,
            status,
            last_seen: 0,
        }
    }

    fn mac_rule(id: i64, priority: i64, start: &str, end: &str, firmware: &str) -> Rule {
        Rule {
            id,
            name: format!("mac-rule-{id}"),
            description: String::new(),
            match_type: MatchType::MacRange,
            match_criteria: format!(r#"{{"start_mac":"{start}","end_mac":"{end}"}}"#),
            tftp_server_ip: "192.0.2.50".to_string(),
            firmware_filename: firmware.to_string(),
            enabled: true,
            priority,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn regex_rule(id: i64, priority: i64, pattern: &str, firmware: &str) -> Rule {
        Rule {
            id,
            name: format!("regex-rule-{id}"),
            description: String::new(),
            match_type: MatchType::SysdescrRegex,
            match_criteria: format!(r#"{{"pattern":"{pattern}"}}"#),
            tftp_server_ip: "192.0.2.50".to_string(),
            firmware_filename: firmware.to_string(),
            enabled: true,
            priority,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn mac_range_is_inclusive() {
        let matcher = Matcher::new();
        let rule = mac_rule(1, 10, "00:01:5C:00:00:00", "00:01:5C:FF:FF:FF", "fw.bin");

        for mac in ["00:01:5C:00:00:00", "00:01:5C:AA:BB:CC", "00:01:5C:FF:FF:FF"] {
            let m = modem(mac, "", ModemStatus::Online, 0.0);
            assert!(matcher.matches_rule(&m, &rule).unwrap(), "{mac}");
        }

        let below = modem("00:01:5B:FF:FF:FF", "", ModemStatus::Online, 0.0);
        let above = modem("00:01:5D:00:00:00", "", ModemStatus::Online, 0.0);
        assert!(!matcher.matches_rule(&below, &rule).unwrap());
        assert!(!matcher.matches_rule(&above, &rule).unwrap());
    }

    #[test]
    fn mac_range_accepts_mixed_notation() {
        let matcher = Matcher::new();
        let rule = mac_rule(1, 10, "0001.5c00.0000", "00-01-5C-FF-FF-FF", "fw.bin");
        let m = modem("00015caabbcc", "", ModemStatus::Online, 0.0);
        assert!(matcher.matches_rule(&m, &rule).unwrap());
    }

    #[test]
    fn sysdescr_regex_matches() {
        let matcher = Matcher::new();
        let rule = regex_rule(1, 10, "Arris SB8200", "fw.bin");

        let hit = modem("00:01:5C:00:00:01", "Arris SB8200 DOCSIS 3.1", ModemStatus::Online, 0.0);
        let miss = modem("00:01:5C:00:00:02", "Netgear CM1000", ModemStatus::Online, 0.0);
        assert!(matcher.matches_rule(&hit, &rule).unwrap());
        assert!(!matcher.matches_rule(&miss, &rule).unwrap());
    }

    #[test]
    fn sysdescr_case_insensitive_flag() {
        let matcher = Matcher::new();
        let rule = regex_rule(1, 10, "(?i)arris", "fw.bin");
        let m = modem("00:01:5C:00:00:01", "ARRIS SB8200", ModemStatus::Online, 0.0);
        assert!(matcher.matches_rule(&m, &rule).unwrap());
    }

    #[test]
    fn empty_sysdescr_never_matches() {
        let matcher = Matcher::new();
        let rule = regex_rule(1, 10, ".*", "fw.bin");
        let m = modem("00:01:5C:00:00:01", "", ModemStatus::Online, 0.0);
        assert!(!matcher.matches_rule(&m, &rule).unwrap());
    }

    #[test]
    fn priority_order_wins() {
        let matcher = Matcher::new();
        let m = modem("00:01:5C:11:22:33", "Arris SB8200", ModemStatus::Online, 0.0);

        // Pre-sorted by priority descending, as the store returns them.
        let rules = vec![
            mac_rule(1, 100, "00:01:5C:00:00:00", "00:01:5C:FF:FF:FF", "fw-A.bin"),
            regex_rule(2, 50, "Arris", "fw-B.bin"),
        ];
        let hit = matcher.match_modem_to_rules(&m, &rules).unwrap();
        assert_eq!(hit.firmware_filename, "fw-A.bin");

        // Disable the higher-priority rule; the next one wins.
        let mut rules = rules;
        rules[0].enabled = false;
        let hit = matcher.match_modem_to_rules(&m, &rules).unwrap();
        assert_eq!(hit.firmware_filename, "fw-B.bin");
    }

    #[test]
    fn broken_rule_is_skipped_not_fatal() {
        let matcher = Matcher::new();
        let m = modem("00:01:5C:11:22:33", "Arris SB8200", ModemStatus::Online, 0.0);

        let mut broken = mac_rule(1, 100, "00:01:5C:00:00:00", "00:01:5C:FF:FF:FF", "fw-A.bin");
        broken.match_criteria = "not json".to_string();
        let rules = vec![broken, regex_rule(2, 50, "Arris", "fw-B.bin")];

        let hit = matcher.match_modem_to_rules(&m, &rules).unwrap();
        assert_eq!(hit.firmware_filename, "fw-B.bin");
    }

    #[test]
    fn no_match_returns_none() {
        let matcher = Matcher::new();
        let m = modem("AA:BB:CC:00:00:01", "Netgear CM1000", ModemStatus::Online, 0.0);
        let rules = vec![regex_rule(1, 10, "Arris", "fw.bin")];
        assert!(matcher.match_modem_to_rules(&m, &rules).is_none());
    }

    #[test]
    fn validate_criteria_shapes() {
        let matcher = Matcher::new();
        assert!(matcher
            .validate_criteria(
                MatchType::MacRange,
                r#"{"start_mac":"00:00:00:00:00:00","end_mac":"FF:FF:FF:FF:FF:FF"}"#
            )
            .is_ok());
        assert!(matcher
            .validate_criteria(MatchType::SysdescrRegex, r#"{"pattern":"^Arris"}"#)
            .is_ok());
        assert!(matcher
            .validate_criteria(MatchType::SysdescrRegex, r#"{"pattern":"[bad"}"#)
            .is_err());
        assert!(matcher
            .validate_criteria(MatchType::MacRange, r#"{"start_mac":"00:00:00:00:00:00"}"#)
            .is_err());
    }

    #[test]
    fn should_upgrade_compares_versions() {
        let matcher = Matcher::new();
        let rule = mac_rule(1, 10, "00:00:00:00:00:00", "FF:FF:FF:FF:FF:FF", "arris-sb8200-v2.0.0.bin");

        let mut m = modem("00:01:5C:00:00:01", "", ModemStatus::Online, 0.0);
        m.current_firmware = "2.0.0".to_string();
        assert!(!matcher.should_upgrade(&m, &rule));

        m.current_firmware = "1.0.0".to_string();
        assert!(matcher.should_upgrade(&m, &rule));

        // Unknown current firmware: assume needed.
        m.current_firmware = String::new();
        assert!(matcher.should_upgrade(&m, &rule));

        // Unextractable target: assume needed.
        let vague = mac_rule(2, 10, "00:00:00:00:00:00", "FF:FF:FF:FF:FF:FF", "firmware-latest.bin");
        m.current_firmware = "2.0.0".to_string();
        assert!(matcher.should_upgrade(&m, &vague));
    }

    #[test]
    fn version_extraction_forms() {
        assert_eq!(extract_firmware_version("arris-sb8200-v2.0.0.bin"), "2.0.0");
        assert_eq!(extract_firmware_version("firmware-1.2.3.bin"), "1.2.3");
        assert_eq!(extract_firmware_version("CM_v2.0.1_release.bin"), "2.0.1");
        assert_eq!(extract_firmware_version("fw-7.0.0.1.img"), "7.0.0.1");
        assert_eq!(extract_firmware_version("no-version-here.bin"), "");
    }

    #[test]
    fn eligibility_boundaries_are_inclusive() {
        let matcher = Matcher::new();
        let modems = vec![
            modem("00:01:5C:00:00:01", "x", ModemStatus::Online, -15.0),
            modem("00:01:5C:00:00:02", "x", ModemStatus::Online, 15.0),
            modem("00:01:5C:00:00:03", "x", ModemStatus::Online, -15.1),
            modem("00:01:5C:00:00:04", "x", ModemStatus::Online, 15.1),
            modem("00:01:5C:00:00:05", "x", ModemStatus::Offline, 0.0),
            modem("00:01:5C:00:00:06", "x", ModemStatus::Denied, 0.0),
        ];

        let eligible = matcher.filter_eligible(modems, -15.0, 15.0);
        let macs: Vec<&str> = eligible.iter().map(|m| m.mac_address.as_str()).collect();
        assert_eq!(macs, vec!["00:01:5C:00:00:01", "00:01:5C:00:00:02"]);
    }
}
