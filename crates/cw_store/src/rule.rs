//! Upgrade rule CRUD

use rusqlite::{params, OptionalExtension, Row};

use crate::cmts::count_table;
use crate::models::{MatchType, Rule};
use crate::{now, Store, StoreError};

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let match_type: String = row.get(3)?;
    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        match_type: match_type.parse().unwrap_or(MatchType::SysdescrRegex),
        match_criteria: row.get(4)?,
        tftp_server_ip: row.get(5)?,
        firmware_filename: row.get(6)?,
        enabled: row.get(7)?,
        priority: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const RULE_COLUMNS: &str = "id, name, description, match_type, match_criteria, tftp_server_ip,
    firmware_filename, enabled, priority, created_at, updated_at";

impl Store {
    /// Insert a new rule, returning its id. Criteria are validated (parsed
    /// and compiled) before the write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for rejected input, otherwise any
    /// database failure.
    pub fn create_rule(&self, rule: &Rule) -> Result<i64, StoreError> {
        rule.validate()?;

        self.write(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO upgrade_rule (name, description, match_type, match_criteria,
                    tftp_server_ip, firmware_filename, enabled, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    rule.name,
                    rule.description,
                    rule.match_type.as_str(),
                    rule.match_criteria,
                    rule.tftp_server_ip,
                    rule.firmware_filename,
                    rule.enabled,
                    rule.priority,
                    ts,
                    ts,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no rule has this id.
    pub fn get_rule(&self, id: i64) -> Result<Rule, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {RULE_COLUMNS} FROM upgrade_rule WHERE id = ?1"),
                params![id],
                row_to_rule,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("rule {id}")))
        })
    }

    /// All rules, ordered by priority descending then name ascending — the
    /// evaluation order the matcher expects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RULE_COLUMNS} FROM upgrade_rule ORDER BY priority DESC, name ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_rule)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for rejected input and
    /// [`StoreError::NotFound`] when the row does not exist.
    pub fn update_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        rule.validate()?;

        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE upgrade_rule SET name = ?1, description = ?2, match_type = ?3,
                    match_criteria = ?4, tftp_server_ip = ?5, firmware_filename = ?6,
                    enabled = ?7, priority = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    rule.name,
                    rule.description,
                    rule.match_type.as_str(),
                    rule.match_criteria,
                    rule.tftp_server_ip,
                    rule.firmware_filename,
                    rule.enabled,
                    rule.priority,
                    now(),
                    rule.id,
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("rule {}", rule.id)));
            }
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    pub fn delete_rule(&self, id: i64) -> Result<(), StoreError> {
        self.write(|conn| {
            let affected = conn.execute("DELETE FROM upgrade_rule WHERE id = ?1", params![id])?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("rule {id}")));
            }
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_rules(&self) -> Result<i64, StoreError> {
        self.read(count_table("upgrade_rule"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac_rule(name: &str, priority: i64) -> Rule {
        Rule {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            match_type: MatchType::MacRange,
            match_criteria: r#"{"start_mac":"00:01:5C:00:00:00","end_mac":"00:01:5C:FF:FF:FF"}"#
                .to_string(),
            tftp_server_ip: "192.0.2.50".to_string(),
            firmware_filename: "fw-v2.0.0.bin".to_string(),
            enabled: true,
            priority,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn list_orders_by_priority_then_name() {
        let store = Store::open_memory().unwrap();
        store.create_rule(&mac_rule("beta", 50)).unwrap();
        store.create_rule(&mac_rule("alpha", 100)).unwrap();
        store.create_rule(&mac_rule("aardvark", 50)).unwrap();

        let names: Vec<String> = store
            .list_rules()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "aardvark", "beta"]);
    }

    #[test]
    fn invalid_criteria_rejected_before_write() {
        let store = Store::open_memory().unwrap();
        let mut rule = mac_rule("broken", 10);
        rule.match_criteria = r#"{"pattern":"Arris"}"#.to_string();
        assert!(matches!(
            store.create_rule(&rule),
            Err(StoreError::Validation { .. })
        ));
        assert_eq!(store.count_rules().unwrap(), 0);
    }

    #[test]
    fn update_and_delete() {
        let store = Store::open_memory().unwrap();
        let id = store.create_rule(&mac_rule("gamma", 10)).unwrap();

        let mut rule = store.get_rule(id).unwrap();
        rule.enabled = false;
        rule.priority = 99;
        store.update_rule(&rule).unwrap();

        let fetched = store.get_rule(id).unwrap();
        assert!(!fetched.enabled);
        assert_eq!(fetched.priority, 99);

        store.delete_rule(id).unwrap();
        assert!(matches!(store.get_rule(id), Err(StoreError::NotFound(_))));
    }
}
