//! In-memory transport double
//!
//! Backs the engine's integration tests: values are seeded per OID, SETs are
//! recorded in order (and applied, so a later GET observes them), and
//! individual OIDs can be made to fail to exercise the transport-error
//! paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{SnmpTransport, SnmpValue};
use crate::SnmpError;

#[derive(Default)]
struct MockState {
    values: HashMap<String, SnmpValue>,
    sets: Vec<(String, SnmpValue)>,
    fail_oids: HashSet<String>,
    fail_sets: bool,
}

/// Scriptable [`SnmpTransport`] implementation.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MockState>,
    target: String,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            target: target.into(),
        }
    }

    /// Seed a value at an OID.
    pub fn insert(&self, oid: impl Into<String>, value: SnmpValue) {
        self.state.lock().unwrap().values.insert(oid.into(), value);
    }

    /// Make every GET/walk touching this OID fail with a transport error.
    pub fn fail_oid(&self, oid: impl Into<String>) {
        self.state.lock().unwrap().fail_oids.insert(oid.into());
    }

    /// Make every SET fail (the agent rejects writes).
    pub fn reject_sets(&self) {
        self.state.lock().unwrap().fail_sets = true;
    }

    /// All SETs observed so far, in issue order.
    #[must_use]
    pub fn sets(&self) -> Vec<(String, SnmpValue)> {
        self.state.lock().unwrap().sets.clone()
    }
}

#[async_trait]
impl SnmpTransport for MemoryTransport {
    async fn get(&self, oid: &str) -> Result<SnmpValue, SnmpError> {
        let state = self.state.lock().unwrap();
        if state.fail_oids.contains(oid) {
            return Err(SnmpError::Transport {
                target: self.target.clone(),
                detail: format!("scripted failure at {oid}"),
            });
        }
        state
            .values
            .get(oid)
            .cloned()
            .ok_or_else(|| SnmpError::NoSuchValue {
                target: self.target.clone(),
                oid: oid.to_string(),
            })
    }

    async fn set(&self, oid: &str, value: SnmpValue) -> Result<(), SnmpError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sets || state.fail_oids.contains(oid) {
            return Err(SnmpError::SetRejected {
                target: self.target.clone(),
                oid: oid.to_string(),
                detail: "scripted rejection".to_string(),
            });
        }
        state.sets.push((oid.to_string(), value.clone()));
        state.values.insert(oid.to_string(), value);
        Ok(())
    }

    async fn walk(&self, base_oid: &str) -> Result<Vec<(String, SnmpValue)>, SnmpError> {
        let state = self.state.lock().unwrap();
        if state.fail_oids.contains(base_oid) {
            return Err(SnmpError::Transport {
                target: self.target.clone(),
                detail: format!("scripted failure at {base_oid}"),
            });
        }

        let prefix = format!("{base_oid}.");
        let mut rows: Vec<(String, SnmpValue)> = state
            .values
            .iter()
            .filter(|(oid, _)| oid.starts_with(&prefix))
            .map(|(oid, value)| (oid.clone(), value.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_values_are_readable() {
        let mock = MemoryTransport::new("mock");
        mock.insert("1.2.3.0", SnmpValue::Integer(42));

        assert_eq!(
            mock.get("1.2.3.0").await.unwrap(),
            SnmpValue::Integer(42)
        );
        assert!(matches!(
            mock.get("1.2.4.0").await,
            Err(SnmpError::NoSuchValue { .. })
        ));
    }

    #[tokio::test]
    async fn sets_are_recorded_in_order() {
        let mock = MemoryTransport::new("mock");
        mock.set("1.1", SnmpValue::Integer(1)).await.unwrap();
        mock.set("1.2", SnmpValue::Integer(2)).await.unwrap();

        let sets = mock.sets();
        assert_eq!(sets[0].0, "1.1");
        assert_eq!(sets[1].0, "1.2");
        // And applied: a later GET observes the write.
        assert_eq!(mock.get("1.2").await.unwrap(), SnmpValue::Integer(2));
    }

    #[tokio::test]
    async fn walk_returns_subtree_in_order() {
        let mock = MemoryTransport::new("mock");
        mock.insert("1.3.1.2", SnmpValue::Integer(2));
        mock.insert("1.3.1.1", SnmpValue::Integer(1));
        mock.insert("1.4.1.1", SnmpValue::Integer(9));

        let rows = mock.walk("1.3").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "1.3.1.1");
    }

    #[tokio::test]
    async fn scripted_failures() {
        let mock = MemoryTransport::new("mock");
        mock.insert("1.2.3.0", SnmpValue::Integer(1));
        mock.fail_oid("1.2.3.0");
        assert!(mock.get("1.2.3.0").await.is_err());

        mock.reject_sets();
        assert!(matches!(
            mock.set("1.9", SnmpValue::Integer(1)).await,
            Err(SnmpError::SetRejected { .. })
        ));
    }
}
