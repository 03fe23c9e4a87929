//! Append-only activity log
//!
//! Activity writes are best-effort at the call sites: the engine and the API
//! layer route through [`Store::log_activity_best_effort`], which logs and
//! swallows failures so audit trouble never fails the originating operation.

use rusqlite::{params, Row};
use tracing::warn;

use crate::cmts::count_table;
use crate::models::{ActivityEvent, EventType};
use crate::{now, Store, StoreError};

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ActivityEvent> {
    let event_type: String = row.get(1)?;
    let details: Option<String> = row.get(5)?;
    Ok(ActivityEvent {
        id: row.get(0)?,
        event_type: event_type.parse().unwrap_or(EventType::SystemEvent),
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        message: row.get(4)?,
        details: details.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(6)?,
    })
}

impl Store {
    /// Append one event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn log_activity(&self, event: &ActivityEvent) -> Result<i64, StoreError> {
        let details = match &event.details {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        self.write(|conn| {
            conn.execute(
                "INSERT INTO activity_log (event_type, entity_type, entity_id, message,
                    details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.event_type.as_str(),
                    event.entity_type,
                    event.entity_id,
                    event.message,
                    details,
                    now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Append one event, dropping the event on failure.
    pub fn log_activity_best_effort(&self, event: &ActivityEvent) {
        if let Err(err) = self.log_activity(event) {
            warn!(
                event_type = event.event_type.as_str(),
                error = %err,
                "Dropping activity event"
            );
        }
    }

    /// Recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_activity(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, entity_type, entity_id, message, details, created_at
                 FROM activity_log ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn count_activity(&self) -> Result<i64, StoreError> {
        self.read(count_table("activity_log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list_newest_first() {
        let store = Store::open_memory().unwrap();
        store
            .log_activity(&ActivityEvent::new(
                EventType::CmtsAdded,
                "cmts",
                1,
                "Added CMTS Lab",
            ))
            .unwrap();
        store
            .log_activity(&ActivityEvent::new(
                EventType::UpgradeStarted,
                "job",
                7,
                "Started firmware upgrade for modem 00:01:5C:AA:BB:CC",
            ))
            .unwrap();

        let events = store.list_activity(10, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::UpgradeStarted);
        assert_eq!(events[1].event_type, EventType::CmtsAdded);
    }

    #[test]
    fn details_roundtrip() {
        let store = Store::open_memory().unwrap();
        let event = ActivityEvent::new(EventType::ModemDiscovered, "cmts", 1, "Discovered 12")
            .with_details(serde_json::json!({"discovered": 12, "duration_ms": 840}));
        store.log_activity(&event).unwrap();

        let events = store.list_activity(1, 0).unwrap();
        let details = events[0].details.as_ref().unwrap();
        assert_eq!(details["discovered"], 12);
    }

    #[test]
    fn limit_and_offset() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            store
                .log_activity(&ActivityEvent::new(
                    EventType::SystemEvent,
                    "system",
                    0,
                    format!("event {i}"),
                ))
                .unwrap();
        }
        assert_eq!(store.list_activity(2, 0).unwrap().len(), 2);
        assert_eq!(store.list_activity(10, 4).unwrap().len(), 1);
        assert_eq!(store.count_activity().unwrap(), 5);
    }
}
