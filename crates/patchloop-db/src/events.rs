//! Events store: the persisted EventSink trail.

use patchloop_logging::IterationRecord;
use rusqlite::{params, Connection};
use std::sync::MutexGuard;

use crate::tasks::parse_timestamp;

/// Events store with a borrowed connection.
pub struct Events<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Events<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Append a record; returns its row id, which orders records globally.
    pub fn append(&self, record: &IterationRecord) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO events (task_id, iteration, kind, name, message, payload, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.task_id,
                record.iteration as i64,
                record.kind.as_str(),
                record.name,
                record.message,
                record.payload.to_string(),
                record.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every record of a task, in emission order.
    pub fn list(&self, task_id: &str) -> Result<Vec<IterationRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT task_id, iteration, kind, name, message, payload, timestamp
            FROM events
            WHERE task_id = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![task_id], |row| {
            let kind: String = row.get(2)?;
            let payload: String = row.get(5)?;
            let timestamp: String = row.get(6)?;
            Ok(IterationRecord {
                task_id: row.get(0)?,
                iteration: row.get::<_, i64>(1)? as u32,
                kind: kind.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?,
                name: row.get(3)?,
                message: row.get(4)?,
                payload: serde_json::from_str(&payload).unwrap_or_default(),
                timestamp: parse_timestamp(&timestamp),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
