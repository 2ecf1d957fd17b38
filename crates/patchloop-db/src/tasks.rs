//! Tasks store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::MutexGuard;

/// A persisted task row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub description: String,
    pub source: PathBuf,
    pub workspace: PathBuf,
    pub status: String,
    pub current_iteration: u32,
    pub max_iterations: u32,
    /// Why a failed task failed
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter parameters for listing tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

/// Tasks store with a borrowed connection.
pub struct Tasks<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Tasks<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Insert a new task, or replace every column of an existing one.
    pub fn upsert(&self, task: &TaskRecord) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO tasks (
                id, description, source, workspace, status,
                current_iteration, max_iterations, reason, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                source = excluded.source,
                workspace = excluded.workspace,
                status = excluded.status,
                current_iteration = excluded.current_iteration,
                max_iterations = excluded.max_iterations,
                reason = excluded.reason,
                updated_at = excluded.updated_at
            "#,
            params![
                task.id,
                task.description,
                task.source.to_string_lossy().to_string(),
                task.workspace.to_string_lossy().to_string(),
                task.status,
                task.current_iteration as i64,
                task.max_iterations as i64,
                task.reason,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                r#"
                SELECT id, description, source, workspace, status,
                       current_iteration, max_iterations, reason, created_at, updated_at
                FROM tasks WHERE id = ?1
                "#,
                params![id],
                Self::row_to_task,
            )
            .optional()
    }

    /// List tasks matching the filter, newest first.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, rusqlite::Error> {
        let mut sql = String::from(
            r#"
            SELECT id, description, source, workspace, status,
                   current_iteration, max_iterations, reason, created_at, updated_at
            FROM tasks WHERE 1=1
            "#,
        );
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            sql.push_str(" AND status = ?");
            param_values.push(Box::new(status.clone()));
        }

        if let Some(ref search) = filter.search {
            sql.push_str(" AND description LIKE ?");
            param_values.push(Box::new(format!("%{}%", search)));
        }

        sql.push_str(" ORDER BY created_at DESC, id");

        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            param_values.push(Box::new(limit as i64));
        }

        let params: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), Self::row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn row_to_task(row: &rusqlite::Row) -> Result<TaskRecord, rusqlite::Error> {
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        Ok(TaskRecord {
            id: row.get(0)?,
            description: row.get(1)?,
            source: PathBuf::from(row.get::<_, String>(2)?),
            workspace: PathBuf::from(row.get::<_, String>(3)?),
            status: row.get(4)?,
            current_iteration: row.get::<_, i64>(5)? as u32,
            max_iterations: row.get::<_, i64>(6)? as u32,
            reason: row.get(7)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
