//! Database layer for patchloop.
//!
//! Provides a `Database` struct that owns the SQLite connection and hands
//! out the tasks and events stores. The iteration loop writes through the
//! [`TaskStore`] and [`EventSink`] traits so tests can substitute fakes.

mod events;
mod tasks;

pub use events::Events;
pub use tasks::{TaskFilter, TaskRecord, Tasks};

use patchloop_logging::{EventSink, IterationRecord};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Task not found: {0}")]
    NotFound(String),
}

/// Record store for tasks, keyed by task id
pub trait TaskStore: Send + Sync {
    fn create(&self, task: &TaskRecord) -> Result<(), StoreError>;

    /// Persist the current state of an existing task
    fn update(&self, task: &TaskRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;

    fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;
}

/// The main database struct that owns the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at a specific path.
    pub fn open_at(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Access the tasks store.
    pub fn tasks(&self) -> Tasks<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Tasks::new(conn)
    }

    /// Access the events store.
    pub fn events(&self) -> Events<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Events::new(conn)
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                source TEXT NOT NULL,
                workspace TEXT NOT NULL,
                status TEXT NOT NULL,
                current_iteration INTEGER NOT NULL DEFAULT 0,
                max_iterations INTEGER NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                message TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_events_task_id ON events(task_id, id);
            "#,
        )
    }
}

impl TaskStore for Database {
    fn create(&self, task: &TaskRecord) -> Result<(), StoreError> {
        Ok(self.tasks().upsert(task)?)
    }

    fn update(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let tasks = self.tasks();
        if tasks.get(&task.id)?.is_none() {
            return Err(StoreError::NotFound(task.id.clone()));
        }
        Ok(tasks.upsert(task)?)
    }

    fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.tasks().get(id)?)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.tasks().list(filter)?)
    }
}

impl EventSink for Database {
    fn append(&self, record: &IterationRecord) {
        if let Err(e) = self.events().append(record) {
            tracing::warn!(task_id = %record.task_id, error = %e, "Failed to persist event");
        }
    }
}
