use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::IterationRecord;

const LIVE_CAPACITY: usize = 256;

/// Append-only destination for iteration records.
///
/// Each task has a single writer, so records for one task arrive in
/// emission order. Implementations must accept concurrent appends for
/// different tasks.
pub trait EventSink: Send + Sync {
    fn append(&self, record: &IterationRecord);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn append(&self, record: &IterationRecord) {
        (**self).append(record)
    }
}

/// Forwards every record to several sinks, in order
#[derive(Default)]
pub struct EventFanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for EventFanout {
    fn append(&self, record: &IterationRecord) {
        for sink in &self.sinks {
            sink.append(record);
        }
    }
}

struct TaskChannel {
    history: Vec<IterationRecord>,
    live: broadcast::Sender<IterationRecord>,
}

impl TaskChannel {
    fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            history: Vec::new(),
            live,
        }
    }
}

/// A subscriber's view of one task: what happened so far, then what happens next
pub struct Subscription {
    pub backlog: Vec<IterationRecord>,
    /// Yields `Err(Lagged)` if the subscriber falls more than the channel capacity behind
    pub live: BroadcastStream<IterationRecord>,
}

/// In-memory sink keeping every task's records and serving per-task subscriptions
#[derive(Default)]
pub struct EventBus {
    tasks: Mutex<HashMap<String, TaskChannel>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a task. No record is both in the backlog and on the live stream.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let channel = tasks
            .entry(task_id.to_string())
            .or_insert_with(TaskChannel::new);
        Subscription {
            backlog: channel.history.clone(),
            live: BroadcastStream::new(channel.live.subscribe()),
        }
    }

    pub fn history(&self, task_id: &str) -> Vec<IterationRecord> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(task_id)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    /// Ids of every task that has appended at least one record
    pub fn task_ids(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, c)| !c.history.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop a finished task's records. Its live streams end.
    pub fn forget(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.remove(task_id).is_some()
    }
}

impl EventSink for EventBus {
    fn append(&self, record: &IterationRecord) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let channel = tasks
            .entry(record.task_id.clone())
            .or_insert_with(TaskChannel::new);
        channel.history.push(record.clone());
        // No live subscribers is fine
        let _ = channel.live.send(record.clone());
    }
}
