use chrono::{DateTime, Utc};
use patchloop_db::TaskRecord;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::LoopError;

/// Where a task is in the iteration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Planning,
    Generating,
    Testing,
    Analyzing,
    Fixing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Generating => "generating",
            TaskStatus::Testing => "testing",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Fixing => "fixing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Pending, Planning)
                | (Planning, Generating)
                | (Generating, Testing)
                | (Testing, Completed)
                | (Testing, Analyzing)
                | (Analyzing, Fixing)
                | (Fixing, Testing)
                | (Planning | Generating | Testing | Analyzing | Fixing, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-submitted goal and its progress
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Repository the workspace was copied from
    pub source: PathBuf,
    pub workspace: PathBuf,
    status: TaskStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    /// Why the task failed, once it has
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        source: PathBuf,
        workspace: PathBuf,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            source,
            workspace,
            status: TaskStatus::Pending,
            current_iteration: 0,
            max_iterations,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Move to `next`, refusing anything the state machine does not allow
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), LoopError> {
        if !self.status.can_transition_to(next) {
            return Err(LoopError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start_iteration(&mut self, iteration: u32) {
        self.current_iteration = iteration;
        self.updated_at = Utc::now();
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            description: self.description.clone(),
            source: self.source.clone(),
            workspace: self.workspace.clone(),
            status: self.status.to_string(),
            current_iteration: self.current_iteration,
            max_iterations: self.max_iterations,
            reason: self.reason.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("t", "add X", PathBuf::from("/src"), PathBuf::from("/ws"), 3)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = task();
        for next in [
            TaskStatus::Planning,
            TaskStatus::Generating,
            TaskStatus::Testing,
            TaskStatus::Analyzing,
            TaskStatus::Fixing,
            TaskStatus::Testing,
            TaskStatus::Completed,
        ] {
            t.transition(next).unwrap();
        }
        assert!(t.status().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = task();
        t.transition(TaskStatus::Planning).unwrap();
        t.transition(TaskStatus::Failed).unwrap();
        for next in [
            TaskStatus::Planning,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert!(t.transition(next).is_err());
        }
    }

    #[test]
    fn test_pending_cannot_skip_planning() {
        let mut t = task();
        assert!(matches!(
            t.transition(TaskStatus::Testing),
            Err(LoopError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Testing
            })
        ));
        assert!(t.transition(TaskStatus::Failed).is_err());
    }

    #[test]
    fn test_record_carries_status_and_iteration() {
        let mut t = task();
        t.transition(TaskStatus::Planning).unwrap();
        t.start_iteration(2);
        let record = t.to_record();
        assert_eq!(record.status, "planning");
        assert_eq!(record.current_iteration, 2);
        assert_eq!(record.max_iterations, 3);
        assert!(record.reason.is_none());
    }
}
