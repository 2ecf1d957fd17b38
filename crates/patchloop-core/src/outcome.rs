use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happened in one iteration, kept for the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    /// Plan summary on the first iteration, diagnosis summary afterwards
    pub reasoning: Option<String>,
    pub applied: Vec<PathBuf>,
    pub failed: BTreeMap<PathBuf, String>,
    pub commit: Option<String>,
    pub passed: bool,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub total_cases: usize,
    pub timed_out: bool,
}

/// The final outcome of an iteration loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// Verification passed
    Completed {
        iterations: u32,
        total_duration_secs: f64,
    },
    /// Every iteration failed verification
    BudgetExhausted {
        iterations: u32,
        total_duration_secs: f64,
    },
    /// Stopped through the cancellation handle (e.g., Ctrl+C)
    Cancelled {
        iterations: u32,
        total_duration_secs: f64,
    },
    /// Generator or verification capability failed hard
    Failed {
        iterations: u32,
        error: String,
        total_duration_secs: f64,
    },
}

impl LoopOutcome {
    pub fn completed(iterations: u32, duration: Duration) -> Self {
        Self::Completed {
            iterations,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn budget_exhausted(iterations: u32, duration: Duration) -> Self {
        Self::BudgetExhausted {
            iterations,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn cancelled(iterations: u32, duration: Duration) -> Self {
        Self::Cancelled {
            iterations,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn failed(iterations: u32, error: String, duration: Duration) -> Self {
        Self::Failed {
            iterations,
            error,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn iterations(&self) -> u32 {
        match self {
            Self::Completed { iterations, .. }
            | Self::BudgetExhausted { iterations, .. }
            | Self::Cancelled { iterations, .. }
            | Self::Failed { iterations, .. } => *iterations,
        }
    }

    pub fn total_duration_secs(&self) -> f64 {
        match self {
            Self::Completed {
                total_duration_secs,
                ..
            }
            | Self::BudgetExhausted {
                total_duration_secs,
                ..
            }
            | Self::Cancelled {
                total_duration_secs,
                ..
            }
            | Self::Failed {
                total_duration_secs,
                ..
            } => *total_duration_secs,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Reason recorded on the failed task
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Completed { .. } => None,
            Self::BudgetExhausted { iterations, .. } => Some(format!(
                "iteration budget exhausted after {} iteration(s)",
                iterations
            )),
            Self::Cancelled { .. } => Some("cancelled".to_string()),
            Self::Failed { error, .. } => Some(error.clone()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::BudgetExhausted { .. } => 1,
            Self::Cancelled { .. } => 130,
            Self::Failed { .. } => 2,
        }
    }
}

/// The JSON report saved when a run ends
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub task_id: &'a str,
    pub description: &'a str,
    pub workspace: &'a Path,
    /// Workspace HEAD when the run started
    pub base_commit: Option<&'a str>,
    pub total_diff: Option<&'a Path>,
    pub outcome: &'a LoopOutcome,
    pub iterations: &'a [IterationSummary],
}
