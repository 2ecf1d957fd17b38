use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Coarse classification of an event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Status,
    Plan,
    ChangeApplied,
    VerificationResult,
    Diagnosis,
    Error,
    Terminal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Plan => "plan",
            EventKind::ChangeApplied => "change-applied",
            EventKind::VerificationResult => "verification-result",
            EventKind::Diagnosis => "diagnosis",
            EventKind::Error => "error",
            EventKind::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(EventKind::Status),
            "plan" => Ok(EventKind::Plan),
            "change-applied" => Ok(EventKind::ChangeApplied),
            "verification-result" => Ok(EventKind::VerificationResult),
            "diagnosis" => Ok(EventKind::Diagnosis),
            "error" => Ok(EventKind::Error),
            "terminal" => Ok(EventKind::Terminal),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// Everything the iteration loop reports, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LoopEvent {
    Created {
        description: String,
        source: PathBuf,
        workspace: PathBuf,
        max_iterations: u32,
    },
    Status {
        status: String,
    },
    Iteration {
        iteration: u32,
        max_iterations: u32,
    },
    Plan {
        summary: Option<String>,
        #[serde(default)]
        steps: Vec<String>,
    },
    Patches {
        proposed: Vec<PathBuf>,
        applied: Vec<PathBuf>,
        failed: BTreeMap<PathBuf, String>,
        commit: Option<String>,
        files_changed: usize,
        insertions: usize,
        deletions: usize,
        diff_artifact: Option<PathBuf>,
    },
    TestResult {
        passed: bool,
        total_cases: usize,
        passed_cases: usize,
        failed_cases: usize,
        duration_ms: u64,
        timed_out: bool,
        excerpts: Vec<String>,
        log_artifact: Option<PathBuf>,
    },
    Analysis {
        summary: Option<String>,
        root_cause: Option<String>,
        confidence: Option<f64>,
    },
    Error {
        message: String,
        fatal: bool,
    },
    Success {
        iterations: u32,
    },
    Failure {
        reason: String,
        iterations: u32,
    },
    Complete {
        status: String,
        iterations: u32,
        duration_secs: f64,
        report_artifact: Option<PathBuf>,
    },
}

impl LoopEvent {
    /// Stable event name, matching the serialized tag
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::Created { .. } => "created",
            LoopEvent::Status { .. } => "status",
            LoopEvent::Iteration { .. } => "iteration",
            LoopEvent::Plan { .. } => "plan",
            LoopEvent::Patches { .. } => "patches",
            LoopEvent::TestResult { .. } => "test-result",
            LoopEvent::Analysis { .. } => "analysis",
            LoopEvent::Error { .. } => "error",
            LoopEvent::Success { .. } => "success",
            LoopEvent::Failure { .. } => "failure",
            LoopEvent::Complete { .. } => "complete",
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            LoopEvent::Created { .. } | LoopEvent::Status { .. } => EventKind::Status,
            // Iteration boundaries travel with the status stream
            LoopEvent::Iteration { .. } => EventKind::Status,
            LoopEvent::Plan { .. } => EventKind::Plan,
            LoopEvent::Patches { .. } => EventKind::ChangeApplied,
            LoopEvent::TestResult { .. } => EventKind::VerificationResult,
            LoopEvent::Analysis { .. } => EventKind::Diagnosis,
            LoopEvent::Error { .. } => EventKind::Error,
            LoopEvent::Success { .. } | LoopEvent::Failure { .. } | LoopEvent::Complete { .. } => {
                EventKind::Terminal
            }
        }
    }

    /// One-line human summary
    pub fn message(&self) -> String {
        match self {
            LoopEvent::Created { description, .. } => format!("Task created: {}", description),
            LoopEvent::Status { status } => format!("Status: {}", status),
            LoopEvent::Iteration {
                iteration,
                max_iterations,
            } => format!("Iteration {}/{}", iteration, max_iterations),
            LoopEvent::Plan { summary, .. } => {
                format!("Plan: {}", summary.as_deref().unwrap_or("(none)"))
            }
            LoopEvent::Patches {
                applied, failed, ..
            } => format!("Applied {} file(s), {} failed", applied.len(), failed.len()),
            LoopEvent::TestResult {
                passed,
                passed_cases,
                failed_cases,
                total_cases,
                timed_out,
                ..
            } => {
                if *timed_out {
                    "Verification timed out".to_string()
                } else {
                    format!(
                        "Verification {}: {} passed, {} failed, {} total",
                        if *passed { "passed" } else { "failed" },
                        passed_cases,
                        failed_cases,
                        total_cases
                    )
                }
            }
            LoopEvent::Analysis { summary, .. } => {
                format!("Diagnosis: {}", summary.as_deref().unwrap_or("(none)"))
            }
            LoopEvent::Error { message, .. } => format!("Error: {}", message),
            LoopEvent::Success { iterations } => {
                format!("Verification passed after {} iteration(s)", iterations)
            }
            LoopEvent::Failure { reason, .. } => format!("Task failed: {}", reason),
            LoopEvent::Complete { status, .. } => format!("Task finished: {}", status),
        }
    }
}

/// One append-only EventSink entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub task_id: String,
    /// Iteration the record belongs to (0 before the first iteration starts)
    pub iteration: u32,
    pub kind: EventKind,
    pub name: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(task_id: impl Into<String>, iteration: u32, event: &LoopEvent) -> Self {
        Self {
            task_id: task_id.into(),
            iteration,
            kind: event.kind(),
            name: event.name().to_string(),
            message: event.message(),
            payload: serde_json::to_value(event).unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    /// The typed event, when the payload came from a [`LoopEvent`]
    pub fn event(&self) -> Option<LoopEvent> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_match_serialized_tags() {
        let events = [
            LoopEvent::Status {
                status: "planning".into(),
            },
            LoopEvent::TestResult {
                passed: false,
                total_cases: 1,
                passed_cases: 0,
                failed_cases: 1,
                duration_ms: 5,
                timed_out: false,
                excerpts: vec![],
                log_artifact: None,
            },
            LoopEvent::Complete {
                status: "failed".into(),
                iterations: 3,
                duration_secs: 1.0,
                report_artifact: None,
            },
        ];
        for event in &events {
            let value = serde_json::to_value(event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_record_round_trips_event() {
        let event = LoopEvent::Analysis {
            summary: Some("missing import".into()),
            root_cause: None,
            confidence: Some(0.7),
        };
        let record = IterationRecord::new("t1", 2, &event);
        assert_eq!(record.kind, EventKind::Diagnosis);
        assert_eq!(record.name, "analysis");
        assert_eq!(record.message, "Diagnosis: missing import");
        assert_eq!(record.event(), Some(event));
    }

    #[test]
    fn test_kind_parses_from_display() {
        for kind in [
            EventKind::ChangeApplied,
            EventKind::VerificationResult,
            EventKind::Terminal,
        ] {
            assert_eq!(kind.to_string().parse::<EventKind>(), Ok(kind));
        }
    }
}
