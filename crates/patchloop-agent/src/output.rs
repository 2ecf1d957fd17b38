use std::time::Duration;

/// Phrases agents print when an upstream model API throttles them
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "overloaded",
];

/// What one agent process produced
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was killed by a signal
    pub exit_code: i32,
    pub duration: Duration,
}

impl AgentOutput {
    pub fn new(stdout: String, stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// A failed run whose output says it was throttled
    pub fn is_rate_limited(&self) -> bool {
        if self.success() {
            return false;
        }
        let text = format!("{}\n{}", self.stdout, self.stderr).to_lowercase();
        RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m))
    }

    /// The most useful text for explaining a failed run: stderr, else the end of stdout
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let lines: Vec<&str> = self.stdout.trim().lines().collect();
        lines[lines.len().saturating_sub(5)..].join("\n")
    }
}
