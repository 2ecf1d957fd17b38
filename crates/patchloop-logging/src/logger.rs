use colored::Colorize;
use std::io::Write;

use crate::{EventSink, IterationRecord, LogFormat, LoopEvent};

const RULE_WIDTH: usize = 69;

/// Console renderer for iteration records, written to stderr
pub struct Logger {
    format: LogFormat,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn log(&self, record: &IterationRecord) {
        match self.format {
            LogFormat::Json => self.log_json(record),
            LogFormat::Pretty => self.log_pretty(record),
            LogFormat::Compact => self.log_compact(record),
        }
    }

    fn log_json(&self, record: &IterationRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, record: &IterationRecord) {
        let Some(event) = record.event() else {
            let _ = writeln!(std::io::stderr(), "  {}", record.message);
            return;
        };

        let mut stderr = std::io::stderr();
        match event {
            LoopEvent::Created {
                description,
                workspace,
                ..
            } => {
                let rule = "─".repeat(RULE_WIDTH);
                let _ = writeln!(stderr);
                let _ = writeln!(stderr, "{}", format!("╭{}╮", rule).bright_blue());
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "patchloop".bold().bright_white(),
                    record.task_id.dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Task:".dimmed(),
                    truncate(&description, 60).dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Workspace:".dimmed(),
                    truncate(&workspace.display().to_string(), 56).dimmed()
                );
                let _ = writeln!(stderr, "{}", format!("╰{}╯", rule).bright_blue());
                let _ = writeln!(stderr);
            }
            LoopEvent::Status { .. } => {}
            LoopEvent::Iteration {
                iteration,
                max_iterations,
            } => {
                let text = format!("─ Iteration {}/{} ", iteration, max_iterations);
                let padding = "─".repeat(RULE_WIDTH.saturating_sub(text.chars().count()));
                let _ = writeln!(
                    stderr,
                    "{}{}{}",
                    "┌".bright_blue(),
                    text.bright_blue().bold(),
                    padding.bright_blue()
                );
            }
            LoopEvent::Plan { summary, steps } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {}",
                    "▶".bright_cyan(),
                    "PLAN".bright_cyan().bold(),
                    summary.as_deref().unwrap_or("(none)")
                );
                for step in steps {
                    let _ = writeln!(stderr, "    {} {}", "·".dimmed(), step.dimmed());
                }
            }
            LoopEvent::Analysis {
                summary,
                root_cause,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {}",
                    "▶".bright_magenta(),
                    "DIAGNOSIS".bright_magenta().bold(),
                    summary.as_deref().unwrap_or("(none)")
                );
                if let Some(cause) = root_cause {
                    let _ = writeln!(stderr, "    {} {}", "cause:".dimmed(), cause.dimmed());
                }
            }
            LoopEvent::Patches {
                applied,
                failed,
                files_changed,
                insertions,
                deletions,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} applied, {} {}, {} {}",
                    "📁".dimmed(),
                    applied.len(),
                    files_changed,
                    if files_changed == 1 { "file" } else { "files" },
                    format!("+{}", insertions).green(),
                    format!("-{}", deletions).red()
                );
                for (path, reason) in &failed {
                    let _ = writeln!(
                        stderr,
                        "    {} {}: {}",
                        "✗".bright_red(),
                        path.display(),
                        reason.dimmed()
                    );
                }
            }
            LoopEvent::TestResult {
                passed,
                duration_ms,
                ref excerpts,
                ..
            } => {
                let secs = duration_ms as f64 / 1000.0;
                if passed {
                    let _ = writeln!(
                        stderr,
                        "    {} {} ({:.1}s)",
                        "✓".bright_green(),
                        record.message,
                        secs
                    );
                } else {
                    let _ = writeln!(
                        stderr,
                        "    {} {} ({:.1}s)",
                        "✗".bright_red(),
                        record.message,
                        secs
                    );
                    if let Some(first) = excerpts.first() {
                        for line in first.lines().take(5) {
                            let _ = writeln!(stderr, "    {} {}", "│".dimmed(), line.dimmed());
                        }
                    }
                }
                let rule = format!("└{}┘", "─".repeat(RULE_WIDTH));
                let _ = writeln!(stderr, "{}", rule.bright_blue());
                let _ = writeln!(stderr);
            }
            LoopEvent::Error { message, fatal } => {
                let marker = if fatal { "✗".bright_red() } else { "⚠".bright_yellow() };
                let _ = writeln!(stderr, "    {} {}", marker, message);
            }
            // The final outcome is printed by the binary
            LoopEvent::Success { .. } | LoopEvent::Failure { .. } | LoopEvent::Complete { .. } => {}
        }
    }

    fn log_compact(&self, record: &IterationRecord) {
        let timestamp = record.timestamp.format("%H:%M:%S");
        let _ = writeln!(
            std::io::stderr(),
            "[{}] {}:{}:{} {}",
            timestamp,
            record.task_id,
            record.iteration,
            record.name,
            record.message
        );
    }
}

impl EventSink for Logger {
    fn append(&self, record: &IterationRecord) {
        self.log(record);
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
