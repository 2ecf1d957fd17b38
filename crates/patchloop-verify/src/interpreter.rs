use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::RunOutput;

/// Maximum number of failure excerpts kept per verification
pub const MAX_EXCERPTS: usize = 5;

/// Line prefixes that open a failure excerpt
const FAILURE_MARKERS: &[&str] = &[
    "FAIL",
    "●",
    "✕",
    "✗",
    "×",
    "---- ",
    "thread '",
    "panicked at",
    "error[",
    "error:",
    "Error:",
    "AssertionError",
    "Traceback",
    "E   ",
];

lazy_static! {
    static ref COMBINED_SUMMARY: Regex =
        Regex::new(r"(?i)(\d+)\s+failed,\s*(\d+)\s+passed,\s*(\d+)\s+total").unwrap();
    static ref PASSED_COUNT: Regex = Regex::new(r"(?i)(\d+)\s+passed").unwrap();
    static ref FAILED_COUNT: Regex = Regex::new(r"(?i)(\d+)\s+failed").unwrap();
    static ref TOTAL_COUNT: Regex = Regex::new(r"(?i)(\d+)\s+total").unwrap();
}

/// Normalized outcome of one verification run.
///
/// Counts are reported as the tool printed them, even when they disagree
/// with each other. Only `passed` decides success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub total_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub duration_ms: u64,
    pub raw_output: String,
    pub excerpts: Vec<String>,
    #[serde(default)]
    pub timed_out: bool,
}

impl VerificationResult {
    /// Interpret a finished run, carrying over its duration and timeout flag
    pub fn from_run(output: &RunOutput) -> Self {
        let mut result = interpret(&output.transcript, output.exit_success);
        result.duration_ms = duration_ms(output.duration);
        result.timed_out = output.timed_out;
        result
    }

    /// One-line description for logs
    pub fn short_description(&self) -> String {
        let verdict = if self.passed {
            "PASS"
        } else if self.timed_out {
            "TIMEOUT"
        } else {
            "FAIL"
        };
        format!(
            "{} ({} passed, {} failed, {} total)",
            verdict, self.passed_cases, self.failed_cases, self.total_cases
        )
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Case counts extracted from a transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Recognized summary formats, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SummaryPattern {
    /// `N failed, M passed, K total` on one line
    Combined,
    /// `N passed`, `N failed` and `N total` matched independently
    Independent,
}

const SUMMARY_PATTERNS: &[SummaryPattern] =
    &[SummaryPattern::Combined, SummaryPattern::Independent];

impl SummaryPattern {
    fn extract(self, transcript: &str) -> Option<CaseCounts> {
        match self {
            SummaryPattern::Combined => {
                let caps = COMBINED_SUMMARY.captures_iter(transcript).last()?;
                Some(CaseCounts {
                    failed: parse_capture(&caps, 1),
                    passed: parse_capture(&caps, 2),
                    total: parse_capture(&caps, 3),
                })
            }
            SummaryPattern::Independent => {
                let passed = last_count(&PASSED_COUNT, transcript);
                let failed = last_count(&FAILED_COUNT, transcript);
                let total = last_count(&TOTAL_COUNT, transcript);

                if passed.is_none() && failed.is_none() && total.is_none() {
                    return None;
                }

                // Counts the tool did not print stay zero
                Some(CaseCounts {
                    total: total.unwrap_or(0),
                    passed: passed.unwrap_or(0),
                    failed: failed.unwrap_or(0),
                })
            }
        }
    }
}

fn parse_capture(caps: &regex::Captures<'_>, idx: usize) -> usize {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Later summaries win, so a per-test line printed before the final
/// summary does not shadow it
fn last_count(re: &Regex, transcript: &str) -> Option<usize> {
    re.captures_iter(transcript)
        .last()
        .map(|caps| parse_capture(&caps, 1))
}

/// Extract case counts using the first summary pattern that matches
pub fn parse_counts(transcript: &str) -> CaseCounts {
    SUMMARY_PATTERNS
        .iter()
        .find_map(|pattern| pattern.extract(transcript))
        .unwrap_or_default()
}

/// Group lines from each failure marker up to the next blank line
pub fn extract_excerpts(transcript: &str) -> Vec<String> {
    let mut excerpts = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in transcript.lines() {
        if let Some(group) = current.as_mut() {
            if line.trim().is_empty() {
                push_group(&mut excerpts, group);
                current = None;
                if excerpts.len() == MAX_EXCERPTS {
                    break;
                }
            } else {
                group.push(line);
            }
            continue;
        }

        let trimmed = line.trim_start();
        if FAILURE_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            current = Some(vec![line]);
        }
    }

    if let Some(group) = current.as_ref() {
        if excerpts.len() < MAX_EXCERPTS {
            push_group(&mut excerpts, group);
        }
    }

    excerpts
}

fn push_group(excerpts: &mut Vec<String>, group: &[&str]) {
    let text = group.join("\n").trim().to_string();
    if !text.is_empty() {
        excerpts.push(text);
    }
}

/// Normalize a raw transcript. `passed` is always `exit_success`
pub fn interpret(raw_transcript: &str, exit_success: bool) -> VerificationResult {
    let counts = parse_counts(raw_transcript);

    VerificationResult {
        passed: exit_success,
        total_cases: counts.total,
        passed_cases: counts.passed,
        failed_cases: counts.failed,
        duration_ms: 0,
        raw_output: raw_transcript.to_string(),
        excerpts: extract_excerpts(raw_transcript),
        timed_out: false,
    }
}
