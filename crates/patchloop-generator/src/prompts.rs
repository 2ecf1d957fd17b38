use patchloop_patch::ChangeSet;

const MAX_SUMMARY_LEN: usize = 12_000;
const MAX_TRANSCRIPT_LEN: usize = 10_000;
const MAX_CHANGES_LEN: usize = 20_000;

const RESPONSE_FORMAT: &str = r#"## Required Response Format

Do NOT edit files yourself. Describe your changes as unified diffs against the
current file contents; patchloop applies them.

Wrap every part of your answer in a response block containing one JSON object:

<response>
{"type": "plan", "summary": "One-line summary of the approach", "steps": ["step 1", "step 2"]}
</response>

<response>
{"type": "patches", "patches": [{"path": "relative/path/to/file", "diff": "--- a/relative/path/to/file\n+++ b/relative/path/to/file\n@@ -1,1 +1,1 @@\n-old line\n+new line\n"}]}
</response>

Paths are relative to the repository root. To create a file, use a diff
against an empty file (`@@ -0,0 +1,N @@`) or give the full new content
instead of a diff."#;

/// Prompt templates for the change generator
pub struct GeneratorPrompts;

impl GeneratorPrompts {
    /// Prompt for the first iteration: plan and propose changes from scratch
    pub fn build_proposal_prompt(task_description: &str, repo_summary: &str) -> String {
        format!(
            r#"You are an expert software engineer working on an existing repository.

## Task
{task}

## Repository
```
{summary}
```

Read whatever files you need, then propose the smallest set of changes that
completes the task. The project's test suite runs after your changes are
applied; it decides whether the task is done.

{format}"#,
            task = task_description,
            summary = truncate_head(repo_summary, MAX_SUMMARY_LEN),
            format = RESPONSE_FORMAT,
        )
    }

    /// Prompt for later iterations: explain the last failure and fix it
    pub fn build_diagnosis_prompt(
        task_description: &str,
        last_transcript: &str,
        last_changes: &ChangeSet,
        failure_excerpts: &[String],
        apply_failures: &str,
        iteration: u32,
    ) -> String {
        let excerpts = if failure_excerpts.is_empty() {
            "(none extracted)".to_string()
        } else {
            failure_excerpts
                .iter()
                .map(|e| format!("```\n{}\n```", e))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let apply_section = if apply_failures.is_empty() {
            String::new()
        } else {
            format!(
                "\n## Changes That Could Not Be Applied\n{}\n",
                apply_failures
            )
        };

        format!(
            r#"You are an expert software engineer. Your previous attempt at this task did not pass verification.

## Task
{task}

## Previous Changes
{changes}
{apply_section}
## Verification Output (tail)
```
{transcript}
```

## Failure Excerpts
{excerpts}

## Context
This is iteration {iteration}. The previous changes are already applied to
the workspace; your diffs must apply on top of them.

First diagnose why verification failed, then propose a fix. Include a
diagnosis block before your patches:

<response>
{{"type": "diagnosis", "summary": "What went wrong", "root_cause": "Underlying cause", "confidence": 0.8}}
</response>

{format}"#,
            task = task_description,
            changes = truncate_head(&last_changes.render(), MAX_CHANGES_LEN),
            apply_section = apply_section,
            transcript = truncate_tail(last_transcript, MAX_TRANSCRIPT_LEN),
            excerpts = excerpts,
            iteration = iteration,
            format = RESPONSE_FORMAT,
        )
    }
}

/// Keep the start of `text`, cutting at a line boundary when possible
fn truncate_head(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    match text[..end].rfind('\n') {
        Some(pos) => &text[..pos],
        None => &text[..end],
    }
}

/// Keep the end of `text`; test runners print their summary last
fn truncate_tail(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut start = text.len() - max_len;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    match text[start..].find('\n') {
        Some(pos) => &text[start + pos + 1..],
        None => &text[start..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchloop_patch::FileChange;

    #[test]
    fn test_proposal_prompt_contains_task_and_summary() {
        let prompt = GeneratorPrompts::build_proposal_prompt("add X", "src/lib.rs");
        assert!(prompt.contains("## Task\nadd X"));
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("<response>"));
    }

    #[test]
    fn test_diagnosis_prompt_includes_previous_attempt() {
        let changes = ChangeSet::new(vec![FileChange::new("a.txt", "+y\n")]);
        let prompt = GeneratorPrompts::build_diagnosis_prompt(
            "add X",
            "1 failed, 0 passed, 1 total",
            &changes,
            &["FAIL a_test".to_string()],
            "",
            2,
        );
        assert!(prompt.contains("### a.txt"));
        assert!(prompt.contains("1 failed, 0 passed"));
        assert!(prompt.contains("FAIL a_test"));
        assert!(prompt.contains("iteration 2"));
        assert!(!prompt.contains("Could Not Be Applied"));
    }

    #[test]
    fn test_truncate_tail_keeps_summary() {
        let text = format!("{}\nsummary line", "x".repeat(100));
        assert_eq!(truncate_tail(&text, 20), "summary line");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        assert!(truncate_head(&text, 5).len() <= 5);
        assert!(truncate_tail(&text, 5).len() <= 5);
    }
}
