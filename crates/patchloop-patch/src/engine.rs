use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::unified::{has_diff_markers, is_file_header_pair, is_new_file_header, UnifiedDiff};

/// Identifies which strategy produced a file's new content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    UnifiedDiff,
    LineReconstruction,
    LiteralReplacement,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::UnifiedDiff => write!(f, "unified-diff"),
            StrategyKind::LineReconstruction => write!(f, "line-reconstruction"),
            StrategyKind::LiteralReplacement => write!(f, "literal-replacement"),
        }
    }
}

/// Result of one strategy attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Applied(String),
    NotApplicable(String),
}

/// One step of the patch cascade
pub trait PatchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Derive new content from `prior` and `change`, or explain why this strategy does not fit
    fn attempt(&self, prior: &str, change: &str) -> Attempt;
}

/// Applies a well-formed unified diff whose context matches exactly
pub struct StrictDiff;

impl PatchStrategy for StrictDiff {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UnifiedDiff
    }

    fn attempt(&self, prior: &str, change: &str) -> Attempt {
        if !has_diff_markers(change) {
            return Attempt::NotApplicable("no diff markers".into());
        }

        match UnifiedDiff::parse(change).and_then(|diff| diff.apply(prior)) {
            Ok(content) => Attempt::Applied(content),
            Err(e) => Attempt::NotApplicable(e.to_string()),
        }
    }
}

/// Rebuilds file content from the hunk bodies of a degraded diff.
///
/// Added and context lines are kept without their prefix, removed lines are
/// dropped, and unprefixed lines inside a hunk pass through verbatim. Header
/// and git metadata lines are the only other lines discarded.
pub struct LineReconstruction;

impl PatchStrategy for LineReconstruction {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LineReconstruction
    }

    fn attempt(&self, _prior: &str, change: &str) -> Attempt {
        if !has_diff_markers(change) {
            return Attempt::NotApplicable("no diff markers".into());
        }

        let lines: Vec<&str> = change.lines().collect();
        let mut in_hunk = false;
        let mut kept: Vec<&str> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("@@") {
                in_hunk = true;
                continue;
            }
            if is_file_header_pair(&lines, i)
                || is_new_file_header(&lines, i)
                || line.starts_with("diff --git ")
            {
                in_hunk = false;
                continue;
            }
            if !in_hunk || line.starts_with('\\') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('+') {
                kept.push(rest);
            } else if let Some(rest) = line.strip_prefix(' ') {
                kept.push(rest);
            } else if !line.starts_with('-') {
                kept.push(line);
            }
        }

        if kept.is_empty() {
            return Attempt::NotApplicable("no hunk content".into());
        }

        let mut content = kept.join("\n");
        content.push('\n');
        Attempt::Applied(content)
    }
}

/// Treats marker-free text as the complete new file content
pub struct LiteralReplacement;

impl PatchStrategy for LiteralReplacement {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LiteralReplacement
    }

    fn attempt(&self, _prior: &str, change: &str) -> Attempt {
        if has_diff_markers(change) {
            return Attempt::NotApplicable("text contains diff markers".into());
        }
        Attempt::Applied(change.to_string())
    }
}

/// No strategy derived usable content from a change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Malformed change: {}", format_attempts(.attempts))]
pub struct MalformedChange {
    pub attempts: Vec<(StrategyKind, String)>,
}

fn format_attempts(attempts: &[(StrategyKind, String)]) -> String {
    attempts
        .iter()
        .map(|(kind, reason)| format!("{kind}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// New content for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub content: String,
    /// `None` when every strategy failed and the prior content was kept
    pub applied_by: Option<StrategyKind>,
}

impl Patched {
    pub fn is_unchanged(&self) -> bool {
        self.applied_by.is_none()
    }
}

/// Ordered cascade of patch strategies
pub struct PatchEngine {
    strategies: Vec<Box<dyn PatchStrategy>>,
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchEngine {
    /// The standard cascade: strict diff, then line reconstruction, then literal replacement
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(StrictDiff),
            Box::new(LineReconstruction),
            Box::new(LiteralReplacement),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn PatchStrategy>>) -> Self {
        Self { strategies }
    }

    /// Run the cascade, failing only when no strategy yields non-empty content
    pub fn try_apply(&self, prior: Option<&str>, change: &str) -> Result<Patched, MalformedChange> {
        let prior = prior.unwrap_or("");
        let change = strip_code_fence(change);
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            match strategy.attempt(prior, change) {
                Attempt::Applied(content) if !content.trim().is_empty() => {
                    debug!(strategy = %strategy.kind(), len = content.len(), "Patch applied");
                    return Ok(Patched {
                        content,
                        applied_by: Some(strategy.kind()),
                    });
                }
                Attempt::Applied(_) => attempts.push((strategy.kind(), "empty result".to_string())),
                Attempt::NotApplicable(reason) => attempts.push((strategy.kind(), reason)),
            }
        }

        Err(MalformedChange { attempts })
    }

    /// Run the cascade, keeping the prior content when nothing usable can be derived
    pub fn apply(&self, prior: Option<&str>, change: &str) -> Patched {
        self.try_apply(prior, change).unwrap_or_else(|e| {
            warn!(error = %e, "Keeping prior content");
            Patched {
                content: prior.unwrap_or("").to_string(),
                applied_by: None,
            }
        })
    }
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    let Some(newline) = rest.find('\n') else {
        return text;
    };

    // Only a bare closing fence on the last line counts; anything after it keeps the text whole
    let body = &rest[newline + 1..];
    let last_line = body.rfind('\n').map_or(0, |i| i + 1);
    if body[last_line..].trim() == "```" {
        &body[..last_line]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_diff_uses_strict_strategy() {
        let engine = PatchEngine::new();
        let patched = engine.apply(
            Some("old\n"),
            "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-old\n+new\n",
        );
        assert_eq!(patched.content, "new\n");
        assert_eq!(patched.applied_by, Some(StrategyKind::UnifiedDiff));
    }

    #[test]
    fn test_mismatched_context_falls_back_to_reconstruction() {
        let engine = PatchEngine::new();
        let change = "@@ -1,2 +1,2 @@\n header\n-removed\n+added\n";
        let patched = engine.apply(Some("something else\n"), change);
        assert_eq!(patched.content, "header\nadded\n");
        assert_eq!(patched.applied_by, Some(StrategyKind::LineReconstruction));
    }

    #[test]
    fn test_reconstruction_keeps_unprefixed_lines() {
        let change = "--- a/x\n+++ b/x\n@@ bogus header\n+first\nplain line\n\n-gone\n context\n";
        let attempt = LineReconstruction.attempt("", change);
        assert_eq!(
            attempt,
            Attempt::Applied("first\nplain line\n\ncontext\n".to_string())
        );
    }

    #[test]
    fn test_reconstruction_ignores_text_before_first_hunk() {
        let change = "Here is the patch:\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n+only\n";
        assert_eq!(
            LineReconstruction.attempt("", change),
            Attempt::Applied("only\n".to_string())
        );
    }

    #[test]
    fn test_plain_text_replaces_content_verbatim() {
        let engine = PatchEngine::new();
        let patched = engine.apply(Some("anything"), "brand new\ncontent\n");
        assert_eq!(patched.content, "brand new\ncontent\n");
        assert_eq!(patched.applied_by, Some(StrategyKind::LiteralReplacement));
    }

    #[test]
    fn test_fenced_replacement_is_unwrapped() {
        let engine = PatchEngine::new();
        let patched = engine.apply(None, "```rust\nfn main() {}\n```\n");
        assert_eq!(patched.content, "fn main() {}\n");
    }

    #[test]
    fn test_fenced_diff_still_applies_strictly() {
        let engine = PatchEngine::new();
        let patched = engine.apply(Some("a\n"), "```diff\n@@ -1 +1 @@\n-a\n+b\n```");
        assert_eq!(patched.content, "b\n");
        assert_eq!(patched.applied_by, Some(StrategyKind::UnifiedDiff));
    }

    #[test]
    fn test_empty_change_keeps_prior() {
        let engine = PatchEngine::new();
        for change in ["", "   \n\t", "```\n```"] {
            let patched = engine.apply(Some("keep me\n"), change);
            assert_eq!(patched.content, "keep me\n");
            assert!(patched.is_unchanged());
        }
        assert_eq!(engine.apply(None, "").content, "");
    }

    #[test]
    fn test_removal_only_diff_keeps_prior() {
        let engine = PatchEngine::new();
        let err = engine.try_apply(Some("a\n"), "@@ -1 +0,0 @@\n-a\n").unwrap_err();
        assert_eq!(err.attempts.len(), 3);
        assert_eq!(
            engine.apply(Some("a\n"), "@@ -1 +0,0 @@\n-a\n").content,
            "a\n"
        );
    }

    #[test]
    fn test_strip_code_fence_passthrough() {
        assert_eq!(strip_code_fence("no fence"), "no fence");
        assert_eq!(strip_code_fence("```\nbody\n```"), "body\n");
        assert_eq!(
            strip_code_fence("```py\nunterminated\n"),
            "```py\nunterminated\n"
        );
        assert_eq!(strip_code_fence("\n```sh\nls\n```  \n"), "ls\n");
    }

    #[test]
    fn test_fence_followed_by_prose_is_kept_whole() {
        let change = "```sh\ncargo run\n```\n\nMore text\n";
        assert_eq!(strip_code_fence(change), change);

        let patched = PatchEngine::new().apply(Some("old\n"), change);
        assert_eq!(patched.content, change);
        assert_eq!(patched.applied_by, Some(StrategyKind::LiteralReplacement));
    }

    #[test]
    fn test_marker_free_text_is_returned_verbatim() {
        let engine = PatchEngine::new();
        let cases = [
            "a",
            "a\n",
            "a\n\n",
            "  leading spaces\n",
            "```sh\nx\n```\n\ntail\n",
            "```\nunterminated",
            "windows\r\nline\r\n",
            "email@host\n",
            "@ not a hunk\n",
        ];
        for change in cases {
            let patched = engine.apply(Some("prior\n"), change);
            assert_eq!(patched.content, change, "change {change:?}");
            assert_eq!(patched.applied_by, Some(StrategyKind::LiteralReplacement));
        }
    }

    #[test]
    fn test_diffs_from_diffy_apply_strictly() {
        let engine = PatchEngine::new();
        let pairs = [
            ("a\nb\nc\n", "a\nB\nc\n"),
            ("", "fresh\nfile\n"),
            ("one\ntwo\n", "zero\none\ntwo\nthree\n"),
            (
                "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n13\n14\n15\n",
                "1\n2\nthree\n4\n5\n6\n7\n8\n9\n10\n11\n12\n13\nfourteen\n15\n",
            ),
            ("keep\ndrop\nkeep\n", "keep\nkeep\n"),
            ("fn main() {\n}\n", "fn main() {\n    println!(\"hi\");\n}\n"),
        ];
        for (old, new) in pairs {
            let diff = diffy::create_patch(old, new).to_string();
            let patched = engine.apply(Some(old), &diff);
            assert_eq!(patched.content, new, "diff:\n{diff}");
            assert_eq!(
                patched.applied_by,
                Some(StrategyKind::UnifiedDiff),
                "diff:\n{diff}"
            );
        }
    }
}
