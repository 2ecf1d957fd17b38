use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A proposed modification to a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Unified diff, degraded diff text, or full replacement content
    #[serde(alias = "diff", alias = "content", alias = "patch")]
    pub text: String,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Ordered batch of file changes produced by one generator call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<FileChange>,
}

impl ChangeSet {
    pub fn new(changes: Vec<FileChange>) -> Self {
        Self { changes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.changes.iter().map(|c| c.path.as_path()).collect()
    }

    /// Render the change set as text for inclusion in a prompt
    pub fn render(&self) -> String {
        if self.changes.is_empty() {
            return "(no changes)".to_string();
        }

        self.changes
            .iter()
            .map(|c| format!("### {}\n{}", c.path.display(), c.text.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl From<Vec<FileChange>> for ChangeSet {
    fn from(changes: Vec<FileChange>) -> Self {
        Self::new(changes)
    }
}

impl IntoIterator for ChangeSet {
    type Item = FileChange;
    type IntoIter = std::vec::IntoIter<FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FileChange;
    type IntoIter = std::slice::Iter<'a, FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Per-file result of applying a change set.
///
/// Every path lands in exactly one bucket. When a change set names the same
/// path twice, the later change decides the bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied_files: BTreeSet<PathBuf>,
    /// Failed paths with the reason each one failed
    pub failed_files: BTreeMap<PathBuf, String>,
}

impl ApplyOutcome {
    pub fn record_applied(&mut self, path: PathBuf) {
        self.failed_files.remove(&path);
        self.applied_files.insert(path);
    }

    pub fn record_failed(&mut self, path: PathBuf, reason: String) {
        self.applied_files.remove(&path);
        self.failed_files.insert(path, reason);
    }

    pub fn total(&self) -> usize {
        self.applied_files.len() + self.failed_files.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_files.is_empty()
    }

    /// Describe failed files for the next diagnosis prompt
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed_files.is_empty() {
            return None;
        }

        Some(
            self.failed_files
                .iter()
                .map(|(path, reason)| format!("- {}: {}", path.display(), reason))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}
