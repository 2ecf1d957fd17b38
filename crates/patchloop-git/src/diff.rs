use git2::{Diff, DiffFormat, DiffOptions, Repository, Tree};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("Git operation failed: {0}")]
    GitOperationFailed(#[from] git2::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("No commits in repository")]
    NoCommits,

    #[error("Workspace already exists: {0}")]
    WorkspaceExists(PathBuf),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),
}

/// Summary of diff statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Diffs of a workspace repository. Untracked files count as additions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffCapture;

impl DiffCapture {
    /// Working tree and index against HEAD, as patch text plus stats
    pub fn working_tree(working_dir: &Path) -> Result<(String, DiffSummary), GitError> {
        let repo = Repository::discover(working_dir)?;
        let head_tree = head_tree(&repo)?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);

        let diff = repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;
        let summary = summarize(&diff)?;
        let text = render_patch(&diff)?;

        debug!(
            files_changed = summary.files_changed,
            diff_len = text.len(),
            "Captured working tree diff"
        );
        Ok((text, summary))
    }

    /// Diff between two revisions (anything `git rev-parse` accepts)
    pub fn between(working_dir: &Path, from: &str, to: &str) -> Result<String, GitError> {
        let repo = Repository::discover(working_dir)?;
        let from_tree = resolve_tree(&repo, from)?;
        let to_tree = resolve_tree(&repo, to)?;

        let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let text = render_patch(&diff)?;

        debug!(from, to, diff_len = text.len(), "Captured diff between revisions");
        Ok(text)
    }
}

fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, GitError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree()?)),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(GitError::GitOperationFailed(e)),
    }
}

fn resolve_tree<'r>(repo: &'r Repository, rev: &str) -> Result<Tree<'r>, GitError> {
    let object = repo
        .revparse_single(rev)
        .map_err(|_| GitError::UnknownRevision(rev.to_string()))?;
    Ok(object.peel_to_tree()?)
}

fn summarize(diff: &Diff<'_>) -> Result<DiffSummary, GitError> {
    let stats = diff.stats()?;
    Ok(DiffSummary {
        files_changed: stats.files_changed(),
        insertions: stats.insertions(),
        deletions: stats.deletions(),
    })
}

/// Render a diff as unified patch text
fn render_patch(diff: &Diff<'_>) -> Result<String, GitError> {
    let mut text = String::new();

    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        // File and hunk headers carry their own text; body lines need the origin back
        if matches!(line.origin(), '+' | '-' | ' ') {
            text.push(line.origin());
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::TempDir;

    fn commit(repo: &Repository, message: &str) -> String {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@example.com").unwrap();
        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_working_tree_includes_untracked_files() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        commit(&repo, "init");

        fs::write(dir.path().join("a.txt"), "two\n").unwrap();
        fs::write(dir.path().join("new.txt"), "fresh\n").unwrap();

        let (text, summary) = DiffCapture::working_tree(dir.path()).unwrap();
        assert_eq!(summary.files_changed, 2);
        assert_eq!(summary.insertions, 2);
        assert_eq!(summary.deletions, 1);
        assert!(text.contains("-one"));
        assert!(text.contains("+two"));
        assert!(text.contains("+fresh"));
    }

    #[test]
    fn test_between_revisions() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let first = commit(&repo, "first");
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        commit(&repo, "second");

        let text = DiffCapture::between(dir.path(), &first, "HEAD").unwrap();
        assert!(text.contains("+two"));
        assert!(matches!(
            DiffCapture::between(dir.path(), "no-such-rev", "HEAD"),
            Err(GitError::UnknownRevision(_))
        ));
    }
}
