use git2::{BranchType, IndexAddOption, Repository, Signature};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{DiffCapture, DiffSummary, GitError};

const FALLBACK_NAME: &str = "patchloop";
const FALLBACK_EMAIL: &str = "patchloop@localhost";

/// Isolated, versioned working copies of a source repository.
///
/// A workspace is owned by exactly one task for the length of its run.
pub trait WorkspaceProvider: Send + Sync {
    /// Copy `source` into a fresh workspace named `label` and return its path
    fn snapshot(&self, source: &Path, label: &str) -> Result<PathBuf, GitError>;

    /// Commit the whole working tree, returning the new commit id
    fn commit(&self, workspace: &Path, message: &str) -> Result<String, GitError>;

    /// Unified diff between two revisions of the workspace
    fn diff(&self, workspace: &Path, from: &str, to: &str) -> Result<String, GitError>;

    /// Uncommitted changes against HEAD
    fn working_diff(&self, workspace: &Path) -> Result<(String, DiffSummary), GitError>;

    /// Current HEAD commit id
    fn head(&self, workspace: &Path) -> Result<String, GitError>;
}

/// Workspaces kept as git repositories under one root directory
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
    branch_prefix: String,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            branch_prefix: "patchloop".to_string(),
        }
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Branch a task's commits land on
    pub fn branch_name(&self, label: &str) -> String {
        format!("{}/{}", self.branch_prefix.trim_end_matches('/'), label)
    }

    fn clone_repo(source: &Path, dest: &Path) -> Result<Repository, GitError> {
        let url = source
            .to_str()
            .ok_or_else(|| GitError::NotARepo(source.display().to_string()))?;
        debug!(source = url, dest = %dest.display(), "Cloning source repository");
        Ok(Repository::clone(url, dest)?)
    }

    fn copy_and_init(source: &Path, dest: &Path) -> Result<Repository, GitError> {
        debug!(source = %source.display(), dest = %dest.display(), "Copying source directory");
        copy_tree(source, dest)?;

        let repo = Repository::init(dest)?;
        commit_all(&repo, &format!("Snapshot of {}", source.display()))?;
        Ok(repo)
    }
}

impl WorkspaceProvider for GitWorkspace {
    fn snapshot(&self, source: &Path, label: &str) -> Result<PathBuf, GitError> {
        let dest = self.root.join(label);
        if dest.exists() {
            return Err(GitError::WorkspaceExists(dest));
        }
        fs::create_dir_all(&self.root)?;

        let is_repo = Repository::open(source).is_ok_and(|repo| !repo.is_bare());
        let repo = if is_repo {
            match Self::clone_repo(source, &dest) {
                Ok(repo) if repo.head().is_ok() => repo,
                // A repository without commits has nothing to clone
                Ok(_) => {
                    fs::remove_dir_all(&dest)?;
                    Self::copy_and_init(source, &dest)?
                }
                Err(e) => return Err(e),
            }
        } else {
            Self::copy_and_init(source, &dest)?
        };

        let branch = self.branch_name(label);
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(&branch, &head, false)?;
        repo.set_head(&format!("refs/heads/{}", branch))?;

        info!(
            workspace = %dest.display(),
            branch = %branch,
            base = %head.id(),
            "Created workspace"
        );
        Ok(dest)
    }

    fn commit(&self, workspace: &Path, message: &str) -> Result<String, GitError> {
        let repo = Repository::open(workspace)?;
        commit_all(&repo, message)
    }

    fn diff(&self, workspace: &Path, from: &str, to: &str) -> Result<String, GitError> {
        DiffCapture::between(workspace, from, to)
    }

    fn working_diff(&self, workspace: &Path) -> Result<(String, DiffSummary), GitError> {
        DiffCapture::working_tree(workspace)
    }

    fn head(&self, workspace: &Path) -> Result<String, GitError> {
        let repo = Repository::open(workspace)?;
        let head = repo.head().map_err(|e| match e.code() {
            git2::ErrorCode::UnbornBranch => GitError::NoCommits,
            _ => GitError::GitOperationFailed(e),
        })?;
        let id = head.peel_to_commit()?.id().to_string();
        Ok(id)
    }
}

/// Stage every change (including deletions) and commit on HEAD
fn commit_all(repo: &Repository, message: &str) -> Result<String, GitError> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let signature = repo
        .signature()
        .or_else(|_| Signature::now(FALLBACK_NAME, FALLBACK_EMAIL))?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
        Err(e) => return Err(GitError::GitOperationFailed(e)),
    };
    let parents: Vec<_> = parent.iter().collect();

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    debug!(commit = %oid, "Committed workspace");
    Ok(oid.to_string())
}

/// Copy a directory tree, honoring .gitignore files and skipping `.git`
fn copy_tree(source: &Path, dest: &Path) -> Result<(), GitError> {
    fs::create_dir_all(dest)?;

    let walker = WalkBuilder::new(source)
        .hidden(false)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(relative);
        match entry.file_type() {
            Some(ft) if ft.is_dir() => fs::create_dir_all(&target)?,
            Some(ft) if ft.is_file() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Whether `branch` exists in the repository at `workspace`
pub fn has_branch(workspace: &Path, branch: &str) -> Result<bool, GitError> {
    let repo = Repository::open(workspace)?;
    let exists = repo.find_branch(branch, BranchType::Local).is_ok();
    Ok(exists)
}
