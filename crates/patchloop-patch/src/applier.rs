use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{ApplyOutcome, ChangeSet, FileChange, Patched, PatchEngine};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Path escapes the workspace: {0}")]
    UnsafePath(String),

    #[error("Failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// Applies every change in a change set to a workspace, one file at a time
pub struct ChangeSetApplier {
    engine: PatchEngine,
}

impl Default for ChangeSetApplier {
    fn default() -> Self {
        Self::new(PatchEngine::new())
    }
}

impl ChangeSetApplier {
    pub fn new(engine: PatchEngine) -> Self {
        Self { engine }
    }

    /// Attempt every change independently; a failing file never stops the rest
    pub fn apply(&self, workspace_root: &Path, changes: &ChangeSet) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for change in changes {
            match self.apply_one(workspace_root, change) {
                Ok(patched) => {
                    debug!(
                        path = %change.path.display(),
                        strategy = ?patched.applied_by,
                        "Applied change"
                    );
                    outcome.record_applied(change.path.clone());
                }
                Err(e) => {
                    warn!(path = %change.path.display(), error = %e, "Failed to apply change");
                    outcome.record_failed(change.path.clone(), e.to_string());
                }
            }
        }

        debug!(
            applied = outcome.applied_files.len(),
            failed = outcome.failed_files.len(),
            "Change set applied"
        );

        outcome
    }

    fn apply_one(&self, root: &Path, change: &FileChange) -> Result<Patched, ApplyError> {
        let target = resolve_in_workspace(root, &change.path)?;
        let display = change.path.display().to_string();

        let prior = match fs::read_to_string(&target) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(ApplyError::Read {
                    path: display,
                    source,
                })
            }
        };

        let patched = self.engine.apply(prior.as_deref(), &change.text);

        // A no-op leaves the file (or its absence) untouched
        if patched.is_unchanged() {
            return Ok(patched);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ApplyError::Write {
                path: display.clone(),
                source,
            })?;
        }

        fs::write(&target, &patched.content).map_err(|source| ApplyError::Write {
            path: display,
            source,
        })?;

        Ok(patched)
    }
}

/// Join a relative change path onto the workspace root, rejecting escapes
fn resolve_in_workspace(root: &Path, path: &Path) -> Result<PathBuf, ApplyError> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApplyError::UnsafePath(path.display().to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(ApplyError::UnsafePath(path.display().to_string()));
    }
    Ok(resolved)
}
