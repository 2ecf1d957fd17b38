//! # patchloop-git
//!
//! Git-backed workspaces for patchloop.
//!
//! Every task runs in its own copy of the source repository. The copy is a
//! git repository on a dedicated branch, and the loop commits after each
//! applied change set so every iteration can be inspected on its own.
//!
//! ## Key Types
//!
//! - [`WorkspaceProvider`] - snapshot/commit/diff capability used by the loop
//! - [`GitWorkspace`] - `git2` implementation rooted in one directory
//! - [`DiffCapture`] - working tree and revision diffs
//! - [`RepoSummary`] - gitignore-aware listing with project type detection

mod diff;
mod summary;
mod workspace;

pub use diff::{DiffCapture, DiffSummary, GitError};
pub use summary::{ProjectType, RepoSummary};
pub use workspace::{has_branch, GitWorkspace, WorkspaceProvider};
