use thiserror::Error;

use crate::TaskStatus;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Generator error: {0}")]
    Generator(#[from] patchloop_generator::GeneratorError),

    #[error("Verification error: {0}")]
    Verify(#[from] patchloop_verify::VerifyError),

    #[error("Git error: {0}")]
    Git(#[from] patchloop_git::GitError),

    #[error("Store error: {0}")]
    Store(#[from] patchloop_db::StoreError),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {0} is not pending")]
    NotPending(String),
}
