//! # patchloop-verify
//!
//! Runs a project's verification suite and normalizes what it printed.
//!
//! - [`VerificationRunner`] - capability that runs the suite in a workspace
//! - [`CommandVerifier`] - shell-command runner with a hard timeout
//! - [`interpret`] - turn a transcript into a [`VerificationResult`]
//!
//! A timeout is reported as a failed run, never as an error.

mod interpreter;
mod runner;

pub use interpreter::{
    extract_excerpts, interpret, parse_counts, CaseCounts, VerificationResult, MAX_EXCERPTS,
};
pub use runner::{CommandVerifier, RunOutput, VerificationRunner, VerifierConfig, VerifyError};
