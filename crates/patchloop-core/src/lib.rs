//! # patchloop-core
//!
//! The iteration loop: request a change, apply it, verify, diagnose, retry,
//! bounded by an iteration budget.
//!
//! ```text
//! pending -> planning -> generating -> testing -> completed
//!                                        |  ^
//!                                        v  |
//!                                 analyzing -> fixing
//! ```
//!
//! Any non-terminal state after `pending` may move to `failed`.

mod cancel;
mod config;
mod error;
mod loop_runner;
mod outcome;
mod task;

pub use cancel::Cancellation;
pub use config::LoopConfig;
pub use error::LoopError;
pub use loop_runner::{IterationLoop, LoopServices};
pub use outcome::{IterationSummary, LoopOutcome, RunReport};
pub use task::{Task, TaskStatus};
