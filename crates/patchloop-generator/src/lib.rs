//! Change generation for patchloop.
//!
//! A [`ChangeGenerator`] turns a task (or the last failed attempt) into a
//! [`GeneratorReply`]: a tagged union of plan, patches and diagnosis
//! messages, with parse failure kept as a value.

mod generator;
mod prompts;
mod reply;
mod retry;

pub use generator::{
    AgentGenerator, ChangeGenerator, DiagnosisRequest, GeneratorConfig, GeneratorError,
    ProposalRequest,
};
pub use prompts::GeneratorPrompts;
pub use reply::{Diagnosis, GeneratorMessage, GeneratorReply, ParsedReply, Plan, ReplyParseError};
pub use retry::{RateLimitState, RateLimitTable, RetryPolicy};
