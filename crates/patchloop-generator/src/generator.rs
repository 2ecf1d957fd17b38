use async_trait::async_trait;
use patchloop_agent::{Agent, AgentError, Invocation};
use patchloop_patch::ChangeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{GeneratorPrompts, GeneratorReply, RateLimitTable, RetryPolicy};

/// Hard faults of a generator call. Each one ends the run.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generator still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

impl From<AgentError> for GeneratorError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Timeout(limit) => GeneratorError::Timeout(limit),
            other => GeneratorError::Unavailable(other.to_string()),
        }
    }
}

/// Inputs for the first iteration
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub task_description: &'a str,
    pub repo_summary: &'a str,
    pub workspace: &'a Path,
}

/// Inputs for a fix, grounded in the immediately preceding attempt
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisRequest<'a> {
    pub task_description: &'a str,
    pub last_transcript: &'a str,
    pub last_changes: &'a ChangeSet,
    pub failure_excerpts: &'a [String],
    /// Files of the last change set that could not be applied, one per line
    pub apply_failures: Option<&'a str>,
    pub iteration: u32,
    pub workspace: &'a Path,
}

/// Produces change sets for the iteration loop.
///
/// A reply that cannot be parsed is still `Ok`; callers inspect
/// [`GeneratorReply::is_malformed`].
#[async_trait]
pub trait ChangeGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(&self, request: ProposalRequest<'_>) -> Result<GeneratorReply, GeneratorError>;

    async fn diagnose_and_fix(
        &self,
        request: DiagnosisRequest<'_>,
    ) -> Result<GeneratorReply, GeneratorError>;
}

/// Settings for agent-backed generation
#[derive(Debug, Clone, Default)]
pub struct GeneratorConfig {
    pub model: Option<String>,
    /// Per-call limit (None = no limit)
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// A generator that asks a coding agent CLI for its reply
pub struct AgentGenerator {
    agent: Box<dyn Agent>,
    config: GeneratorConfig,
    rate_limits: Arc<RateLimitTable>,
}

impl AgentGenerator {
    pub fn new(
        agent: Box<dyn Agent>,
        config: GeneratorConfig,
        rate_limits: Arc<RateLimitTable>,
    ) -> Self {
        Self {
            agent,
            config,
            rate_limits,
        }
    }

    fn invocation(&self, workspace: &Path) -> Invocation {
        let mut invocation = Invocation::new(workspace);
        if let Some(timeout) = self.config.timeout {
            invocation = invocation.with_timeout(timeout);
        }
        if let Some(ref model) = self.config.model {
            invocation = invocation.with_model(model.clone());
        }
        invocation
    }

    /// One logical call: throttled attempts are retried with backoff, anything else returns
    async fn call(&self, prompt: &str, workspace: &Path) -> Result<GeneratorReply, GeneratorError> {
        let key = self.agent.agent_type().to_string();
        let invocation = self.invocation(workspace);
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(wait) = self.rate_limits.remaining_backoff(&key) {
                debug!(agent = %key, wait_ms = wait.as_millis(), "Waiting out rate limit backoff");
                tokio::time::sleep(wait).await;
            }

            let output = self.agent.ask(prompt, &invocation).await?;

            if output.is_rate_limited() {
                if attempt > policy.max_retries {
                    return Err(GeneratorError::RateLimited { attempts: attempt });
                }
                self.rate_limits
                    .record_rate_limit(&key, policy.delay_for(attempt));
                continue;
            }

            if !output.success() {
                warn!(
                    agent = self.agent.name(),
                    exit_code = output.exit_code,
                    "Generator agent failed"
                );
                return Err(GeneratorError::Unavailable(format!(
                    "{} exited with code {}: {}",
                    self.agent.name(),
                    output.exit_code,
                    output.failure_detail()
                )));
            }

            self.rate_limits.record_success(&key);
            info!(
                agent = self.agent.name(),
                attempts = attempt,
                duration_secs = output.duration.as_secs_f64(),
                "Generator replied"
            );
            return Ok(GeneratorReply::parse(output.stdout));
        }
    }
}

#[async_trait]
impl ChangeGenerator for AgentGenerator {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn propose(
        &self,
        request: ProposalRequest<'_>,
    ) -> Result<GeneratorReply, GeneratorError> {
        let prompt =
            GeneratorPrompts::build_proposal_prompt(request.task_description, request.repo_summary);
        debug!(prompt_len = prompt.len(), "Requesting change proposal");
        self.call(&prompt, request.workspace).await
    }

    async fn diagnose_and_fix(
        &self,
        request: DiagnosisRequest<'_>,
    ) -> Result<GeneratorReply, GeneratorError> {
        let prompt = GeneratorPrompts::build_diagnosis_prompt(
            request.task_description,
            request.last_transcript,
            request.last_changes,
            request.failure_excerpts,
            request.apply_failures.unwrap_or_default(),
            request.iteration,
        );
        debug!(
            prompt_len = prompt.len(),
            iteration = request.iteration,
            "Requesting diagnosis"
        );
        self.call(&prompt, request.workspace).await
    }
}
