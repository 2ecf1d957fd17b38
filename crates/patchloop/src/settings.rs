//! Resolution of run settings: CLI flag > `patchloop.toml` > built-in default.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

use patchloop_agent::AgentType;
use patchloop_core::LoopConfig;
use patchloop_generator::RetryPolicy;
use patchloop_git::ProjectType;

use crate::config::ProjectConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AgentChoice {
    Claude,
    Opencode,
}

impl From<AgentChoice> for AgentType {
    fn from(choice: AgentChoice) -> Self {
        match choice {
            AgentChoice::Claude => AgentType::ClaudeCode,
            AgentChoice::Opencode => AgentType::OpenCode,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// What the change should accomplish
    pub description: String,

    /// Project to work on (default: current directory). Never modified.
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Agent backing the generator
    #[arg(short, long, value_enum)]
    pub agent: Option<AgentChoice>,

    /// Model to use (if agent supports it)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Iteration budget
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Verification command, run with `sh -c` in the workspace
    #[arg(long)]
    pub verify_cmd: Option<String>,

    /// Wall-clock limit for one verification run (e.g. "90s", "5m")
    #[arg(long, value_parser = parse_duration)]
    pub verify_timeout: Option<Duration>,

    /// Wall-clock limit for one generator call, retries included
    #[arg(long, value_parser = parse_duration)]
    pub generator_timeout: Option<Duration>,

    /// Output final result as JSON
    #[arg(long)]
    pub json_output: bool,

    /// Dry run: show the resolved settings without executing
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Everything a run needs, after precedence is applied
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub agent: AgentType,
    pub model: Option<String>,
    pub loop_config: LoopConfig,
    pub verify_command: String,
    pub retry: RetryPolicy,
    pub workspace_root: PathBuf,
    pub branch_prefix: String,
}

impl RunSettings {
    pub fn resolve(
        args: &RunArgs,
        project: &ProjectConfig,
        source: &Path,
        data_dir: &Path,
    ) -> Result<Self> {
        let agent = match (args.agent, project.agent.as_deref()) {
            (Some(choice), _) => choice.into(),
            (None, Some(name)) => name
                .parse::<AgentType>()
                .map_err(|e| anyhow::anyhow!(e))
                .context("Invalid agent in patchloop.toml")?,
            (None, None) => AgentType::ClaudeCode,
        };

        let defaults = LoopConfig::default();
        let max_iterations = args
            .max_iterations
            .or(project.max_iterations)
            .unwrap_or(defaults.max_iterations);
        if max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }

        let verify_command = match args
            .verify_cmd
            .clone()
            .or_else(|| project.verify.command.clone())
        {
            Some(cmd) => cmd,
            None => ProjectType::detect(source)
                .default_test_command()
                .map(str::to_string)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "No verification command for {}. Pass --verify-cmd or set [verify].command",
                        source.display()
                    )
                })?,
        };

        let loop_config = LoopConfig::default()
            .with_max_iterations(max_iterations)
            .with_generator_timeout(
                args.generator_timeout
                    .or(project.generator.timeout)
                    .unwrap_or(defaults.generator_timeout),
            )
            .with_verification_timeout(
                args.verify_timeout
                    .or(project.verify.timeout)
                    .unwrap_or(defaults.verification_timeout),
            );

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = project.generator.max_retries {
            retry.max_retries = max_retries;
        }
        if let Some(initial) = project.generator.initial_backoff {
            retry.initial_backoff = initial;
        }

        Ok(Self {
            agent,
            model: args.model.clone().or_else(|| project.model.clone()),
            loop_config,
            verify_command,
            retry,
            workspace_root: project
                .workspace
                .root
                .clone()
                .unwrap_or_else(|| data_dir.join("workspaces")),
            branch_prefix: project
                .workspace
                .branch_prefix
                .clone()
                .unwrap_or_else(|| "patchloop".to_string()),
        })
    }
}
