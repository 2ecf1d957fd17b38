use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::AgentOutput;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent binary '{0}' not found in PATH")]
    Missing(String),

    #[error("Failed to run agent: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent gave no reply within {0:?}")]
    Timeout(Duration),
}

/// Where and how one prompt is answered
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Directory the agent runs in, so it can read the workspace
    pub workspace: PathBuf,
    pub timeout: Option<Duration>,
    pub model: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            timeout: None,
            model: None,
            env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Supported agent CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    ClaudeCode,
    OpenCode,
}

impl AgentType {
    pub const ALL: [AgentType; 2] = [AgentType::ClaudeCode, AgentType::OpenCode];

    /// Executable looked up in PATH
    pub fn binary(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "claude",
            AgentType::OpenCode => "opencode",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "Claude Code",
            AgentType::OpenCode => "OpenCode",
        }
    }

    /// Name accepted in `patchloop.toml`
    pub fn config_name(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "claude",
            AgentType::OpenCode => "opencode",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::ClaudeCode => write!(f, "claude-code"),
            AgentType::OpenCode => write!(f, "opencode"),
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "claude-code" | "claudecode" => Ok(AgentType::ClaudeCode),
            "opencode" | "open-code" => Ok(AgentType::OpenCode),
            _ => Err(format!("Unknown agent type: {}", s)),
        }
    }
}

/// A coding agent that answers a prompt with text.
///
/// The agent only writes a reply; patchloop applies the changes itself.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn agent_type(&self) -> AgentType;

    /// Send one prompt and capture the reply
    async fn ask(&self, prompt: &str, invocation: &Invocation) -> Result<AgentOutput, AgentError>;

    /// Whether the agent CLI can be started on this system
    async fn is_available(&self) -> bool;
}
