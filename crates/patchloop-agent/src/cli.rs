use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::process::{run_process, PromptInput};
use crate::{Agent, AgentError, AgentOutput, AgentType, Invocation};

/// An agent driven through its CLI in non-interactive mode
pub struct CliAgent {
    agent_type: AgentType,
    binary: PathBuf,
}

impl CliAgent {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            binary: PathBuf::from(agent_type.binary()),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command_line<'p>(
        &self,
        prompt: &'p str,
        model: Option<&str>,
    ) -> (Vec<String>, PromptInput<'p>) {
        let mut args: Vec<String> = Vec::new();
        match self.agent_type {
            AgentType::ClaudeCode => {
                // Print mode reads the prompt from stdin and answers with plain text
                args.extend(["--print", "--output-format", "text"].map(String::from));
                if let Some(model) = model {
                    args.extend(["--model".to_string(), model.to_string()]);
                }
                (args, PromptInput::Stdin(prompt))
            }
            AgentType::OpenCode => {
                args.push("run".to_string());
                if let Some(model) = model {
                    args.extend(["--model".to_string(), model.to_string()]);
                }
                // End of options, so a prompt starting with '-' stays positional
                args.push("--".to_string());
                args.push(prompt.to_string());
                (args, PromptInput::None)
            }
        }
    }
}

#[async_trait]
impl Agent for CliAgent {
    fn name(&self) -> &str {
        self.agent_type.display_name()
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn ask(
        &self,
        prompt: &str,
        invocation: &Invocation,
    ) -> Result<AgentOutput, AgentError> {
        debug!(agent = self.name(), prompt_len = prompt.len(), "Asking agent");
        let (args, input) = self.command_line(prompt, invocation.model.as_deref());
        run_process(&self.binary, &args, input, invocation).await
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
