//! `patchloop init`: write a `patchloop.toml` with detected defaults.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;

use patchloop_agent::{create_agent, AgentType};
use patchloop_git::ProjectType;

use crate::config::{default_config_file, CONFIG_FILE_NAME};

pub async fn handle_init(dir: &Path, force: bool) -> Result<()> {
    eprintln!("{}", "Setting up patchloop...".bold());
    eprintln!();

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            "⚠".bright_yellow(),
            config_path.display()
        );
        eprintln!("Run with {} to replace it.", "--force".bright_cyan());
        return Ok(());
    }

    eprintln!("{}", "Checking for available agents...".dimmed());
    let mut chosen: Option<AgentType> = None;
    for agent_type in AgentType::ALL {
        if create_agent(agent_type).is_available().await {
            eprintln!(
                "  {} {} ({})",
                "✓".bright_green(),
                agent_type.display_name(),
                agent_type.config_name()
            );
            chosen = chosen.or(Some(agent_type));
        } else {
            eprintln!(
                "  {} {} (not found)",
                "✗".dimmed(),
                agent_type.display_name()
            );
        }
    }

    let agent = chosen.unwrap_or_else(|| {
        let fallback = AgentType::ClaudeCode;
        eprintln!();
        eprintln!(
            "{} No agents found in PATH. Writing {} anyway; install one before running:",
            "⚠".bright_yellow(),
            fallback.config_name()
        );
        eprintln!("  Claude Code: https://docs.anthropic.com/claude-code");
        eprintln!("  Opencode:    https://opencode.ai/docs/#install");
        fallback
    });

    let project_type = ProjectType::detect(dir);
    let verify_command = project_type.default_test_command();
    eprintln!();
    eprintln!("{}  {}", "Project type:".dimmed(), project_type);
    match verify_command {
        Some(cmd) => eprintln!("{}  {}", "Verification:".dimmed(), cmd),
        None => eprintln!(
            "{} Could not guess a test command; set [verify].command in {}",
            "⚠".bright_yellow(),
            CONFIG_FILE_NAME
        ),
    }

    let content = default_config_file(agent.config_name(), verify_command);
    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    eprintln!();
    eprintln!(
        "{} Config saved to {}",
        "✓".bright_green(),
        config_path.display()
    );

    print_getting_started();
    Ok(())
}

/// Print the getting started guide
pub fn print_getting_started() {
    eprintln!();
    eprintln!("{}", "Getting started:".bold());
    eprintln!(
        "  {} Run: {}",
        "1.".dimmed(),
        "patchloop run \"describe the change\"".bright_cyan()
    );
    eprintln!(
        "  {} List tasks: {}",
        "2.".dimmed(),
        "patchloop tasks list".bright_cyan()
    );
    eprintln!(
        "  {} Inspect one: {}",
        "3.".dimmed(),
        "patchloop tasks show <id>".bright_cyan()
    );
}
