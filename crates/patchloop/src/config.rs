//! Project configuration file support for patchloop.
//!
//! Loads configuration from `patchloop.toml` in the source directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project-level configuration loaded from `patchloop.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Agent backing the generator
    pub agent: Option<String>,
    /// Model to ask the agent for
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub verify: VerifySection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct VerifySection {
    /// Shell command run in the workspace
    pub command: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSection {
    /// Limit for one generator call, retries included
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub initial_backoff: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    /// Where per-task workspaces are created
    pub root: Option<PathBuf>,
    pub branch_prefix: Option<String>,
}

/// The config file name
pub const CONFIG_FILE_NAME: &str = "patchloop.toml";

impl ProjectConfig {
    /// Load configuration from the source directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(source_dir: &Path) -> Result<Option<Self>> {
        let config_path = source_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Commented defaults written by `patchloop init`
pub fn default_config_file(agent: &str, verify_command: Option<&str>) -> String {
    let verify = match verify_command {
        Some(cmd) => format!("command = \"{}\"", cmd),
        None => "# command = \"make test\"".to_string(),
    };

    format!(
        r#"agent = "{agent}"
# model = ""  # Optional: ask the agent for a specific model
max_iterations = 5

[verify]
{verify}
timeout = "5m"

[generator]
timeout = "15m"
max_retries = 3
initial_backoff = "2s"

# [workspace]
# root = "/path/to/workspaces"
# branch_prefix = "patchloop"
"#
    )
}
