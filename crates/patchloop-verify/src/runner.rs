use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Errors that prevent a verification from producing any result
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Failed to start verification command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Verification workspace does not exist: {0}")]
    MissingWorkspace(String),
}

/// Raw result of running the verification suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_success: bool,
    pub transcript: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn new(exit_success: bool, transcript: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_success,
            transcript: transcript.into(),
            duration,
            timed_out: false,
        }
    }

    /// A run that hit its wall-clock limit counts as a failed verification
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            exit_success: false,
            transcript: format!("Verification timed out after {}s", timeout.as_secs()),
            duration: timeout,
            timed_out: true,
        }
    }
}

/// Runs a project's test suite against a workspace
#[async_trait]
pub trait VerificationRunner: Send + Sync {
    /// Human-readable description of what gets run
    fn describe(&self) -> String;

    async fn run(&self, workspace: &Path) -> Result<RunOutput, VerifyError>;
}

/// Configuration for [`CommandVerifier`]
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Shell command, run through `sh -c`
    pub command: String,
    /// Hard wall-clock limit
    pub timeout: Duration,
    /// Additional environment variables
    pub env_vars: HashMap<String, String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command: "cargo test".to_string(),
            timeout: Duration::from_secs(300),
            env_vars: HashMap::new(),
        }
    }
}

impl VerifierConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.env_vars.insert(key, value);
        self
    }
}

/// Runs a shell command in the workspace and reports its exit status
pub struct CommandVerifier {
    config: VerifierConfig,
}

impl CommandVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }
}

#[async_trait]
impl VerificationRunner for CommandVerifier {
    fn describe(&self) -> String {
        self.config.command.clone()
    }

    async fn run(&self, workspace: &Path) -> Result<RunOutput, VerifyError> {
        if !workspace.is_dir() {
            return Err(VerifyError::MissingWorkspace(
                workspace.display().to_string(),
            ));
        }

        debug!(
            command = %self.config.command,
            workspace = %workspace.display(),
            timeout_secs = self.config.timeout.as_secs(),
            "Running verification"
        );

        let start = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &self.config.command])
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so test binaries started by the shell die with it
        #[cfg(unix)]
        cmd.process_group(0);

        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }

        let child = cmd.spawn()?;
        let group = ProcessGroup::of(&child);

        // A timeout or a dropped future kills the whole group
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(output) => {
                group.release();
                output?
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "Verification timed out"
                );
                return Ok(RunOutput::timed_out(self.config.timeout));
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let transcript = combine_output(&stdout, &stderr);

        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = duration.as_millis(),
            "Verification completed"
        );

        Ok(RunOutput::new(output.status.success(), transcript, duration))
    }
}

/// Kills a verification's process group when dropped, unless released
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// The command exited on its own
    fn release(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // The shell leads its own group, so its pid is the group id
    let result = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill verification process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        stdout.to_string()
    } else if stdout.trim().is_empty() {
        stderr.to_string()
    } else {
        format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
    }
}
