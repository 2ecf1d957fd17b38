use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::{AgentError, AgentOutput, Invocation};

/// How the prompt reaches the agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptInput<'a> {
    /// Written to stdin, then stdin is closed
    Stdin(&'a str),
    /// Already part of the argument list
    None,
}

/// Run `binary` in the invocation's workspace and capture its output.
///
/// The child is killed if the timeout fires or the future is dropped.
pub(crate) async fn run_process(
    binary: &Path,
    args: &[String],
    input: PromptInput<'_>,
    invocation: &Invocation,
) -> Result<AgentOutput, AgentError> {
    let start = Instant::now();

    debug!(
        binary = %binary.display(),
        args = args.len(),
        workspace = %invocation.workspace.display(),
        "Spawning agent process"
    );

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(&invocation.workspace)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(match input {
            PromptInput::Stdin(_) => Stdio::piped(),
            PromptInput::None => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AgentError::Missing(binary.display().to_string()),
        _ => AgentError::Io(e),
    })?;

    if let (PromptInput::Stdin(prompt), Some(mut stdin)) = (input, child.stdin.take()) {
        // A separate task, so a chatty agent cannot deadlock on a full stdout pipe
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                trace!(error = %e, "Agent closed stdin early");
            }
        });
    }

    let wait = child.wait_with_output();
    let output = match invocation.timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| AgentError::Timeout(limit))??,
        None => wait.await?,
    };

    let reply = AgentOutput::new(
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        output.status.code().unwrap_or(-1),
        start.elapsed(),
    );

    debug!(
        exit_code = reply.exit_code,
        duration_ms = reply.duration.as_millis(),
        "Agent process finished"
    );
    Ok(reply)
}
