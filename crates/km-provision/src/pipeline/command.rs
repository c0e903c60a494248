//! Stage process execution with streaming output
//!
//! Runs one external program, forwarding stdout lines to `info!` and stderr
//! lines to `warn!` under the stage's name.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Configuration for stage execution
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Stage timeout (kills process if exceeded)
    pub timeout: Duration,
    /// Time to wait for streaming tasks to flush after the process exits
    pub stream_flush_timeout: Duration,
}

impl CommandConfig {
    /// Create with custom timeout, default stream flush timeout
    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            stream_flush_timeout: Duration::from_secs(5),
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    /// Non-zero exit, or `None` when killed by a signal
    Failed(Option<i32>),
    TimedOut,
}

/// Run a command and stream its output into tracing
///
/// The child is killed if this future is dropped, so an interrupted run does
/// not leave a stage running against resources that are being restored.
///
/// # Returns
/// * `Ok(CommandOutcome)` once the process exits or times out
/// * `Err` if the process could not be spawned or waited on
pub async fn run_command_streaming(
    stage: &str,
    program: &str,
    args: &[String],
    config: &CommandConfig,
) -> Result<CommandOutcome> {
    info!(
        stage,
        program,
        args = ?args,
        timeout_secs = config.timeout.as_secs(),
        "Running stage"
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{program}' for stage '{stage}'"))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stage_out = stage.to_string();
    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(stage = %stage_out, "{line}");
        }
    });

    let stage_err = stage.to_string();
    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(stage = %stage_err, "{line}");
        }
    });

    let outcome = match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => CommandOutcome::Succeeded,
        Ok(Ok(status)) => CommandOutcome::Failed(status.code()),
        Ok(Err(e)) => return Err(e).context("Failed waiting for stage process"),
        Err(_) => {
            warn!(
                stage,
                timeout_secs = config.timeout.as_secs(),
                "Stage timed out, killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out process");
            }
            CommandOutcome::TimedOut
        }
    };

    let _ = tokio::time::timeout(config.stream_flush_timeout, stdout_handle).await;
    let _ = tokio::time::timeout(config.stream_flush_timeout, stderr_handle).await;

    Ok(outcome)
}
