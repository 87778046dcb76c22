//! External process invocation with deadline and cancellation.
//!
//! Programs are always spawned from an argument array, never through a shell.

use crate::utils::errors::{BackupError, Result};
use std::ffi::OsStr;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Deadline and cancel signal shared by every tool call of one operation
#[derive(Debug, Clone)]
pub struct ToolControl {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

/// Handed to blocking tool work, which must call [`StopSignal::check`]
/// between units of work and return as soon as it fails.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(CancellationToken);

impl StopSignal {
    pub fn check(&self) -> Result<()> {
        if self.0.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }
}

impl ToolControl {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    fn timed_out(&self, tool: &str) -> BackupError {
        tracing::error!(tool, timeout = ?self.timeout, "External tool timed out");
        BackupError::ToolTimeout {
            tool: tool.to_string(),
            after: self.timeout,
        }
    }

    fn cancelled(&self, tool: &str) -> BackupError {
        tracing::warn!(tool, "External tool cancelled");
        BackupError::Cancelled
    }

    /// Await `fut` unless the deadline passes or the token fires first.
    /// `fut` is dropped on either, so it must own whatever it drives
    /// (a child with `kill_on_drop`, not a blocking task).
    pub async fn guard<T, F>(&self, tool: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(self.timed_out(tool)),
            },
            _ = self.cancel.cancelled() => Err(self.cancelled(tool)),
        }
    }

    /// Run `work` on the blocking pool under the deadline and token.
    ///
    /// On timeout or cancellation the worker's [`StopSignal`] is raised and
    /// the error is reported only once `work` has returned.
    pub async fn blocking<T, F>(&self, tool: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StopSignal) -> Result<T> + Send + 'static,
    {
        let stop = StopSignal(self.cancel.child_token());
        let worker = stop.clone();
        let mut task = tokio::task::spawn_blocking(move || work(&worker));

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let err = tokio::select! {
            joined = &mut task => return joined?,
            _ = &mut deadline => self.timed_out(tool),
            _ = self.cancel.cancelled() => self.cancelled(tool),
        };

        stop.0.cancel();
        match task.await {
            Ok(Ok(_)) => tracing::warn!(tool, "Tool finished while stopping"),
            Ok(Err(e)) => tracing::debug!(tool, "Tool stopped: {}", e),
            Err(e) => tracing::warn!(tool, "Tool task failed while stopping: {}", e),
        }
        Err(err)
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `program args...` to completion. Non-zero exit becomes
/// `ExternalTool`; the child is killed if the guard gives up on it.
pub async fn run_tool<I, S>(
    program: &str,
    args: I,
    envs: &[(&str, &str)],
    control: &ToolControl,
) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(tool = program, "Spawning external tool");
    let child = cmd.spawn().map_err(|e| BackupError::ExternalTool {
        tool: program.to_string(),
        status: None,
        stderr: format!("failed to spawn: {}", e),
    })?;

    let output = control
        .guard(program, async {
            child.wait_with_output().await.map_err(BackupError::from)
        })
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(BackupError::ExternalTool {
            tool: program.to_string(),
            status: output.status.code(),
            stderr,
        });
    }
    Ok(ToolOutput {
        stdout: output.stdout,
        stderr,
    })
}
