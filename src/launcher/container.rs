//! Container wrapper: run the executor as a child, then stop its container.
//!
//! The parent stays alive only to issue exactly one stop command once the
//! child is gone, and reports the child's exit status as its own.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::error::LaunchError;
use crate::config::ContainerConfig;
use crate::runner::{exit_code, CommandRunner};

pub struct ContainerWrapper {
    stop_command: String,
    wait_timeout: Option<Duration>,
    runner: Arc<dyn CommandRunner>,
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ContainerWrapper {
    pub fn new(config: &ContainerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            stop_command: config.stop_command.clone(),
            wait_timeout: config.wait_timeout(),
            runner,
        }
    }

    /// Runs `command` to completion, then stops `container`.
    ///
    /// When `cancel` resolves, or the configured wait timeout expires, the
    /// child is killed first; the container is stopped either way.
    pub async fn wrap<F>(
        &self,
        container: &str,
        mut command: Command,
        cancel: F,
    ) -> Result<i32, LaunchError>
    where
        F: Future<Output = ()>,
    {
        let description = format!("{:?}", command.as_std());
        let fork_failed = |source| LaunchError::ForkFailed {
            command: description.clone(),
            source,
        };

        let mut child = command.spawn().map_err(fork_failed)?;
        info!(pid = ?child.id(), container, "Executor started, waiting for it to exit");

        let deadline = async {
            match self.wait_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = deadline => WaitOutcome::TimedOut,
            _ = cancel => WaitOutcome::Cancelled,
        };

        let status = match outcome {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::TimedOut => kill(&mut child, container, "wait timeout expired").await,
            WaitOutcome::Cancelled => kill(&mut child, container, "cancelled").await,
        };

        self.stop(container).await;

        let code = exit_code(status.map_err(fork_failed)?);
        info!(container, code, "Executor exited");
        Ok(code)
    }

    async fn stop(&self, container: &str) {
        let command = format!("{} {}", self.stop_command, container);
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        info!("Stopping container: {command}");

        match self.runner.run(&command, &cwd).await {
            Ok(0) => {}
            Ok(code) => warn!("'{command}' exited with code {code}"),
            Err(e) => warn!("Failed to run '{command}': {e}"),
        }
    }
}

async fn kill(
    child: &mut Child,
    container: &str,
    reason: &str,
) -> std::io::Result<std::process::ExitStatus> {
    warn!(container, "Killing executor: {reason}");
    if let Err(e) = child.kill().await {
        warn!("Failed to kill executor: {e}");
    }
    child.wait().await
}
