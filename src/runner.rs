//! `CommandRunner` trait: abstraction over external tool invocation.
//!
//! Every shell-out the launcher performs (hadoop, cp, tar, unzip, curl,
//! the container stop command) goes through this trait so tests can
//! substitute a recording fake for the real shell.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Runs a shell command line synchronously and reports its exit code.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` via `/bin/sh -c` inside `cwd` and waits for it.
    ///
    /// Returns the exit code (`128 + signal` when the command was killed).
    /// An `Err` means the shell itself could not be spawned.
    async fn run(&self, command: &str, cwd: &Path) -> io::Result<i32>;
}

/// Runs commands through `/bin/sh`, inheriting stdout/stderr.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, cwd: &Path) -> io::Result<i32> {
        debug!(command, cwd = %cwd.display(), "Running command");

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .status()
            .await?;

        Ok(exit_code(status))
    }
}

/// Maps an exit status to a shell-style code.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_runner_is_object_safe() {
        fn _assert_object_safe(_: &dyn CommandRunner) {}
    }

    #[tokio::test]
    async fn test_shell_runner_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ShellRunner.run("true", dir.path()).await.unwrap(), 0);
        assert_eq!(ShellRunner.run("exit 3", dir.path()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shell_runner_uses_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), b"x").unwrap();

        let code = ShellRunner.run("test -f marker", dir.path()).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_shell_runner_signal_maps_to_128_plus() {
        let dir = tempfile::tempdir().unwrap();
        let code = ShellRunner.run("kill -9 $$", dir.path()).await.unwrap();
        assert_eq!(code, 137);
    }

    #[tokio::test]
    async fn test_shell_runner_missing_cwd_is_error() {
        let result = ShellRunner
            .run("true", Path::new("/nonexistent/launcher/dir"))
            .await;
        assert!(result.is_err());
    }
}
