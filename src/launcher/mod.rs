//! Executor launcher.
//!
//! [`Launcher::setup`] fetches resources and leaves the host process as it
//! found it, so its failures are returned. [`Launcher::launch`] is the point
//! of no return: it enters the sandbox, drops privilege, redirects I/O and
//! replaces the process image (or, with a container, waits for the
//! executor and stops the container). Any failure there terminates the
//! process.

pub mod container;
pub mod env;
pub mod error;
pub mod spec;

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use nix::unistd::dup2;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::fetcher::download::Downloader;
use crate::fetcher::ResourceFetcher;
use crate::identity::Identity;
use crate::runner::CommandRunner;
use container::ContainerWrapper;
use env::{build_environment, build_handoff_environment, Environment};
use error::{LaunchError, SetupError, FATAL_EXIT_CODE};
use spec::LaunchSpec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchState {
    Idle,
    DirectoryEntered,
    PrivilegeDropped,
    IoRedirected,
    EnvironmentInstalled,
    Exec,
    ContainerWrapped,
    Terminated,
}

pub struct Launcher {
    spec: LaunchSpec,
    fetcher: ResourceFetcher,
    identity: Arc<dyn Identity>,
    container: ContainerWrapper,
    cancel_on_interrupt: bool,
    state: LaunchState,
}

impl Launcher {
    pub fn new(
        spec: LaunchSpec,
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            spec,
            fetcher: ResourceFetcher::new(runner.clone(), downloader, identity.clone()),
            identity,
            container: ContainerWrapper::new(&config.container, runner),
            cancel_on_interrupt: config.container.cancel_on_interrupt,
            state: LaunchState::Idle,
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    fn advance(&mut self, next: LaunchState) {
        debug!(from = ?self.state, to = ?next, "Launcher state");
        self.state = next;
    }

    /// Prepares the sandbox: ownership, then resources.
    ///
    /// The current directory is restored before returning, whatever the
    /// outcome of the fetch.
    pub async fn setup(&mut self) -> Result<(), SetupError> {
        let original = std::env::current_dir().map_err(SetupError::CurrentDirectory)?;
        let work_dir = self.spec.work_dir().to_path_buf();

        if self.spec.switch_user {
            self.identity
                .transfer_ownership(&work_dir, &self.spec.user)
                .map_err(SetupError::WorkDirectoryOwnership)?;
        }

        std::env::set_current_dir(&work_dir).map_err(|source| SetupError::EnterDirectory {
            path: work_dir.clone(),
            source,
        })?;
        self.advance(LaunchState::DirectoryEntered);

        let fetched = self.fetcher.fetch_all(&self.spec).await;

        let restored = std::env::set_current_dir(&original);
        self.advance(LaunchState::Idle);

        match (fetched, restored) {
            (Ok(paths), Ok(())) => {
                info!("Fetched {} resource(s) into {}", paths.len(), work_dir.display());
                Ok(())
            }
            (Ok(_), Err(source)) => Err(SetupError::RestoreDirectory {
                path: original,
                source,
            }),
            (Err(e), Err(restore)) => {
                error!("Failed to return to {}: {restore}", original.display());
                Err(e.into())
            }
            (Err(e), Ok(())) => Err(e.into()),
        }
    }

    /// Starts the executor. Only returns in container mode, with the
    /// executor's exit status; every failure terminates the process.
    pub async fn launch(&mut self) -> i32 {
        match self.try_launch().await {
            Ok(status) => status,
            Err(e) => fatal(&e),
        }
    }

    /// [`setup`](Self::setup), then [`launch`](Self::launch) if it succeeded.
    pub async fn run(&mut self) -> Result<i32, SetupError> {
        self.setup().await?;
        Ok(self.launch().await)
    }

    /// Replaces the process image with `/bin/sh -c <wrapper>` carrying the
    /// handoff environment, for a secondary launcher to pick up.
    pub fn hand_off(&self, wrapper: &str) -> LaunchError {
        let environment = build_handoff_environment(&self.spec);
        info!(
            "Handing off executor {} to '{wrapper}' ({} variables)",
            self.spec.executor_id,
            environment.len()
        );
        debug!(
            "Handoff URIs: {}",
            environment.get("MESOS_EXECUTOR_URIS").unwrap_or_default()
        );
        exec(shell_command(wrapper, &environment), wrapper)
    }

    async fn try_launch(&mut self) -> Result<i32, LaunchError> {
        let work_dir = self.spec.work_dir().to_path_buf();

        std::env::set_current_dir(&work_dir).map_err(|source| {
            LaunchError::DirectoryEntryFailed {
                path: work_dir.clone(),
                source,
            }
        })?;
        self.advance(LaunchState::DirectoryEntered);

        if self.spec.switch_user {
            self.identity.switch_user(&self.spec.user).map_err(|source| {
                LaunchError::PrivilegeSwitchFailed {
                    user: self.spec.user.clone(),
                    executor_id: self.spec.executor_id.clone(),
                    framework_id: self.spec.framework_id.clone(),
                    source,
                }
            })?;
            self.advance(LaunchState::PrivilegeDropped);
        }

        if self.spec.redirect_io {
            redirect_stdio(&work_dir)?;
            self.advance(LaunchState::IoRedirected);
        }

        let environment = build_environment(&self.spec);
        let command_line = self.spec.command.value.clone();
        let command = shell_command(&command_line, &environment);
        self.advance(LaunchState::EnvironmentInstalled);

        if let Some(container) = self.spec.container_id().map(str::to_string) {
            self.advance(LaunchState::ContainerWrapped);
            let interruptible = self.cancel_on_interrupt;
            let cancel = async move {
                if !interruptible || tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };

            let status = self
                .container
                .wrap(&container, tokio::process::Command::from(command), cancel)
                .await;
            self.advance(LaunchState::Terminated);
            return status;
        }

        self.advance(LaunchState::Exec);
        info!("Executing '/bin/sh -c {command_line}'");
        Err(exec(command, &command_line))
    }
}

/// `/bin/sh -c <line>` with `environment` applied on top of the inherited one.
fn shell_command(line: &str, environment: &Environment) -> Command {
    let mut command = Command::new("/bin/sh");
    command.arg0("sh").arg("-c").arg(line);
    for (name, value) in environment.iter() {
        command.env(name, value);
    }
    command
}

/// Replaces the process image. Returns only if that could not be done.
fn exec(mut command: Command, line: &str) -> LaunchError {
    let source = command.exec();
    LaunchError::ExecFailed {
        command: line.to_string(),
        source,
    }
}

/// Points fds 1 and 2 at `stdout` / `stderr` files in `work_dir`.
fn redirect_stdio(work_dir: &Path) -> Result<(), LaunchError> {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let targets = [
        ("stdout", io::stdout().as_raw_fd()),
        ("stderr", io::stderr().as_raw_fd()),
    ];
    for (stream, fd) in targets {
        let redirect_failed = |source| LaunchError::IoRedirectFailed { stream, source };
        let file = File::create(work_dir.join(stream)).map_err(redirect_failed)?;
        dup2(file.as_raw_fd(), fd).map_err(|errno| redirect_failed(io::Error::from(errno)))?;
    }
    Ok(())
}

fn fatal(err: &LaunchError) -> ! {
    error!("{err}");
    std::process::exit(FATAL_EXIT_CODE)
}
