mod config;
mod fetcher;
mod identity;
mod launcher;
mod runner;
#[cfg(test)]
mod testing;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::fetcher::download::HttpDownloader;
use crate::identity::SystemIdentity;
use crate::launcher::error::FATAL_EXIT_CODE;
use crate::launcher::spec::LaunchSpec;
use crate::launcher::Launcher;
use crate::runner::{CommandRunner, ShellRunner};

fn print_help() {
    println!(
        "\
mesos-launcher v{}

Fetches an executor's resources into its sandbox and launches it.

USAGE:
    mesos-launcher [OPTIONS]

OPTIONS:
    -c, --config PATH     Launcher TOML configuration [default: built-in defaults]
    -s, --spec PATH       Read the launch spec from a TOML file instead of
                          the MESOS_* environment
        --handoff CMD     Do not launch; exec '/bin/sh -c CMD' with the
                          handoff environment for a secondary launcher
    -h, --help            Print this help message and exit
    -V, --version         Print version and exit

ENVIRONMENT VARIABLES:
    RUST_LOG              Log level filter for tracing
                          (e.g. debug, mesos_launcher=debug,warn)
    HADOOP_HOME           Hadoop installation for hdfs:// resources, used when
                          neither the launch spec nor the config sets one
    MESOS_FRAMEWORK_ID, MESOS_EXECUTOR_ID, MESOS_COMMAND, MESOS_EXECUTOR_URIS,
    MESOS_USER, MESOS_WORK_DIRECTORY, MESOS_SLAVE_PID, MESOS_HADOOP_HOME,
    MESOS_REDIRECT_IO, MESOS_SWITCH_USER, MESOS_CONTAINER
                          Launch spec, when --spec is not given

EXAMPLES:
    mesos-launcher                                   # spec from environment
    mesos-launcher -c /etc/mesos/launcher.toml -s launch.toml
    mesos-launcher -s launch.toml --handoff 'lxc-execute -n c1 -- mesos-launcher'",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    spec: Option<String>,
    handoff: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--version" | "-V" => {
                println!("mesos-launcher v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => args.config = Some(value(arg.as_str())?),
            "--spec" | "-s" => args.spec = Some(value(arg.as_str())?),
            "--handoff" => args.handoff = Some(value(arg.as_str())?),
            other => return Err(anyhow!("unexpected argument '{other}' (see --help)")),
        }
    }
    Ok(args)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut spec = match &args.spec {
        Some(path) => LaunchSpec::load(path)?,
        None => LaunchSpec::from_process_env()?,
    };
    config.apply_to(&mut spec);

    // Logs go to stderr so a redirected stdout only carries executor output.
    // Colour only while stderr stays a terminal for the whole run.
    let ansi = std::io::stderr().is_terminal() && !spec.redirect_io;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mesos_launcher=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .init();

    if let Some(path) = &args.config {
        info!("Loaded configuration from {path}");
    }
    info!(
        "Executor {} of framework {} in {}",
        spec.executor_id,
        spec.framework_id,
        spec.work_directory.display()
    );
    info!("Resources: {}", spec.command.uris.len());
    if let Some(container) = spec.container_id() {
        info!("Container: {container}");
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    let downloader = Arc::new(HttpDownloader::new(&config.fetcher, runner.clone()));
    let mut launcher = Launcher::new(spec, &config, runner, downloader, Arc::new(SystemIdentity));

    if let Some(wrapper) = &args.handoff {
        let err = launcher.hand_off(wrapper);
        error!("{err}");
        std::process::exit(FATAL_EXIT_CODE);
    }

    match launcher.run().await {
        Ok(status) => {
            info!(
                state = ?launcher.state(),
                "Executor {} finished with status {status}",
                launcher.spec().executor_id
            );
            std::process::exit(status);
        }
        Err(e) => {
            error!("Failed to set up executor: {e}");
            std::process::exit(FATAL_EXIT_CODE);
        }
    }
}
