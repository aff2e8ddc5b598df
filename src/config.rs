use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::launcher::spec::LaunchSpec;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub container: ContainerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    /// Used when the launch spec carries no Hadoop home.
    #[serde(default)]
    pub hadoop_home: Option<PathBuf>,
    /// Root for relative resource paths. Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub frameworks_home: Option<PathBuf>,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Set to false for self-signed artifact servers
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContainerConfig {
    /// The container id is appended as the last argument.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Unset means wait for the executor forever.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Kill the executor (and still stop the container) on Ctrl-C.
    #[serde(default)]
    pub cancel_on_interrupt: bool,
}

fn default_download_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_tls_verify() -> bool {
    true
}

fn default_stop_command() -> String {
    "lxc-stop -n".to_string()
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            hadoop_home: None,
            frameworks_home: None,
            download_timeout_secs: default_download_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            tls_verify: default_tls_verify(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            stop_command: default_stop_command(),
            wait_timeout_secs: None,
            cancel_on_interrupt: false,
        }
    }
}

impl ContainerConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${MESOS_HOME}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Fills the paths the launch spec leaves unset.
    pub fn apply_to(&self, spec: &mut LaunchSpec) {
        if spec.hadoop_home.is_none() {
            spec.hadoop_home = self.fetcher.hadoop_home.clone();
        }
        if spec.frameworks_home.is_none() {
            spec.frameworks_home = self.fetcher.frameworks_home.clone();
        }
    }
}
