use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// A resource the executor needs in its sandbox.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ResourceUri {
    pub value: String,
    #[serde(default)]
    pub executable: bool,
}

impl ResourceUri {
    pub fn new(value: impl Into<String>, executable: bool) -> Self {
        Self {
            value: value.into(),
            executable,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}

/// What to run and what it needs.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct CommandInfo {
    /// Shell command line, run via `/bin/sh -c`.
    pub value: String,
    #[serde(default)]
    pub uris: Vec<ResourceUri>,
    #[serde(default)]
    pub environment: Vec<EnvVariable>,
}

/// Everything needed to prepare and launch one executor.
///
/// Built once by the caller and treated as read-only afterwards.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LaunchSpec {
    pub framework_id: String,
    pub executor_id: String,
    pub command: CommandInfo,
    pub user: String,
    pub work_directory: PathBuf,
    /// Address of the parent (slave) process.
    pub slave_pid: String,
    /// Hadoop installation used for `hdfs://` / `hftp://` resources.
    #[serde(default)]
    pub hadoop_home: Option<PathBuf>,
    /// Root for relative local resource paths.
    #[serde(default)]
    pub frameworks_home: Option<PathBuf>,
    #[serde(default)]
    pub redirect_io: bool,
    #[serde(default)]
    pub switch_user: bool,
    /// Container to stop once the executor exits. Empty means none.
    #[serde(default)]
    pub container: Option<String>,
}

impl LaunchSpec {
    /// Loads a launch spec from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading launch spec {path}"))?;
        let spec: LaunchSpec = toml::from_str(&content)?;
        Ok(spec)
    }

    /// Rebuilds a spec from the variables written by
    /// [`build_handoff_environment`](super::env::build_handoff_environment).
    pub fn from_handoff_env<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| anyhow!("missing environment variable {name}"))
        };
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let flag = |name: &str| lookup(name).as_deref() == Some("1");

        let uris = lookup("MESOS_EXECUTOR_URIS")
            .map(|encoded| decode_uris(&encoded))
            .unwrap_or_default();

        Ok(Self {
            framework_id: required("MESOS_FRAMEWORK_ID")?,
            executor_id: required("MESOS_EXECUTOR_ID")?,
            command: CommandInfo {
                value: required("MESOS_COMMAND")?,
                uris,
                // Already present in the inherited environment.
                environment: Vec::new(),
            },
            user: required("MESOS_USER")?,
            work_directory: PathBuf::from(required("MESOS_WORK_DIRECTORY")?),
            slave_pid: required("MESOS_SLAVE_PID")?,
            hadoop_home: non_empty("MESOS_HADOOP_HOME").map(PathBuf::from),
            frameworks_home: None,
            redirect_io: flag("MESOS_REDIRECT_IO"),
            switch_user: flag("MESOS_SWITCH_USER"),
            container: non_empty("MESOS_CONTAINER"),
        })
    }

    /// Reads the handoff variables from this process's environment.
    pub fn from_process_env() -> Result<Self> {
        Self::from_handoff_env(|name| std::env::var(name).ok())
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_directory
    }

    /// The container id, treating an empty string as no container.
    pub fn container_id(&self) -> Option<&str> {
        self.container.as_deref().filter(|c| !c.is_empty())
    }
}

/// Encodes URIs as space-separated `value+flag` tokens.
///
/// Values containing spaces or `+` are not escaped; consumers split on
/// whitespace and on the last `+` of each token.
pub fn encode_uris(uris: &[ResourceUri]) -> String {
    uris.iter()
        .map(|uri| format!("{}+{}", uri.value, if uri.executable { "1" } else { "0" }))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn decode_uris(encoded: &str) -> Vec<ResourceUri> {
    encoded
        .split_whitespace()
        .map(|token| match token.rsplit_once('+') {
            Some((value, flag)) => ResourceUri::new(value, flag == "1"),
            None => ResourceUri::new(token, false),
        })
        .collect()
}
