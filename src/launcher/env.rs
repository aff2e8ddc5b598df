//! Environment for the launched executor.
//!
//! The builders only compute variables; the launcher applies them to the
//! exec'd (or spawned) command in one step.

use super::spec::{encode_uris, LaunchSpec};

/// Ordered `(name, value)` pairs. Later entries win on duplicate names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.push((name.into(), value.into()));
    }

    /// The effective value of `name` once every entry has been applied.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }
}

/// Variables visible to the executor.
pub fn build_environment(spec: &LaunchSpec) -> Environment {
    let mut env = Environment::default();

    // Bind to a random free port, unless the command says otherwise.
    env.set("LIBPROCESS_PORT", "0");

    for variable in &spec.command.environment {
        env.set(&variable.name, &variable.value);
    }

    env.set("MESOS_DIRECTORY", spec.work_directory.to_string_lossy());
    env.set("MESOS_SLAVE_PID", &spec.slave_pid);
    env.set("MESOS_FRAMEWORK_ID", &spec.framework_id);
    env.set("MESOS_EXECUTOR_ID", &spec.executor_id);
    env
}

/// Variables a secondary launcher needs to rebuild `spec`.
pub fn build_handoff_environment(spec: &LaunchSpec) -> Environment {
    let flag = |b: bool| if b { "1" } else { "0" };
    let mut env = build_environment(spec);

    env.set("MESOS_FRAMEWORK_ID", &spec.framework_id);
    env.set("MESOS_COMMAND", &spec.command.value);
    env.set("MESOS_EXECUTOR_URIS", encode_uris(&spec.command.uris));
    env.set("MESOS_USER", &spec.user);
    env.set("MESOS_WORK_DIRECTORY", spec.work_directory.to_string_lossy());
    env.set("MESOS_SLAVE_PID", &spec.slave_pid);
    env.set(
        "MESOS_HADOOP_HOME",
        spec.hadoop_home
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    env.set("MESOS_REDIRECT_IO", flag(spec.redirect_io));
    env.set("MESOS_SWITCH_USER", flag(spec.switch_user));
    env.set("MESOS_CONTAINER", spec.container.clone().unwrap_or_default());
    env
}
