//! Process adapter trait.
//!
//! Spawning, signalling and status queries for a server process all go
//! through one contract.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::ChildStdout;

use crate::error::Result;

/// Unique identifier for a spawned server process.
///
/// PIDs get reused once a process is reaped, so processes are tracked by
/// UUID instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(uuid::Uuid);

impl ServerId {
    /// Creates a new random server ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
    /// Pass the child's stderr through instead of discarding it.
    pub inherit_stderr: bool,
    /// Name used in logs.
    pub label: String,
}

impl LaunchSpec {
    /// Creates a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = program
            .file_name()
            .map_or_else(|| program.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            inherit_stderr: true,
            label,
        }
    }

    /// Spec for `<program> serve --app <application> --host <host> --port <port>`.
    #[must_use]
    pub fn server(program: impl Into<PathBuf>, application: &str, host: &str, port: u16) -> Self {
        Self::new(program)
            .args(["serve", "--app", application, "--host", host, "--port"])
            .arg(port.to_string())
            .label(application)
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets whether stderr is inherited.
    #[must_use]
    pub const fn with_inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// Sets the log label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Handle to a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Tracking ID.
    pub id: ServerId,
    /// OS process ID.
    pub pid: u32,
    /// Name used in logs.
    pub label: String,
}

/// A freshly spawned process and its captured stdout.
#[derive(Debug)]
pub struct Spawned {
    /// The process handle.
    pub handle: ProcessHandle,
    /// Piped stdout, read for the readiness line.
    pub stdout: Option<ChildStdout>,
}

/// Signals the supervisor sends. Teardown is always immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Immediate termination.
    Kill,
}

/// Process state as seen by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running.
    Running,
    /// Exited, not yet reaped.
    Exited(ExitStatus),
    /// Already reaped or never spawned by this adapter.
    Reaped,
}

impl ProcessStatus {
    /// True while the process runs.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Process lifecycle adapter.
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawns a process with stdout piped.
    ///
    /// # Errors
    /// Returns an error if spawning fails.
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Spawned>;

    /// Sends a signal to a running process.
    ///
    /// # Errors
    /// Returns an error if the process is not running or signalling fails.
    async fn signal(&self, handle: &ProcessHandle, sig: Signal) -> Result<()>;

    /// Queries the status of a process.
    ///
    /// # Errors
    /// Returns an error if the status query fails.
    async fn status(&self, handle: &ProcessHandle) -> Result<ProcessStatus>;

    /// Waits up to `timeout` for the process to exit and releases its
    /// resources. Returns `None` if it was already reaped.
    ///
    /// # Errors
    /// Returns an error if the process does not exit in time.
    async fn reap(&self, handle: &ProcessHandle, timeout: Duration) -> Result<Option<ExitStatus>>;

    /// Forgets a process without waiting, killing it if it still runs.
    /// Safe to call from `Drop`.
    fn discard(&self, handle: &ProcessHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_unique() {
        let a = ServerId::new();
        let b = ServerId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_server_launch_spec() {
        let spec = LaunchSpec::server("/usr/bin/conform", "valid", "127.0.0.1", 0);
        assert_eq!(
            spec.args,
            vec!["serve", "--app", "valid", "--host", "127.0.0.1", "--port", "0"]
        );
        assert_eq!(spec.label, "valid");
        assert!(spec.inherit_stderr);
    }

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("/bin/sh")
            .args(["-c", "true"])
            .env("RUST_LOG", "debug")
            .with_inherit_stderr(false);
        assert_eq!(spec.label, "sh");
        assert_eq!(spec.args, vec!["-c", "true"]);
        assert_eq!(spec.envs, vec![("RUST_LOG".to_string(), "debug".to_string())]);
        assert!(!spec.inherit_stderr);
    }

    #[test]
    fn test_process_status() {
        assert!(ProcessStatus::Running.is_running());
        assert!(!ProcessStatus::Reaped.is_running());
    }
}
