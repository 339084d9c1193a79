//! Native process adapter.
//!
//! Spawns servers as child processes of the harness and keeps their
//! `Child` handles so exit status can be observed and the process reaped.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::adapter::{LaunchSpec, ProcessAdapter, ProcessHandle, ProcessStatus, ServerId, Signal, Spawned};
use crate::error::{Result, SupervisorError};

#[cfg(unix)]
use nix::sys::signal::{Signal as NixSignal, kill as nix_kill};
#[cfg(unix)]
use nix::unistd::Pid;

/// Native process adapter.
#[derive(Debug, Default)]
pub struct NativeAdapter {
    children: Mutex<HashMap<ServerId, Child>>,
}

impl NativeAdapter {
    /// Creates a new native adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes not yet reaped.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.children.lock().len()
    }
}

#[async_trait]
impl ProcessAdapter for NativeAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Spawned> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if spec.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::spawn(format!("failed to spawn {}: {e}", spec.program.display()))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::spawn("process has no PID"))?;
        let stdout = child.stdout.take();

        let handle = ProcessHandle {
            id: ServerId::new(),
            pid,
            label: spec.label.clone(),
        };
        self.children.lock().insert(handle.id, child);

        tracing::info!(pid = pid, server_id = %handle.id, label = %handle.label, "spawned server process");

        Ok(Spawned { handle, stdout })
    }

    async fn signal(&self, handle: &ProcessHandle, sig: Signal) -> Result<()> {
        let pid = handle.pid;
        if !self.status(handle).await?.is_running() {
            return Err(SupervisorError::signal(format!("process {pid} is not running")));
        }

        #[cfg(unix)]
        {
            let nix_signal = match sig {
                Signal::Kill => NixSignal::SIGKILL,
            };

            #[allow(clippy::cast_possible_wrap)] // PID from u32 fits in i32 range
            nix_kill(Pid::from_raw(pid as i32), nix_signal)
                .map_err(|e| SupervisorError::signal(format!("kill({pid}, {sig:?}) failed: {e}")))?;
        }

        #[cfg(not(unix))]
        {
            let mut children = self.children.lock();
            let child = children
                .get_mut(&handle.id)
                .ok_or_else(|| SupervisorError::signal(format!("process {pid} is not tracked")))?;
            child
                .start_kill()
                .map_err(|e| SupervisorError::signal(format!("kill({pid}, {sig:?}) failed: {e}")))?;
        }

        tracing::debug!(pid = pid, signal = ?sig, "sent signal to server process");
        Ok(())
    }

    async fn status(&self, handle: &ProcessHandle) -> Result<ProcessStatus> {
        let mut children = self.children.lock();
        let Some(child) = children.get_mut(&handle.id) else {
            return Ok(ProcessStatus::Reaped);
        };
        match child.try_wait() {
            Ok(Some(status)) => Ok(ProcessStatus::Exited(status)),
            Ok(None) => Ok(ProcessStatus::Running),
            Err(e) => Err(SupervisorError::status(format!(
                "failed to check process {}: {e}",
                handle.pid
            ))),
        }
    }

    async fn reap(&self, handle: &ProcessHandle, timeout: Duration) -> Result<Option<ExitStatus>> {
        let removed = self.children.lock().remove(&handle.id);
        let Some(mut child) = removed else {
            return Ok(None);
        };

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                tracing::debug!(pid = handle.pid, status = %status, "reaped server process");
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                self.children.lock().insert(handle.id, child);
                Err(SupervisorError::status(format!(
                    "process {} did not exit within {timeout:?}",
                    handle.pid
                )))
            }
        }
    }

    fn discard(&self, handle: &ProcessHandle) {
        let removed = self.children.lock().remove(&handle.id);
        if let Some(mut child) = removed {
            if let Err(e) = child.start_kill() {
                tracing::debug!(pid = handle.pid, error = %e, "kill on discard failed, process may be dead");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("/bin/sh").args(["-c", script])
    }

    #[test]
    fn test_native_adapter_default() {
        let adapter = NativeAdapter::default();
        assert_eq!(adapter.tracked(), 0);
    }

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let adapter = NativeAdapter::new();
        let spawned = adapter.spawn(&sh("exec sleep 30")).await.unwrap();
        let handle = spawned.handle;
        assert!(spawned.stdout.is_some());
        assert_eq!(adapter.tracked(), 1);

        assert_eq!(adapter.status(&handle).await.unwrap(), ProcessStatus::Running);
        adapter.signal(&handle, Signal::Kill).await.unwrap();

        let status = adapter
            .reap(&handle, Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first reap returns the status");
        assert_eq!(status.signal(), Some(9));
        assert_eq!(adapter.tracked(), 0);
    }

    #[tokio::test]
    async fn test_reap_twice_is_none() {
        let adapter = NativeAdapter::new();
        let handle = adapter.spawn(&sh("exit 0")).await.unwrap().handle;
        let status = adapter.reap(&handle, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.and_then(|s| s.code()), Some(0));
        assert!(adapter.reap(&handle, Duration::from_secs(5)).await.unwrap().is_none());
        assert_eq!(adapter.status(&handle).await.unwrap(), ProcessStatus::Reaped);
    }

    #[tokio::test]
    async fn test_signal_after_reap_fails() {
        let adapter = NativeAdapter::new();
        let handle = adapter.spawn(&sh("exit 0")).await.unwrap().handle;
        adapter.reap(&handle, Duration::from_secs(5)).await.unwrap();
        let result = adapter.signal(&handle, Signal::Kill).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exited_status_visible_before_reap() {
        let adapter = NativeAdapter::new();
        let handle = adapter.spawn(&sh("exit 3")).await.unwrap().handle;

        let mut status = adapter.status(&handle).await.unwrap();
        for _ in 0..100 {
            if !status.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = adapter.status(&handle).await.unwrap();
        }
        match status {
            ProcessStatus::Exited(s) => assert_eq!(s.code(), Some(3)),
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reap_timeout_keeps_tracking() {
        let adapter = NativeAdapter::new();
        let handle = adapter.spawn(&sh("exec sleep 30")).await.unwrap().handle;
        let result = adapter.reap(&handle, Duration::from_millis(20)).await;
        assert!(result.is_err());
        assert_eq!(adapter.tracked(), 1);
        adapter.discard(&handle);
        assert_eq!(adapter.tracked(), 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let adapter = NativeAdapter::new();
        let err = adapter
            .spawn(&LaunchSpec::new("/nonexistent/conform-server"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn(_)));
    }
}
