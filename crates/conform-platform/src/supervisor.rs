//! Server process supervision.
//!
//! A [`Supervisor`] boots one server process per acquisition and blocks
//! until it accepts connections. The server announces its bound address
//! on stdout (`READY <addr>`), then the supervisor confirms with a connect
//! probe that backs off exponentially until the startup deadline.
//!
//! Teardown is SIGKILL followed by a reap, so the listening socket is gone
//! by the time [`ServerProcess::release`] returns.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conform_core::READY_PREFIX;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::process::ChildStdout;
use tokio::time::Instant;

use crate::adapter::{LaunchSpec, ProcessAdapter, ProcessHandle, ProcessStatus, ServerId, Signal};
use crate::backoff::BackoffConfig;
use crate::error::{Result, SupervisorError};
use crate::native::NativeAdapter;

/// Default time a server gets to start accepting connections.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `release` waits for the killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the fixed-port probe waits for a stale listener.
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Boots and tears down servers-under-test.
pub struct Supervisor {
    adapter: Arc<dyn ProcessAdapter>,
    program: PathBuf,
    server_args: Vec<String>,
    backoff: BackoffConfig,
    inherit_stderr: bool,
}

impl Supervisor {
    /// Creates a supervisor that runs `program serve ...`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            adapter: Arc::new(NativeAdapter::new()),
            program: program.into(),
            server_args: Vec::new(),
            backoff: BackoffConfig::default(),
            inherit_stderr: true,
        }
    }

    /// Replaces the process adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProcessAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Appends arguments to every `serve` invocation.
    #[must_use]
    pub fn with_server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets whether server stderr is passed through.
    #[must_use]
    pub const fn with_inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// The server executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Boots a server for `application` on `host:port` (port 0 for an
    /// ephemeral port) and waits until it accepts connections.
    ///
    /// # Errors
    /// `AddressInUse` if a fixed port already accepts connections,
    /// `Exited` if the process dies first, `StartupTimeout` if the
    /// deadline passes.
    pub async fn acquire(
        &self,
        application: &str,
        host: &str,
        port: u16,
        startup_timeout: Duration,
    ) -> Result<ServerProcess> {
        let spec = LaunchSpec::server(&self.program, application, host, port)
            .args(self.server_args.iter().cloned())
            .with_inherit_stderr(self.inherit_stderr);
        self.launch(spec, host, port, startup_timeout).await
    }

    /// Boots an arbitrary command that follows the readiness protocol.
    ///
    /// # Errors
    /// Same as [`Supervisor::acquire`].
    pub async fn launch(
        &self,
        spec: LaunchSpec,
        host: &str,
        port: u16,
        startup_timeout: Duration,
    ) -> Result<ServerProcess> {
        if port != 0 {
            ensure_port_free(host, port).await?;
        }

        let started = Instant::now();
        let deadline = started + startup_timeout;
        let spawned = self.adapter.spawn(&spec).await?;
        let handle = spawned.handle;

        match self
            .wait_ready(&handle, spawned.stdout, deadline, startup_timeout)
            .await
        {
            Ok(addr) => {
                let ready_after = started.elapsed();
                tracing::info!(
                    pid = handle.pid,
                    server_id = %handle.id,
                    label = %handle.label,
                    addr = %addr,
                    ready_after = ?ready_after,
                    "server ready"
                );
                Ok(ServerProcess {
                    application: spec.label,
                    adapter: Arc::clone(&self.adapter),
                    handle,
                    addr,
                    ready_after,
                    released: false,
                })
            }
            Err(e) => {
                tracing::warn!(pid = handle.pid, label = %handle.label, error = %e, "server failed to start");
                self.adapter.discard(&handle);
                Err(e)
            }
        }
    }

    /// Runs `body` against a fresh server and always releases it.
    ///
    /// # Errors
    /// Returns the acquisition error; `body`'s own outcome is passed through.
    pub async fn with_server<F, Fut, T>(
        &self,
        application: &str,
        host: &str,
        port: u16,
        startup_timeout: Duration,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(SocketAddr) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut server = self.acquire(application, host, port, startup_timeout).await?;
        let result = body(server.addr()).await;
        server.release().await;
        Ok(result)
    }

    async fn wait_ready(
        &self,
        handle: &ProcessHandle,
        stdout: Option<ChildStdout>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<SocketAddr> {
        let stdout = stdout.ok_or_else(|| SupervisorError::spawn("server stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let addr = match tokio::time::timeout_at(deadline, read_announcement(&mut lines)).await {
            Ok(Ok(Some(addr))) => addr,
            Ok(Ok(None)) => return Err(self.exit_error(handle).await),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SupervisorError::StartupTimeout { timeout }),
        };
        tokio::spawn(drain_stdout(lines, handle.pid));

        let mut attempt = 0;
        loop {
            match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return Ok(addr),
                Ok(Err(e)) => {
                    tracing::debug!(pid = handle.pid, attempt = attempt, error = %e, "server not accepting yet");
                }
                Err(_) => return Err(SupervisorError::StartupTimeout { timeout }),
            }

            if let ProcessStatus::Exited(status) = self.adapter.status(handle).await? {
                return Err(SupervisorError::exited(status.to_string()));
            }

            let delay = self.backoff.delay_for(attempt);
            if Instant::now() + delay >= deadline {
                return Err(SupervisorError::StartupTimeout { timeout });
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn exit_error(&self, handle: &ProcessHandle) -> SupervisorError {
        match self.adapter.reap(handle, Duration::from_millis(250)).await {
            Ok(Some(status)) => SupervisorError::exited(status.to_string()),
            Ok(None) => SupervisorError::exited("unknown"),
            Err(_) => SupervisorError::Announcement(
                "server closed stdout without announcing readiness".to_string(),
            ),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("program", &self.program)
            .field("server_args", &self.server_args)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// A running server-under-test, owned by one scenario.
///
/// Dropping it without calling [`ServerProcess::release`] kills the process
/// without waiting for it.
pub struct ServerProcess {
    application: String,
    adapter: Arc<dyn ProcessAdapter>,
    handle: ProcessHandle,
    addr: SocketAddr,
    ready_after: Duration,
    released: bool,
}

impl ServerProcess {
    /// The address the server accepts connections on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Tracking ID.
    #[must_use]
    pub const fn id(&self) -> ServerId {
        self.handle.id
    }

    /// OS process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.handle.pid
    }

    /// The application the server was started with.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Time from spawn until the first accepted probe connection.
    #[must_use]
    pub const fn ready_after(&self) -> Duration {
        self.ready_after
    }

    /// True once [`ServerProcess::release`] ran.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Current process status.
    ///
    /// # Errors
    /// Returns an error if the status query fails.
    pub async fn status(&self) -> Result<ProcessStatus> {
        self.adapter.status(&self.handle).await
    }

    /// Kills the server and waits for it to be reaped.
    ///
    /// Idempotent. Failures are logged and swallowed.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let pid = self.handle.pid;

        if let Err(e) = self.adapter.signal(&self.handle, Signal::Kill).await {
            tracing::debug!(pid = pid, error = %e, "SIGKILL failed, process may be dead");
        }

        match self.adapter.reap(&self.handle, REAP_TIMEOUT).await {
            Ok(Some(status)) => {
                tracing::info!(pid = pid, label = %self.handle.label, status = %status, "server released");
            }
            Ok(None) => tracing::debug!(pid = pid, "server already reaped"),
            Err(e) => {
                tracing::warn!(pid = pid, error = %e, "failed to reap server process");
                self.adapter.discard(&self.handle);
            }
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(pid = self.handle.pid, "server dropped without release, killing");
            self.adapter.discard(&self.handle);
        }
    }
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("application", &self.application)
            .field("handle", &self.handle)
            .field("addr", &self.addr)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

async fn ensure_port_free(host: &str, port: u16) -> Result<()> {
    let target = format!("{host}:{port}");
    match tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(&target)).await {
        Ok(Ok(_)) => Err(SupervisorError::AddressInUse(target)),
        _ => Ok(()),
    }
}

async fn read_announcement<R>(lines: &mut Lines<R>) -> Result<Option<SocketAddr>>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        if let Some(addr) = line.strip_prefix(READY_PREFIX) {
            return addr
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| SupervisorError::Announcement(format!("{addr:?}: {e}")));
        }
        tracing::debug!(line = %line, "server stdout");
    }
    Ok(None)
}

async fn drain_stdout<R>(mut lines: Lines<R>, pid: u32)
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(pid = pid, line = %line, "server stdout");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("/bin/sh").args(["-c", script])
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn listener() -> (TcpListener, SocketAddr) {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_launch_reads_announced_address() {
        let (_listener, addr) = listener().await;
        let supervisor = Supervisor::new("/bin/sh");

        let spec = sh(&format!("echo booting; echo READY {addr}; exec sleep 30"));
        let mut server = supervisor
            .launch(spec, "127.0.0.1", 0, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(server.addr(), addr);
        assert!(server.status().await.unwrap().is_running());

        server.release().await;
        assert!(server.is_released());
        assert_eq!(server.status().await.unwrap(), ProcessStatus::Reaped);

        // Second release is a no-op.
        server.release().await;
    }

    #[tokio::test]
    async fn test_early_exit_reported() {
        let supervisor = Supervisor::new("/bin/sh");
        let err = supervisor
            .launch(sh("exit 3"), "127.0.0.1", 0, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            SupervisorError::Exited { status } => assert!(status.contains('3'), "{status}"),
            other => panic!("expected Exited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let supervisor = Supervisor::new("/bin/sh");
        let started = std::time::Instant::now();
        let err = supervisor
            .launch(sh("exec sleep 30"), "127.0.0.1", 0, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_announced_but_never_accepting_times_out() {
        // Bind and drop to get an address nothing listens on.
        let (listener, addr) = listener().await;
        drop(listener);

        let supervisor = Supervisor::new("/bin/sh");
        let err = supervisor
            .launch(
                sh(&format!("echo READY {addr}; exec sleep 30")),
                "127.0.0.1",
                0,
                Duration::from_millis(300),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
    }

    #[tokio::test]
    async fn test_fixed_port_in_use() {
        let (_listener, addr) = listener().await;
        let supervisor = Supervisor::new("/bin/sh");
        let err = supervisor
            .launch(sh("exec sleep 30"), "127.0.0.1", addr.port(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn test_bad_announcement() {
        let supervisor = Supervisor::new("/bin/sh");
        let err = supervisor
            .launch(
                sh("echo READY not-an-address; exec sleep 30"),
                "127.0.0.1",
                0,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Announcement(_)));
    }

    #[tokio::test]
    async fn test_release_after_process_died() {
        let (_listener, addr) = listener().await;
        let supervisor = Supervisor::new("/bin/sh");
        let mut server = supervisor
            .launch(
                sh(&format!("echo READY {addr}; exit 0")),
                "127.0.0.1",
                0,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.release().await;
        assert!(server.is_released());
    }

    /// Writes an executable that ignores its arguments and announces `addr`.
    fn fake_server(addr: SocketAddr) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("conform-fake-server-{}", ServerId::new()));
        std::fs::write(&path, format!("#!/bin/sh\necho READY {addr}\nexec sleep 30\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_with_server_passes_result_through() {
        let (_listener, addr) = listener().await;
        let program = fake_server(addr);
        let adapter = Arc::new(NativeAdapter::new());
        let supervisor = Supervisor::new(&program)
            .with_adapter(adapter.clone())
            .with_server_args(["--legacy-body-encoding"]);

        let seen = supervisor
            .with_server("valid", "127.0.0.1", 0, DEFAULT_STARTUP_TIMEOUT, |server_addr| async move {
                server_addr
            })
            .await
            .unwrap();
        assert_eq!(seen, addr);
        assert_eq!(adapter.tracked(), 0);

        std::fs::remove_file(program).unwrap();
    }

    #[tokio::test]
    async fn test_drop_without_release_discards() {
        let (_listener, addr) = listener().await;
        let adapter = Arc::new(NativeAdapter::new());
        let supervisor = Supervisor::new("/bin/sh").with_adapter(adapter.clone());
        let server = supervisor
            .launch(
                sh(&format!("echo READY {addr}; exec sleep 30")),
                "127.0.0.1",
                0,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(adapter.tracked(), 1);
        drop(server);
        assert_eq!(adapter.tracked(), 0);
    }

    #[test]
    fn test_read_announcement_skips_noise() {
        let input: &[u8] = b"hello\nREADY 127.0.0.1:4000\n";
        let mut lines = BufReader::new(input).lines();
        let addr = tokio_test::block_on(read_announcement(&mut lines)).unwrap();
        assert_eq!(addr, Some("127.0.0.1:4000".parse().unwrap()));

        let mut lines = BufReader::new(&b"no ready line\n"[..]).lines();
        assert_eq!(tokio_test::block_on(read_announcement(&mut lines)).unwrap(), None);
    }
}
