//! Accept loop, request dispatch and response streaming.
//!
//! Each connection carries exactly one request. The application runs on a
//! blocking thread with panics contained. Nothing is written until the
//! response head is known to be valid and the first non-empty body chunk
//! (or the whole materialized body) has been produced, so every failure up
//! to that point becomes a clean 500 with no application headers. A failure
//! after the head was sent ends the connection without the terminating
//! chunk.

use std::any::Any;
use std::io::Write as _;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conform_core::{
    AppBody, AppError, Application, BodyEncoding, ChunkStream, ContractViolation, Environ,
    READY_PREFIX, ResponseHead, ResponseStarter, ServerConfig, chunk_bytes, materialize,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{RequestError, Result, ServerError};
use crate::http::{self, Framing, Request};

const INTERNAL_ERROR: &str = "Internal Server Error";

/// Why a response could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// The application returned an error.
    #[error("application error: {0}")]
    Application(AppError),

    /// The application panicked.
    #[error("application panicked: {0}")]
    Panic(String),

    /// The application broke the response contract.
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

/// How a request ended, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A complete response with this status was written.
    Sent(u16),
    /// The head with this status was written, then the body failed.
    Aborted(u16),
    /// The peer went away while writing.
    Disconnected,
}

enum Prepared {
    Complete {
        head: ResponseHead,
        body: Vec<Vec<u8>>,
    },
    Streaming {
        head: ResponseHead,
        first: Vec<u8>,
        rest: ChunkStream,
        starter: ResponseStarter,
        index: usize,
    },
    Failed(Failure),
}

/// Binds a listening socket with `SO_REUSEADDR` set.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.bind_addr();
    let bind_err = |source: std::io::Error| ServerError::Bind {
        addr: addr.clone(),
        source,
    };

    let resolved = tokio::net::lookup_host(&addr)
        .await
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| {
            bind_err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })?;

    let socket = if resolved.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(resolved).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)
}

/// Serves `app` on `listener` forever.
pub async fn serve(
    listener: TcpListener,
    app: Arc<dyn Application>,
    config: ServerConfig,
) -> Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, body_encoding = %config.body_encoding(), "serving");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let app = Arc::clone(&app);
        let config = config.clone();
        let span = tracing::debug_span!("connection", %peer);
        tokio::spawn(handle_connection(stream, local, peer, app, config).instrument(span));
    }
}

/// A server running on the current tokio runtime.
#[derive(Debug)]
pub struct RunningServer {
    addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    /// The bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Binds and serves in a background task.
pub async fn start(app: Arc<dyn Application>, config: ServerConfig) -> Result<RunningServer> {
    config.validate()?;
    let listener = bind(&config).await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(serve(listener, app, config));
    Ok(RunningServer { addr, task })
}

/// Blocking entry point: binds `host:port` and serves `app` forever.
pub fn run(app: Arc<dyn Application>, host: &str, port: u16) -> Result<()> {
    run_with_config(app, ServerConfig::new(host, port))
}

/// Blocking entry point with full configuration.
///
/// After binding, writes `READY <addr>` to stdout so a supervising process
/// can learn the actual address of an ephemeral port.
pub fn run_with_config(app: Arc<dyn Application>, config: ServerConfig) -> Result<()> {
    config.validate()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ServerError::Runtime(e.to_string()))?;

    runtime.block_on(async move {
        let listener = bind(&config).await?;
        announce(listener.local_addr()?)?;
        serve(listener, app, config).await
    })
}

/// Writes the readiness line.
pub fn announce(addr: SocketAddr) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{READY_PREFIX}{addr}")?;
    stdout.flush()?;
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    local: SocketAddr,
    peer: SocketAddr,
    app: Arc<dyn Application>,
    config: ServerConfig,
) {
    let started = Instant::now();

    let request = match tokio::time::timeout(
        config.read_timeout(),
        read_request(&mut stream, &config),
    )
    .await
    {
        Ok(Ok(request)) => request,
        Ok(Err(e)) if e.is_disconnect() => {
            tracing::debug!(error = %e, "connection closed before request");
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, status = e.status(), "rejecting request");
            let _ = stream
                .write_all(&http::error_response(e.status(), e.reason()))
                .await;
            let _ = stream.shutdown().await;
            return;
        }
        Err(_) => {
            tracing::debug!(timeout = ?config.read_timeout(), "read timed out");
            return;
        }
    };

    let method = request.method.clone();
    let target = request.target.clone();
    let environ = request.into_environ(local, peer);

    let outcome = respond(&mut stream, app, environ, config.body_encoding(), method == "HEAD").await;
    let _ = stream.shutdown().await;

    let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    match outcome {
        Outcome::Sent(status) => {
            tracing::info!(%method, path = %target, status, elapsed_us, "request completed");
        }
        Outcome::Aborted(status) => {
            tracing::warn!(%method, path = %target, status, elapsed_us, "response aborted mid-body");
        }
        Outcome::Disconnected => {
            tracing::debug!(%method, path = %target, elapsed_us, "peer disconnected");
        }
    }
}

/// Reads one request head and its body.
pub async fn read_request<S>(stream: &mut S, config: &ServerConfig) -> std::result::Result<Request, RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(end) = http::find_head_end(&buf) {
            break end;
        }
        if buf.len() >= config.max_request_head_bytes {
            return Err(RequestError::HeadTooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    if head_end > config.max_request_head_bytes {
        return Err(RequestError::HeadTooLarge);
    }

    let mut request = http::parse_head(&buf[..head_end])?;
    if request.header("transfer-encoding").is_some() {
        return Err(RequestError::Unsupported("chunked request bodies".into()));
    }
    let len = request.content_length()?;
    if len > config.max_request_body_bytes {
        return Err(RequestError::BodyTooLarge);
    }

    let mut body = buf.split_off(head_end);
    while body.len() < len {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::Closed);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(len);
    request.body = body;
    Ok(request)
}

/// Runs the application and writes its response.
pub async fn respond<S>(
    stream: &mut S,
    app: Arc<dyn Application>,
    environ: Environ,
    encoding: BodyEncoding,
    head_only: bool,
) -> Outcome
where
    S: AsyncWrite + Unpin,
{
    let prepared = tokio::task::spawn_blocking(move || prepare(app.as_ref(), &environ, encoding))
        .await
        .unwrap_or_else(|e| Prepared::Failed(Failure::Panic(e.to_string())));

    match write_prepared(stream, prepared, encoding, head_only).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!(error = %e, "write failed");
            Outcome::Disconnected
        }
    }
}

async fn write_prepared<S>(
    stream: &mut S,
    prepared: Prepared,
    encoding: BodyEncoding,
    head_only: bool,
) -> std::io::Result<Outcome>
where
    S: AsyncWrite + Unpin,
{
    match prepared {
        Prepared::Failed(failure) => {
            tracing::warn!(error = %failure, "application failed before response head, sending 500");
            stream
                .write_all(&http::error_response(500, INTERNAL_ERROR))
                .await?;
            Ok(Outcome::Sent(500))
        }
        Prepared::Complete { head, body } => {
            let len = body.iter().map(Vec::len).sum();
            let mut out = http::encode_head(head.status, &head.reason, &head.headers, Framing::Length(len));
            if !head_only {
                for chunk in body {
                    out.extend_from_slice(&chunk);
                }
            }
            stream.write_all(&out).await?;
            Ok(Outcome::Sent(head.status))
        }
        Prepared::Streaming {
            head,
            first,
            mut rest,
            starter,
            mut index,
        } => {
            let status = head.status;
            stream
                .write_all(&http::encode_head(status, &head.reason, &head.headers, Framing::Chunked))
                .await?;
            if head_only {
                stream.flush().await?;
                return Ok(Outcome::Sent(status));
            }
            stream.write_all(&http::encode_chunk(&first)).await?;
            stream.flush().await?;

            loop {
                let pulled = tokio::task::spawn_blocking(move || {
                    let result = pull(&mut rest, index, encoding);
                    (result, rest)
                })
                .await;
                let (result, returned) = match pulled {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "body task failed after response head");
                        return Ok(Outcome::Aborted(status));
                    }
                };
                rest = returned;
                index += 1;

                if starter.calls() > 1 {
                    let violation = ContractViolation::AlreadyStarted {
                        calls: starter.calls(),
                    };
                    tracing::warn!(error = %violation, "contract violation after response head");
                    return Ok(Outcome::Aborted(status));
                }

                match result {
                    Ok(Some(chunk)) if chunk.is_empty() => {}
                    Ok(Some(chunk)) => {
                        stream.write_all(&http::encode_chunk(&chunk)).await?;
                        stream.flush().await?;
                    }
                    Ok(None) => {
                        stream.write_all(http::LAST_CHUNK).await?;
                        return Ok(Outcome::Sent(status));
                    }
                    Err(failure) => {
                        tracing::warn!(error = %failure, "application failed after response head");
                        return Ok(Outcome::Aborted(status));
                    }
                }
            }
        }
    }
}

fn prepare(app: &dyn Application, environ: &Environ, encoding: BodyEncoding) -> Prepared {
    let starter = ResponseStarter::new();

    let body = match contain(|| app.call(environ, &starter)) {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => return Prepared::Failed(Failure::Application(e)),
        Err(failure) => return Prepared::Failed(failure),
    };

    match body {
        AppBody::Value(value) => {
            let head = match starter.resolve() {
                Ok(head) => head,
                Err(v) => return Prepared::Failed(v.into()),
            };
            match materialize(value, encoding) {
                Ok(body) => Prepared::Complete { head, body },
                Err(v) => Prepared::Failed(v.into()),
            }
        }
        AppBody::Stream(mut rest) => {
            // Generators may start the response lazily, so the head is
            // resolved only once the first non-empty chunk exists.
            let mut index = 0;
            loop {
                match pull(&mut rest, index, encoding) {
                    Ok(Some(chunk)) if chunk.is_empty() => index += 1,
                    Ok(Some(first)) => {
                        return match starter.resolve() {
                            Ok(head) => Prepared::Streaming {
                                head,
                                first,
                                rest,
                                starter,
                                index: index + 1,
                            },
                            Err(v) => Prepared::Failed(v.into()),
                        };
                    }
                    Ok(None) => {
                        return match starter.resolve() {
                            Ok(head) => Prepared::Complete { head, body: Vec::new() },
                            Err(v) => Prepared::Failed(v.into()),
                        };
                    }
                    Err(failure) => return Prepared::Failed(failure),
                }
            }
        }
    }
}

fn pull(
    stream: &mut ChunkStream,
    index: usize,
    encoding: BodyEncoding,
) -> std::result::Result<Option<Vec<u8>>, Failure> {
    match contain(|| stream.next())? {
        None => Ok(None),
        Some(Ok(chunk)) => Ok(Some(chunk_bytes(chunk, index, encoding)?)),
        Some(Err(e)) => Err(Failure::Application(e)),
    }
}

fn contain<T>(f: impl FnOnce() -> T) -> std::result::Result<T, Failure> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Failure::Panic(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
