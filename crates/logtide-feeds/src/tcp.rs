//! TCP ingestion server.
//!
//! One task accepts connections; each accepted socket gets its own task that
//! frames lines with [`LineFramer`], parses them and submits the resulting
//! records to the shared [`IngestSink`] once per read. All connections of a
//! listener share one dedup source, `tcp://<bind>:<port>`.
//!
//! Limits: a semaphore caps concurrent connections (extra sockets are closed
//! on accept), every read carries the idle timeout, and the framer bounds
//! per-connection memory. [`TcpServerHandle::stop`] cancels the accept loop
//! and aborts every connection task, which closes every socket.

use crate::codec::LineFramer;
use crate::error::IngestError;
use bytes::BytesMut;
use chrono::Utc;
use logtide_core::config::TcpConfig;
use logtide_core::{IngestSink, LogRecord, Normalizer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 8 * 1024;

/// Settings fixed for the lifetime of one listener.
#[derive(Debug, Clone)]
struct ConnectionLimits {
    max_buffer: usize,
    max_line: usize,
    idle_timeout: Duration,
}

/// Decrements the active-connection count when a connection task ends,
/// however it ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Running listener.
#[derive(Debug)]
pub struct TcpServerHandle {
    local_addr: SocketAddr,
    source: String,
    active: Arc<AtomicUsize>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TcpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dedup source shared by every connection of this listener.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`Self::active_connections`], for readers that
    /// outlive a borrow of the handle.
    pub fn active_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    /// Stop accepting and close every open socket. Resolves once all
    /// connection tasks are gone.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "tcp accept task failed");
        }
        tracing::info!(addr = %self.local_addr, "tcp server stopped");
    }
}

pub struct TcpServer;

impl TcpServer {
    /// Bind `config.addr()` and start accepting. A bind failure is returned
    /// here and nothing is spawned.
    pub async fn start(
        config: &TcpConfig,
        sink: IngestSink,
        normalizer: Normalizer,
    ) -> Result<TcpServerHandle, IngestError> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| IngestError::Bind { addr: addr.clone(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| IngestError::Bind { addr: addr.clone(), source })?;
        let source = format!("tcp://{}:{}", config.bind, local_addr.port());

        let active = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let ctx = Arc::new(AcceptContext {
            source: source.clone(),
            sink,
            normalizer,
            limits: ConnectionLimits {
                max_buffer: config.max_buffer_bytes,
                max_line: config.max_line_bytes,
                idle_timeout: config.idle_timeout(),
            },
            permits: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            active: Arc::clone(&active),
        });
        let task = tokio::spawn(accept_loop(listener, ctx, cancel.clone()));

        tracing::info!(addr = %local_addr, %source, "tcp server listening");
        Ok(TcpServerHandle {
            local_addr,
            source,
            active,
            cancel,
            task,
        })
    }
}

struct AcceptContext {
    source: String,
    sink: IngestSink,
    normalizer: Normalizer,
    limits: ConnectionLimits,
    permits: Arc<Semaphore>,
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

async fn accept_loop(listener: TcpListener, ctx: Arc<AcceptContext>, cancel: CancellationToken) {
    let mut connections = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        // Reap finished connection tasks so the set does not grow.
        while connections.try_join_next().is_some() {}

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let Ok(permit) = Arc::clone(&ctx.permits).try_acquire_owned() else {
            tracing::warn!(%peer, max = ctx.max_connections, "connection limit reached; closing socket");
            drop(stream);
            continue;
        };
        let guard = ActiveGuard::enter(&ctx.active);
        let ctx = Arc::clone(&ctx);
        let cancel = cancel.clone();
        connections.spawn(async move {
            tracing::debug!(%peer, "connection opened");
            serve_connection(stream, peer, &ctx, cancel).await;
            tracing::debug!(%peer, "connection closed");
            drop(guard);
            drop(permit);
        });
    }
    drop(listener);
    connections.shutdown().await;
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &AcceptContext,
    cancel: CancellationToken,
) {
    let limits = &ctx.limits;
    let mut framer = LineFramer::new(limits.max_buffer, limits.max_line);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = tokio::time::timeout(limits.idle_timeout, stream.read_buf(&mut buf)) => read,
        };
        let eof = match read {
            Err(_) => {
                tracing::info!(%peer, timeout_secs = limits.idle_timeout.as_secs(), "idle timeout; closing connection");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(%peer, error = %e, "socket error; closing connection");
                return;
            }
            Ok(Ok(0)) => true,
            Ok(Ok(_)) => false,
        };

        let records = drain_lines(&mut framer, &mut buf, eof, ctx, peer);
        if !records.is_empty() {
            ctx.sink.submit(&ctx.source, records);
        }
        if eof {
            return;
        }
    }
}

/// Frame and parse every complete line currently buffered.
fn drain_lines(
    framer: &mut LineFramer,
    buf: &mut BytesMut,
    eof: bool,
    ctx: &AcceptContext,
    peer: SocketAddr,
) -> Vec<LogRecord> {
    let now = Utc::now();
    let mut records = Vec::new();
    loop {
        let next = if eof {
            framer.decode_eof(buf)
        } else {
            framer.decode(buf)
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "framing error");
                break;
            }
        };
        match ctx.normalizer.parse_line(&line, &ctx.source, now) {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!(%peer, error = %e, "skipping malformed line"),
        }
    }
    records
}
