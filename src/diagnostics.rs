//! Read-only diagnostics snapshot of a running pipeline.
//!
//! [`DiagnosticsProbe`] holds shared handles to every counter it reports, so
//! it can be cloned into an HTTP handler and read while the pipeline runs.
//! A snapshot never mutates anything.

use axum::{extract::State, routing::get, Json, Router};
use logtide_core::batcher::BatcherStats;
use logtide_core::dedup::DedupStats;
use logtide_core::{IngestBuffer, IngestSink, LogStore};
use logtide_feeds::PollerStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub tcp: Option<TcpDiagnostics>,
    pub pollers: Vec<PollerStatus>,
    pub buffer: BufferDiagnostics,
    pub dedup: DedupStats,
    pub store: StoreDiagnostics,
    pub batcher: BatcherDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpDiagnostics {
    pub addr: String,
    pub source: String,
    pub active_connections: usize,
    pub dedup_seen: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BufferDiagnostics {
    pub len: usize,
    pub capacity: usize,
    pub dropped_total: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreDiagnostics {
    pub len: usize,
    pub next_id: u64,
    pub trim_threshold: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatcherDiagnostics {
    pub flushes: u64,
    pub records: u64,
    pub current_delay_ms: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct TcpProbe {
    pub addr: String,
    pub source: String,
    pub active: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct DiagnosticsProbe {
    pub(crate) tcp: Option<TcpProbe>,
    pub(crate) pollers: Vec<watch::Receiver<PollerStatus>>,
    pub(crate) sink: IngestSink,
    pub(crate) buffer: Arc<IngestBuffer>,
    pub(crate) store: Arc<LogStore>,
    pub(crate) batcher: Arc<BatcherStats>,
}

impl DiagnosticsProbe {
    pub fn snapshot(&self) -> Diagnostics {
        let tcp = self.tcp.as_ref().map(|probe| TcpDiagnostics {
            addr: probe.addr.clone(),
            source: probe.source.clone(),
            active_connections: probe.active.load(Ordering::SeqCst),
            dedup_seen: self.sink.seen_len(&probe.source),
        });
        let pollers = self
            .pollers
            .iter()
            .map(|rx| {
                let mut status = rx.borrow().clone();
                status.dedup_seen = self.sink.seen_len(&status.url);
                status
            })
            .collect();
        let store = self.store.config();
        Diagnostics {
            tcp,
            pollers,
            buffer: BufferDiagnostics {
                len: self.buffer.len(),
                capacity: self.buffer.capacity(),
                dropped_total: self.buffer.dropped_total(),
            },
            dedup: self.sink.dedup_stats(),
            store: StoreDiagnostics {
                len: self.store.len(),
                next_id: self.store.next_id(),
                trim_threshold: store.trim_threshold,
            },
            batcher: BatcherDiagnostics {
                flushes: self.batcher.flushes(),
                records: self.batcher.records(),
                current_delay_ms: self.batcher.current_delay().as_secs_f64() * 1_000.0,
            },
        }
    }

    /// `GET /diagnostics` returning the snapshot as JSON.
    pub fn router(self) -> Router {
        Router::new()
            .route("/diagnostics", get(serve_snapshot))
            .with_state(self)
    }
}

async fn serve_snapshot(State(probe): State<DiagnosticsProbe>) -> Json<Diagnostics> {
    Json(probe.snapshot())
}
