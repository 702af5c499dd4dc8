//! Session wiring: feeds → sink → buffer → batcher → store.
//!
//! [`Pipeline::start`] builds every shared component from a [`Config`],
//! binds the TCP listener (if enabled), spawns one task per poller and the
//! batcher, and returns a handle owning all of them.

use crate::diagnostics::{Diagnostics, DiagnosticsProbe, TcpProbe};
use anyhow::Context;
use logtide_core::batcher::BatcherStats;
use logtide_core::config::Config;
use logtide_core::filter::FilterOptions;
use logtide_core::{
    Batcher, Deduplicator, FilterEngine, FilterError, FilterResponse, FlushEvent, FlushGate,
    IngestBuffer, IngestSink, LogStore, Normalizer,
};
use logtide_feeds::{HttpPoller, PollerSettings, PollerStatus, TcpServer, TcpServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct Pipeline {
    store: Arc<LogStore>,
    buffer: Arc<IngestBuffer>,
    sink: IngestSink,
    filter: FilterEngine,
    batcher: Arc<BatcherStats>,
    gate: FlushGate,
    tcp: Option<TcpServerHandle>,
    pollers: Vec<watch::Receiver<PollerStatus>>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Pipeline {
    /// Start a session. `consumer` receives one [`FlushEvent`] per flush.
    ///
    /// Fails without spawning anything if the listener cannot bind or a
    /// poller URL is invalid.
    pub async fn start(
        config: &Config,
        consumer: Option<mpsc::Sender<FlushEvent>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let normalizer = Normalizer::new(config.store.message_budget_bytes);
        let store = Arc::new(LogStore::new(config.store.store_config()));
        let buffer = Arc::new(IngestBuffer::new(config.buffer.capacity));
        let sink = IngestSink::new(
            Deduplicator::new(config.dedup.max_seen_entries),
            Arc::clone(&buffer),
        );
        let filter = FilterEngine::new(config.filter.offload_threshold)
            .context("spawning filter worker")?;

        let pollers = config
            .pollers
            .iter()
            .map(|p| {
                HttpPoller::new(
                    PollerSettings::from_config(p, &config.http),
                    sink.clone(),
                    normalizer,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tcp = if config.tcp.enabled {
            Some(TcpServer::start(&config.tcp, sink.clone(), normalizer).await?)
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let batcher = Batcher::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            config.buffer.batch_size,
            config.buffer.adaptive_delay(),
            consumer,
        );
        let batcher_stats = batcher.stats();
        let gate = batcher.gate();
        tasks.spawn(batcher.run(cancel.clone()));

        let mut statuses = Vec::with_capacity(pollers.len());
        for poller in pollers {
            statuses.push(poller.subscribe());
            tasks.spawn(poller.run(cancel.clone()));
        }

        tracing::info!(
            tcp = ?tcp.as_ref().map(TcpServerHandle::local_addr),
            pollers = statuses.len(),
            "pipeline started"
        );
        Ok(Self {
            store,
            buffer,
            sink,
            filter,
            batcher: batcher_stats,
            gate,
            tcp,
            pollers: statuses,
            cancel,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn sink(&self) -> &IngestSink {
        &self.sink
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(TcpServerHandle::local_addr)
    }

    /// Filter the current store contents. Yields `None` if superseded by a
    /// later call before the result arrived.
    pub async fn filter(
        &self,
        options: FilterOptions,
    ) -> Result<Option<FilterResponse>, FilterError> {
        self.filter.filter(self.store.snapshot(), options).await
    }

    pub fn filter_engine(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn probe(&self) -> DiagnosticsProbe {
        DiagnosticsProbe {
            tcp: self.tcp.as_ref().map(|t| TcpProbe {
                addr: t.local_addr().to_string(),
                source: t.source().to_string(),
                active: t.active_gauge(),
            }),
            pollers: self.pollers.clone(),
            sink: self.sink.clone(),
            buffer: Arc::clone(&self.buffer),
            store: Arc::clone(&self.store),
            batcher: Arc::clone(&self.batcher),
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.probe().snapshot()
    }

    /// Start a new session: drop every stored and queued record and forget
    /// all dedup history. Feeds keep running; ids keep counting up.
    ///
    /// Waits for an in-flight merge, so no batch drained before the reset
    /// lands in the new session.
    pub fn reset(&self) {
        let _gate = self.gate.lock();
        self.sink.reset();
        self.store.reset();
        tracing::info!("pipeline reset; new session");
    }

    /// Stop every task and close every socket.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(tcp) = self.tcp.take() {
            tcp.stop().await;
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "pipeline task failed");
            }
        }
        tracing::info!(store_len = self.store.len(), "pipeline stopped");
    }
}
