//! Adaptive batcher: the single writer of the [`LogStore`].
//!
//! One flush task drains up to `batch_size` records from the
//! [`IngestBuffer`], merge-inserts them into the store and hands the accepted
//! rows to the consumer as a [`FlushEvent`]. The time spent merging plus
//! delivering drives an [`AdaptiveDelay`] that spaces out consecutive flushes
//! while the buffer stays non-empty. When the buffer runs dry the task parks
//! on [`IngestBuffer::wait_for_data`] instead of polling.
//!
//! Session resets take the [`FlushGate`], so a batch is either merged
//! before the reset or drained after it.

use crate::backpressure::{AdaptiveDelay, IngestBuffer};
use crate::store::LogStore;
use crate::types::LogRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default number of records moved per flush.
pub const BATCH_SIZE: usize = 200;

/// Rows accepted by one flush, delivered to the consumer.
#[derive(Debug, Clone)]
pub struct FlushEvent {
    /// Accepted rows with their ids, in `(timestamp, id)` order.
    pub records: Vec<LogRecord>,
    /// Store size after the flush.
    pub store_len: usize,
    /// Rows trimmed from the head by this flush.
    pub trimmed: usize,
}

/// Read-only counters shared with diagnostics.
#[derive(Debug, Default)]
pub struct BatcherStats {
    flushes: AtomicU64,
    records: AtomicU64,
    delay_micros: AtomicU64,
}

impl BatcherStats {
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Delay chosen after the most recent flush.
    pub fn current_delay(&self) -> Duration {
        Duration::from_micros(self.delay_micros.load(Ordering::Relaxed))
    }
}

/// Held across drain and merge. Hold it to change the session.
#[derive(Debug, Clone, Default)]
pub struct FlushGate(Arc<Mutex<()>>);

impl FlushGate {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Batcher {
    buffer: Arc<IngestBuffer>,
    store: Arc<LogStore>,
    batch_size: usize,
    delay: AdaptiveDelay,
    consumer: Option<mpsc::Sender<FlushEvent>>,
    stats: Arc<BatcherStats>,
    gate: FlushGate,
    cancel: CancellationToken,
}

impl Batcher {
    pub fn new(
        buffer: Arc<IngestBuffer>,
        store: Arc<LogStore>,
        batch_size: usize,
        delay: AdaptiveDelay,
        consumer: Option<mpsc::Sender<FlushEvent>>,
    ) -> Self {
        let stats = Arc::new(BatcherStats::default());
        stats
            .delay_micros
            .store(delay.current().as_micros() as u64, Ordering::Relaxed);
        Self {
            buffer,
            store,
            batch_size: batch_size.max(1),
            delay,
            consumer,
            stats,
            gate: FlushGate::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> Arc<BatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn current_delay(&self) -> Duration {
        self.delay.current()
    }

    pub fn gate(&self) -> FlushGate {
        self.gate.clone()
    }

    /// Move one batch from the buffer into the store.
    ///
    /// Returns `None` when the buffer was empty or the batcher was cancelled
    /// while the consumer was full, otherwise the delay to wait before the
    /// next flush.
    pub async fn flush_once(&mut self) -> Option<Duration> {
        let started = Instant::now();
        let outcome = {
            let _gate = self.gate.lock();
            let batch = self.buffer.drain(self.batch_size);
            if batch.is_empty() {
                return None;
            }
            self.store.insert_sorted(batch)
        };
        let accepted = outcome.accepted.len();
        if outcome.trimmed > 0 {
            tracing::info!(
                trimmed = outcome.trimmed,
                len = outcome.len,
                "store trimmed oldest records"
            );
        }

        if let Some(tx) = &self.consumer {
            let event = FlushEvent {
                records: outcome.accepted,
                store_len: outcome.len,
                trimmed: outcome.trimmed,
            };
            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("cancelled while the flush consumer was full");
                    return None;
                }
                sent = tx.send(event) => sent.is_ok(),
            };
            if !delivered {
                tracing::debug!("flush consumer closed; continuing without one");
                self.consumer = None;
            }
        }

        let next = self.delay.observe(started.elapsed());
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.stats
            .delay_micros
            .store(next.as_micros() as u64, Ordering::Relaxed);
        tracing::trace!(accepted, delay_ms = next.as_millis() as u64, "flushed batch");
        Some(next)
    }

    /// Flush until `cancel` fires. Records still queued at cancellation are
    /// left in the buffer.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.buffer.wait_for_data() => {}
            }
            while let Some(delay) = self.flush_once().await {
                if self.buffer.is_empty() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        tracing::debug!(flushes = self.stats.flushes(), "batcher stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
