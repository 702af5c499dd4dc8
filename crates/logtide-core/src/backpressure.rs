//! Backpressure buffer: the bounded queue between producers and the batcher.
//!
//! Producers never wait: [`IngestBuffer::push_batch`] always succeeds and,
//! when the queue would exceed its capacity, drops the oldest queued records
//! instead. The batcher is the only consumer.

use crate::types::LogRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Default queue capacity.
pub const BUFFER_CAPACITY: usize = 5_000;

// ---------------------------------------------------------------------------
// IngestBuffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct IngestBuffer {
    queue: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl Default for IngestBuffer {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY)
    }
}

impl IngestBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `records`, dropping the oldest entries on overflow.
    ///
    /// Returns the number of records dropped by this call.
    pub fn push_batch(&self, records: Vec<LogRecord>) -> usize {
        if records.is_empty() {
            return 0;
        }
        let (dropped, len) = {
            let mut queue = self.lock();
            queue.extend(records);
            let overflow = queue.len().saturating_sub(self.capacity);
            if overflow > 0 {
                queue.drain(..overflow);
            }
            (overflow, queue.len())
        };
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::warn!(
                dropped,
                capacity = self.capacity,
                "ingest buffer full; dropped oldest records"
            );
        }
        debug_assert!(len <= self.capacity);
        self.notify.notify_one();
        dropped
    }

    /// Remove up to `max` records from the front of the queue.
    pub fn drain(&self, max: usize) -> Vec<LogRecord> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Resolve once the queue holds at least one record.
    pub async fn wait_for_data(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total records dropped on overflow since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// AdaptiveDelay
// ---------------------------------------------------------------------------

/// Default floor and ceiling for the inter-flush delay.
pub const MIN_FLUSH_DELAY: Duration = Duration::from_millis(4);
pub const MAX_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Inter-flush delay that tracks how long the consumer took on the last batch.
///
/// A slow batch (processing longer than the current delay) at least doubles
/// the delay; a fast one shrinks it by a quarter. The result is always
/// clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveDelay {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for AdaptiveDelay {
    fn default() -> Self {
        Self::new(MIN_FLUSH_DELAY, MAX_FLUSH_DELAY)
    }
}

impl AdaptiveDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, current: min }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Feed the processing time of the last batch and return the new delay.
    pub fn observe(&mut self, processing: Duration) -> Duration {
        let next = if processing > self.current {
            (self.current * 2).max(processing)
        } else {
            self.current.mul_f64(0.75)
        };
        self.current = next.clamp(self.min, self.max);
        self.current
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
