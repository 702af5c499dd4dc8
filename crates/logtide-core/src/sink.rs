//! The producer-side entry point: dedup, then enqueue.

use crate::backpressure::IngestBuffer;
use crate::dedup::{DedupStats, Deduplicator};
use crate::types::LogRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What happened to one submitted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub admitted: usize,
    pub duplicates: usize,
    /// Older queued records evicted to make room.
    pub dropped: usize,
}

/// Cloneable handle shared by every producer task.
#[derive(Debug, Clone)]
pub struct IngestSink {
    dedup: Arc<Mutex<Deduplicator>>,
    buffer: Arc<IngestBuffer>,
}

impl IngestSink {
    pub fn new(dedup: Deduplicator, buffer: Arc<IngestBuffer>) -> Self {
        Self {
            dedup: Arc::new(Mutex::new(dedup)),
            buffer,
        }
    }

    fn dedup(&self) -> MutexGuard<'_, Deduplicator> {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Filter `records` through `source`'s dedup set and queue the survivors.
    pub fn submit(&self, source: &str, records: Vec<LogRecord>) -> SubmitOutcome {
        if records.is_empty() {
            return SubmitOutcome::default();
        }
        let offered = records.len();
        let admitted = self.dedup().admit_batch(source, records);
        let admitted_len = admitted.len();
        let dropped = self.buffer.push_batch(admitted);
        SubmitOutcome {
            admitted: admitted_len,
            duplicates: offered - admitted_len,
            dropped,
        }
    }

    pub fn seen_len(&self, source: &str) -> usize {
        self.dedup().seen_len(source)
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup().stats()
    }

    pub fn buffer(&self) -> &Arc<IngestBuffer> {
        &self.buffer
    }

    /// Forget all dedup history and drop queued records.
    pub fn reset(&self) {
        self.dedup().clear();
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(ms: i64) -> LogRecord {
        LogRecord::new(DateTime::from_timestamp_millis(ms).unwrap(), "m", "http://a")
    }

    #[test]
    fn submit_dedups_before_enqueueing() {
        let buffer = Arc::new(IngestBuffer::new(10));
        let sink = IngestSink::new(Deduplicator::default(), buffer.clone());
        let first = sink.submit("http://a", vec![record(1), record(2)]);
        let second = sink.submit("http://a", vec![record(2), record(3)]);
        assert_eq!(first, SubmitOutcome { admitted: 2, duplicates: 0, dropped: 0 });
        assert_eq!(second, SubmitOutcome { admitted: 1, duplicates: 1, dropped: 0 });
        assert_eq!(buffer.len(), 3);
        assert_eq!(sink.seen_len("http://a"), 3);
    }

    #[test]
    fn clones_share_state() {
        let sink = IngestSink::new(Deduplicator::default(), Arc::new(IngestBuffer::new(10)));
        let other = sink.clone();
        sink.submit("http://a", vec![record(1)]);
        assert_eq!(other.submit("http://a", vec![record(1)]).duplicates, 1);
    }

    #[test]
    fn reset_clears_history_and_queue() {
        let sink = IngestSink::new(Deduplicator::default(), Arc::new(IngestBuffer::new(10)));
        sink.submit("http://a", vec![record(1)]);
        sink.reset();
        assert!(sink.buffer().is_empty());
        assert_eq!(sink.submit("http://a", vec![record(1)]).admitted, 1);
    }
}
