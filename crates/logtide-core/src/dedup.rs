//! Deduplicator: per-source bounded sets of record signatures.
//!
//! Each source owns a [`SeenSet`] capped at `max_seen` signatures. When an
//! insert pushes a set past the cap, it is trimmed to the most recent
//! `max_seen / 2` signatures (insertion order stands in for recency).
//!
//! # Accepted trade-off
//!
//! Trimming forgets the older half of a source's history, so a record whose
//! signature was evicted is admitted again if the source re-sends it. Under
//! sustained load this lets a bounded-per-trim but otherwise uncapped number
//! of stale duplicates through. Duplicates are preferred over unbounded
//! memory growth; nothing downstream assumes the store is duplicate-free
//! beyond the live window of each set.

use crate::types::LogRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Default per-source signature cap.
pub const MAX_SEEN_ENTRIES: usize = 10_000;

/// Deterministic dedup key for a record.
pub type Signature = u64;

/// Hash of timestamp, level, logger, thread, full message and source.
///
/// `DefaultHasher::new` uses fixed keys, so equal records hash equally for
/// the lifetime of the process.
pub fn signature(record: &LogRecord) -> Signature {
    let mut hasher = DefaultHasher::new();
    record.timestamp.timestamp().hash(&mut hasher);
    record.timestamp.timestamp_subsec_nanos().hash(&mut hasher);
    record.level.hash(&mut hasher);
    record.logger.hash(&mut hasher);
    record.thread.hash(&mut hasher);
    record.full_text().hash(&mut hasher);
    record.source.hash(&mut hasher);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// SeenSet
// ---------------------------------------------------------------------------

/// Insertion-ordered set of signatures with a hard size cap.
#[derive(Debug)]
pub struct SeenSet {
    set: HashSet<Signature>,
    order: VecDeque<Signature>,
    cap: usize,
    trims: u64,
}

impl SeenSet {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(2);
        Self {
            set: HashSet::with_capacity(cap + 1),
            order: VecDeque::with_capacity(cap + 1),
            cap,
            trims: 0,
        }
    }

    pub fn contains(&self, sig: Signature) -> bool {
        self.set.contains(&sig)
    }

    /// Record `sig`. Returns `false` if it was already present.
    pub fn insert(&mut self, sig: Signature) -> bool {
        if !self.set.insert(sig) {
            return false;
        }
        self.order.push_back(sig);
        if self.order.len() > self.cap {
            self.trim();
        }
        true
    }

    fn trim(&mut self) {
        let keep = self.cap / 2;
        let evict = self.order.len() - keep;
        for sig in self.order.drain(..evict) {
            self.set.remove(&sig);
        }
        self.trims += 1;
        debug_assert_eq!(self.set.len(), self.order.len());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// How many times this set has been trimmed.
    pub fn trims(&self) -> u64 {
        self.trims
    }

    pub fn clear(&mut self) {
        self.set.clear();
        self.order.clear();
    }
}

// ---------------------------------------------------------------------------
// Deduplicator
// ---------------------------------------------------------------------------

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub admitted: u64,
    pub rejected: u64,
    pub trims: u64,
}

/// Owns every source's [`SeenSet`]. No other component touches them.
#[derive(Debug)]
pub struct Deduplicator {
    sets: HashMap<String, SeenSet>,
    max_seen: usize,
    stats: DedupStats,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(MAX_SEEN_ENTRIES)
    }
}

impl Deduplicator {
    pub fn new(max_seen: usize) -> Self {
        Self {
            sets: HashMap::new(),
            max_seen,
            stats: DedupStats::default(),
        }
    }

    /// Filter `records` down to those not seen before for `source`.
    ///
    /// Duplicates inside the batch are caught by a batch-local set before
    /// the source's set is updated. Order of the survivors is preserved.
    pub fn admit_batch(&mut self, source: &str, records: Vec<LogRecord>) -> Vec<LogRecord> {
        let max_seen = self.max_seen;
        let seen = self
            .sets
            .entry(source.to_string())
            .or_insert_with(|| SeenSet::new(max_seen));

        let mut in_batch = HashSet::with_capacity(records.len());
        let mut admitted = Vec::with_capacity(records.len());
        let mut admitted_sigs = Vec::with_capacity(records.len());
        let mut rejected = 0u64;

        for record in records {
            let sig = signature(&record);
            if !in_batch.insert(sig) || seen.contains(sig) {
                rejected += 1;
                continue;
            }
            admitted_sigs.push(sig);
            admitted.push(record);
        }

        let trims_before = seen.trims();
        for sig in admitted_sigs {
            seen.insert(sig);
        }
        let trims = seen.trims() - trims_before;
        if trims > 0 {
            tracing::warn!(
                source,
                kept = seen.len(),
                cap = max_seen,
                "dedup set trimmed; older signatures forgotten"
            );
        }

        self.stats.admitted += admitted.len() as u64;
        self.stats.rejected += rejected;
        self.stats.trims += trims;
        admitted
    }

    /// Number of signatures currently held for `source`.
    pub fn seen_len(&self, source: &str) -> usize {
        self.sets.get(source).map_or(0, SeenSet::len)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Forget every source. Used when a new session starts.
    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
