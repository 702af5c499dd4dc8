//! Store: column-oriented, always-sorted in-memory log store.
//!
//! The store is the single source of truth; consumers and the filter engine
//! read from it, never from the feeds directly.
//!
//! # Layout
//!
//! [`LogColumns`] keeps one `Vec` per [`LogRecord`] field. Rows are ordered by
//! `(timestamp, id)` at all times; `id` breaks ties between equal timestamps,
//! so the order is total and stable.
//!
//! # Concurrency
//!
//! Only the batcher writes. [`LogStore`] keeps the columns behind an
//! `RwLock<Arc<_>>`: readers take a cheap [`LogStore::snapshot`] and keep
//! reading it while the next flush merges under the write lock. If a snapshot
//! is still alive when a flush starts, the flush works on a copy
//! (`Arc::make_mut`), so published snapshots never change.

use crate::types::{LogRecord, Timestamp};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default size above which the oldest rows are trimmed.
pub const TRIM_THRESHOLD: usize = 200_000;
/// Fraction of `trim_threshold` kept after a trim.
pub const TRIM_RATIO: f64 = 0.8;

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Structure-of-arrays storage for log rows.
#[derive(Debug, Clone, Default)]
pub struct LogColumns {
    ids: Vec<u64>,
    timestamps: Vec<Timestamp>,
    levels: Vec<String>,
    loggers: Vec<String>,
    threads: Vec<String>,
    services: Vec<String>,
    messages: Vec<String>,
    sources: Vec<String>,
    mdcs: Vec<BTreeMap<String, String>>,
    marks: Vec<Option<String>>,
    truncated: Vec<bool>,
    full_messages: Vec<Option<String>>,
}

impl LogColumns {
    fn with_capacity(n: usize) -> Self {
        Self {
            ids: Vec::with_capacity(n),
            timestamps: Vec::with_capacity(n),
            levels: Vec::with_capacity(n),
            loggers: Vec::with_capacity(n),
            threads: Vec::with_capacity(n),
            services: Vec::with_capacity(n),
            messages: Vec::with_capacity(n),
            sources: Vec::with_capacity(n),
            mdcs: Vec::with_capacity(n),
            marks: Vec::with_capacity(n),
            truncated: Vec::with_capacity(n),
            full_messages: Vec::with_capacity(n),
        }
    }

    /// Build columns from rows that are already in `(timestamp, id)` order.
    pub fn from_sorted(records: Vec<LogRecord>) -> Self {
        let mut columns = Self::with_capacity(records.len());
        for record in records {
            columns.push(record);
        }
        debug_assert!(columns.is_sorted());
        columns
    }

    fn push(&mut self, r: LogRecord) {
        self.ids.push(r.id);
        self.timestamps.push(r.timestamp);
        self.levels.push(r.level);
        self.loggers.push(r.logger);
        self.threads.push(r.thread);
        self.services.push(r.service);
        self.messages.push(r.message);
        self.sources.push(r.source);
        self.mdcs.push(r.mdc);
        self.marks.push(r.mark);
        self.truncated.push(r.truncated);
        self.full_messages.push(r.full_message);
    }

    fn drain_head(&mut self, n: usize) {
        let n = n.min(self.len());
        self.ids.drain(..n);
        self.timestamps.drain(..n);
        self.levels.drain(..n);
        self.loggers.drain(..n);
        self.threads.drain(..n);
        self.services.drain(..n);
        self.messages.drain(..n);
        self.sources.drain(..n);
        self.mdcs.drain(..n);
        self.marks.drain(..n);
        self.truncated.drain(..n);
        self.full_messages.drain(..n);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Copy of the row at `index`.
    pub fn get(&self, index: usize) -> Option<LogRecord> {
        if index >= self.len() {
            return None;
        }
        Some(LogRecord {
            id: self.ids[index],
            timestamp: self.timestamps[index],
            level: self.levels[index].clone(),
            logger: self.loggers[index].clone(),
            thread: self.threads[index].clone(),
            service: self.services[index].clone(),
            message: self.messages[index].clone(),
            source: self.sources[index].clone(),
            mdc: self.mdcs[index].clone(),
            mark: self.marks[index].clone(),
            truncated: self.truncated[index],
            full_message: self.full_messages[index].clone(),
        })
    }

    pub fn sort_key(&self, index: usize) -> (Timestamp, u64) {
        (self.timestamps[index], self.ids[index])
    }

    fn last_key(&self) -> Option<(Timestamp, u64)> {
        self.len().checked_sub(1).map(|i| self.sort_key(i))
    }

    /// Row index of the record with `id`, if it is still stored.
    pub fn position_of(&self, id: u64) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    /// Check the `(timestamp, id)` ordering across every adjacent pair.
    pub fn is_sorted(&self) -> bool {
        (1..self.len()).all(|i| self.sort_key(i - 1) < self.sort_key(i))
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn loggers(&self) -> &[String] {
        &self.loggers
    }

    pub fn threads(&self) -> &[String] {
        &self.threads
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn mdcs(&self) -> &[BTreeMap<String, String>] {
        &self.mdcs
    }

    pub fn marks(&self) -> &[Option<String>] {
        &self.marks
    }

    pub fn full_messages(&self) -> &[Option<String>] {
        &self.full_messages
    }

    /// Full message text of a row, ignoring truncation.
    pub fn full_text(&self, index: usize) -> &str {
        self.full_messages[index]
            .as_deref()
            .unwrap_or(&self.messages[index])
    }
}

/// Owning row iterator over [`LogColumns`]; moves strings, never copies them.
pub struct IntoRecords {
    ids: std::vec::IntoIter<u64>,
    timestamps: std::vec::IntoIter<Timestamp>,
    levels: std::vec::IntoIter<String>,
    loggers: std::vec::IntoIter<String>,
    threads: std::vec::IntoIter<String>,
    services: std::vec::IntoIter<String>,
    messages: std::vec::IntoIter<String>,
    sources: std::vec::IntoIter<String>,
    mdcs: std::vec::IntoIter<BTreeMap<String, String>>,
    marks: std::vec::IntoIter<Option<String>>,
    truncated: std::vec::IntoIter<bool>,
    full_messages: std::vec::IntoIter<Option<String>>,
}

impl Iterator for IntoRecords {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        Some(LogRecord {
            id: self.ids.next()?,
            timestamp: self.timestamps.next()?,
            level: self.levels.next()?,
            logger: self.loggers.next()?,
            thread: self.threads.next()?,
            service: self.services.next()?,
            message: self.messages.next()?,
            source: self.sources.next()?,
            mdc: self.mdcs.next()?,
            mark: self.marks.next()?,
            truncated: self.truncated.next()?,
            full_message: self.full_messages.next()?,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl IntoIterator for LogColumns {
    type Item = LogRecord;
    type IntoIter = IntoRecords;

    fn into_iter(self) -> IntoRecords {
        IntoRecords {
            ids: self.ids.into_iter(),
            timestamps: self.timestamps.into_iter(),
            levels: self.levels.into_iter(),
            loggers: self.loggers.into_iter(),
            threads: self.threads.into_iter(),
            services: self.services.into_iter(),
            messages: self.messages.into_iter(),
            sources: self.sources.into_iter(),
            mdcs: self.mdcs.into_iter(),
            marks: self.marks.into_iter(),
            truncated: self.truncated.into_iter(),
            full_messages: self.full_messages.into_iter(),
        }
    }
}

/// Two-pointer merge of sorted `existing` rows with a sorted `batch`.
/// O(n + m); never re-sorts the existing rows.
fn merge(existing: LogColumns, batch: Vec<LogRecord>) -> LogColumns {
    let mut out = LogColumns::with_capacity(existing.len() + batch.len());
    let mut left = existing.into_iter().peekable();
    let mut right = batch.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.sort_key() <= r.sort_key(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        if let Some(record) = next {
            out.push(record);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// LogStore
// ---------------------------------------------------------------------------

/// Trim policy for [`LogStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    pub trim_threshold: usize,
    pub trim_ratio: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            trim_threshold: TRIM_THRESHOLD,
            trim_ratio: TRIM_RATIO,
        }
    }
}

impl StoreConfig {
    /// Row count kept after a trim.
    pub fn trim_target(&self) -> usize {
        ((self.trim_threshold as f64) * self.trim_ratio.clamp(0.0, 1.0)) as usize
    }
}

/// Result of a merge-insert.
#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    /// The inserted rows with their assigned ids, in `(timestamp, id)` order.
    pub accepted: Vec<LogRecord>,
    /// Rows removed from the head by the trim that followed the insert.
    pub trimmed: usize,
    /// Store size after insert and trim.
    pub len: usize,
}

#[derive(Debug)]
pub struct LogStore {
    columns: RwLock<Arc<LogColumns>>,
    next_id: AtomicU64,
    config: StoreConfig,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl LogStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            columns: RwLock::new(Arc::new(LogColumns::default())),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<LogColumns>> {
        self.columns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<LogColumns>> {
        self.columns.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Assign ids, sort the batch, merge it into the store, then trim.
    ///
    /// Ids come from a single counter in batch arrival order, so they are
    /// gap-free and never reused, even across [`LogStore::reset`].
    pub fn insert_sorted(&self, mut batch: Vec<LogRecord>) -> InsertOutcome {
        let mut guard = self.write();
        if batch.is_empty() {
            return InsertOutcome {
                len: guard.len(),
                ..InsertOutcome::default()
            };
        }

        let first = self.next_id.fetch_add(batch.len() as u64, Ordering::SeqCst);
        for (offset, record) in batch.iter_mut().enumerate() {
            record.id = first + offset as u64;
            record.mark = None;
        }
        batch.sort_unstable_by_key(LogRecord::sort_key);
        let accepted = batch.clone();

        let columns = Arc::make_mut(&mut guard);
        let appends = match (columns.last_key(), batch.first()) {
            (Some(last), Some(head)) => last < head.sort_key(),
            _ => true,
        };
        if appends {
            for record in batch {
                columns.push(record);
            }
        } else {
            let existing = std::mem::take(columns);
            *columns = merge(existing, batch);
        }
        debug_assert!(columns.is_sorted());

        let trimmed = trim_columns(columns, &self.config);
        InsertOutcome {
            accepted,
            trimmed,
            len: columns.len(),
        }
    }

    /// Drop the oldest rows once the store exceeds its threshold.
    /// Returns the number of rows removed.
    pub fn trim(&self) -> usize {
        let mut guard = self.write();
        if guard.len() <= self.config.trim_threshold {
            return 0;
        }
        trim_columns(Arc::make_mut(&mut guard), &self.config)
    }

    /// Copy of the row at `index`.
    pub fn get(&self, index: usize) -> Option<LogRecord> {
        self.read().get(index)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Immutable view of the current rows.
    pub fn snapshot(&self) -> Arc<LogColumns> {
        Arc::clone(&self.read())
    }

    /// Set or clear the user mark of record `id`. Returns `false` if the
    /// record is no longer stored.
    pub fn set_mark(&self, id: u64, mark: Option<String>) -> bool {
        let mut guard = self.write();
        let Some(index) = guard.position_of(id) else {
            return false;
        };
        Arc::make_mut(&mut guard).marks[index] = mark;
        true
    }

    /// Clear every row. Ids keep counting up.
    pub fn reset(&self) {
        *self.write() = Arc::new(LogColumns::default());
    }

    /// Id the next accepted record will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

fn trim_columns(columns: &mut LogColumns, config: &StoreConfig) -> usize {
    if columns.len() <= config.trim_threshold {
        return 0;
    }
    let excess = columns.len() - config.trim_target();
    columns.drain_head(excess);
    tracing::debug!(
        trimmed = excess,
        remaining = columns.len(),
        threshold = config.trim_threshold,
        "store trimmed oldest rows"
    );
    excess
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
