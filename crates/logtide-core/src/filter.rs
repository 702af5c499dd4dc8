//! Filter evaluation over a [`LogColumns`] snapshot.
//!
//! Checks run per row in a fixed order and stop at the first failing one:
//! mark-only, level, logger, thread, message, time range, MDC. The dimension
//! that rejected a row is counted in [`FilterStats`].
//!
//! This module is the only place matching rules live; the offloaded path in
//! [`crate::filter_worker`] calls [`filter_indices`] unchanged.

use crate::query::MessageQuery;
use crate::store::LogColumns;
use crate::types::{FeedKind, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeRange {
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && ts <= self.to
    }
}

/// What to keep. Empty strings and `None` mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterOptions {
    /// Exact level, compared case-insensitively.
    pub level: Option<String>,
    /// Case-insensitive substring of the logger name.
    pub logger: String,
    /// Case-insensitive substring of the thread name.
    pub thread: String,
    /// Message predicate; see [`MessageQuery`].
    pub message: String,
    pub marked_only: bool,
    pub time_range: Option<TimeRange>,
    /// Required MDC entries. Keys match case-insensitively; an empty value
    /// only requires the key to be present.
    pub mdc: BTreeMap<String, String>,
}

impl FilterOptions {
    /// `true` when no constraint is set, so every row matches.
    pub fn is_empty(&self) -> bool {
        self.level.as_deref().map_or(true, str::is_empty)
            && self.logger.is_empty()
            && self.thread.is_empty()
            && self.message.trim().is_empty()
            && !self.marked_only
            && self.time_range.is_none()
            && self.mdc.is_empty()
    }
}

/// Per-dimension rejection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total: usize,
    pub matched: usize,
    pub rejected_mark: usize,
    pub rejected_level: usize,
    pub rejected_logger: usize,
    pub rejected_thread: usize,
    pub rejected_message: usize,
    pub rejected_time: usize,
    pub rejected_mdc: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    /// Matching row indices, ascending.
    pub indices: Vec<usize>,
    pub stats: FilterStats,
}

#[derive(Debug, Clone, Copy)]
enum Rejection {
    Mark,
    Level,
    Logger,
    Thread,
    Message,
    Time,
    Mdc,
}

/// Options with the lower-casing and query parsing done once per call.
struct Compiled<'a> {
    level: Option<&'a str>,
    logger: String,
    thread: String,
    message: Option<MessageQuery>,
    marked_only: bool,
    time_range: Option<TimeRange>,
    mdc: Vec<(String, &'a str)>,
}

impl<'a> Compiled<'a> {
    fn new(options: &'a FilterOptions) -> Self {
        Self {
            level: options.level.as_deref().filter(|l| !l.is_empty()),
            logger: options.logger.to_lowercase(),
            thread: options.thread.to_lowercase(),
            message: MessageQuery::parse(&options.message),
            marked_only: options.marked_only,
            time_range: options.time_range,
            mdc: options
                .mdc
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.as_str()))
                .collect(),
        }
    }

    fn check(&self, columns: &LogColumns, i: usize) -> Result<(), Rejection> {
        if self.marked_only && columns.marks()[i].is_none() {
            return Err(Rejection::Mark);
        }
        if let Some(level) = self.level {
            if !columns.levels()[i].eq_ignore_ascii_case(level) {
                return Err(Rejection::Level);
            }
        }
        if !self.logger.is_empty() && !contains_ci(&columns.loggers()[i], &self.logger) {
            return Err(Rejection::Logger);
        }
        if !self.thread.is_empty() && !contains_ci(&columns.threads()[i], &self.thread) {
            return Err(Rejection::Thread);
        }
        if let Some(query) = &self.message {
            if !query.matches(columns.full_text(i)) {
                return Err(Rejection::Message);
            }
        }
        if let Some(range) = &self.time_range {
            if FeedKind::of(&columns.sources()[i]).is_time_range_eligible()
                && !range.contains(columns.timestamps()[i])
            {
                return Err(Rejection::Time);
            }
        }
        if !self.mdc.is_empty() && !mdc_matches(&columns.mdcs()[i], &self.mdc) {
            return Err(Rejection::Mdc);
        }
        Ok(())
    }
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

fn mdc_matches(mdc: &BTreeMap<String, String>, required: &[(String, &str)]) -> bool {
    required.iter().all(|(key, want)| {
        mdc.iter()
            .find(|(k, _)| k.to_lowercase() == *key)
            .is_some_and(|(_, v)| want.is_empty() || v == want)
    })
}

/// Evaluate `options` against every row of `columns`.
pub fn filter_indices(columns: &LogColumns, options: &FilterOptions) -> FilterResult {
    let total = columns.len();
    let mut stats = FilterStats { total, ..FilterStats::default() };
    if options.is_empty() {
        stats.matched = total;
        return FilterResult { indices: (0..total).collect(), stats };
    }

    let compiled = Compiled::new(options);
    let mut indices = Vec::new();
    for i in 0..total {
        match compiled.check(columns, i) {
            Ok(()) => indices.push(i),
            Err(Rejection::Mark) => stats.rejected_mark += 1,
            Err(Rejection::Level) => stats.rejected_level += 1,
            Err(Rejection::Logger) => stats.rejected_logger += 1,
            Err(Rejection::Thread) => stats.rejected_thread += 1,
            Err(Rejection::Message) => stats.rejected_message += 1,
            Err(Rejection::Time) => stats.rejected_time += 1,
            Err(Rejection::Mdc) => stats.rejected_mdc += 1,
        }
    }
    stats.matched = indices.len();
    FilterResult { indices, stats }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
