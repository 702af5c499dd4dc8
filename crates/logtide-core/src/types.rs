//! Core types for logtide-core.
//!
//! This module defines the fundamental data structures shared across all
//! pipeline layers: the validated [`LogRecord`] and the [`FeedKind`]
//! discriminant derived from a record's `source` string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record timestamp. Millisecond precision or better, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Level assigned when the input carries none.
pub const DEFAULT_LEVEL: &str = "INFO";

/// A validated log record.
///
/// Records are built at the parse boundary (see [`crate::normalizer`]) with
/// every field defaulted, so downstream layers never deal with missing data.
/// `id` is `0` until the record is accepted into the [`crate::store::LogStore`],
/// which assigns ids from a gap-free counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Store-assigned id; `0` means "not yet accepted".
    pub id: u64,
    /// Event time. Ingestion time when the input had none or it was unparseable.
    pub timestamp: Timestamp,
    /// Upper-cased level name (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`, `FATAL`, …).
    pub level: String,
    pub logger: String,
    pub thread: String,
    pub service: String,
    /// Message, bounded by the configured byte budget.
    pub message: String,
    /// Origin of the record: `tcp://…`, `http://…`, `elastic://…` or a file path.
    pub source: String,
    /// Mapped diagnostic context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mdc: BTreeMap<String, String>,
    /// User-applied colour tag. Never set by ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<String>,
    /// `true` when `message` holds a prefix of the original text.
    #[serde(default)]
    pub truncated: bool,
    /// The untruncated message, present only when `truncated` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,
}

impl LogRecord {
    /// A record with every optional field defaulted.
    pub fn new(
        timestamp: Timestamp,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp,
            level: DEFAULT_LEVEL.to_string(),
            logger: String::new(),
            thread: String::new(),
            service: String::new(),
            message: message.into(),
            source: source.into(),
            mdc: BTreeMap::new(),
            mark: None,
            truncated: false,
            full_message: None,
        }
    }

    /// The complete message text, ignoring any truncation.
    pub fn full_text(&self) -> &str {
        self.full_message.as_deref().unwrap_or(&self.message)
    }

    /// The `(timestamp, id)` key the store is ordered by.
    pub fn sort_key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.id)
    }

    pub fn feed_kind(&self) -> FeedKind {
        FeedKind::of(&self.source)
    }
}

/// Which kind of feed produced a record, derived from its `source` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Tcp,
    Http,
    Elastic,
    File,
}

impl FeedKind {
    pub fn of(source: &str) -> Self {
        if source.starts_with("tcp://") {
            FeedKind::Tcp
        } else if source.starts_with("http://") || source.starts_with("https://") {
            FeedKind::Http
        } else if source.starts_with("elastic://") {
            FeedKind::Elastic
        } else {
            FeedKind::File
        }
    }

    /// Pulled feeds hold historical windows, so time-range filters apply to
    /// them. Live tails always pass the time-range check.
    pub fn is_time_range_eligible(self) -> bool {
        matches!(self, FeedKind::Http | FeedKind::Elastic)
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::Tcp => write!(f, "tcp"),
            FeedKind::Http => write!(f, "http"),
            FeedKind::Elastic => write!(f, "elastic"),
            FeedKind::File => write!(f, "file"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
