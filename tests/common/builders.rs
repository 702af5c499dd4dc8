//! Test builders: ergonomic constructors for `LogRecord`s, stores and
//! configs.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use chrono::{DateTime, Utc};
use logtide_core::config::Config;
use logtide_core::{LogColumns, LogRecord, LogStore};
use std::collections::BTreeMap;

/// Millisecond epoch → UTC timestamp.
pub fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("valid millisecond timestamp")
}

// ---------------------------------------------------------------------------
// LogRecordBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`LogRecord`] test fixtures.
///
/// # Example
///
/// ```rust,ignore
/// let record = LogRecordBuilder::new("timeout connecting to db")
///     .at(1_700_000_000_000)
///     .level("ERROR")
///     .logger("com.acme.Db")
///     .source("http://127.0.0.1:9000/logs")
///     .mdc("requestId", "req-abc123")
///     .build();
/// ```
pub struct LogRecordBuilder {
    record: LogRecord,
}

impl LogRecordBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            record: LogRecord::new(ts(0), message, "tcp://test:4560"),
        }
    }

    pub fn at(mut self, ms: i64) -> Self {
        self.record.timestamp = ts(ms);
        self
    }

    pub fn level(mut self, level: &str) -> Self {
        self.record.level = level.to_string();
        self
    }

    pub fn logger(mut self, logger: &str) -> Self {
        self.record.logger = logger.to_string();
        self
    }

    pub fn thread(mut self, thread: &str) -> Self {
        self.record.thread = thread.to_string();
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.record.source = source.to_string();
        self
    }

    pub fn mdc(mut self, key: &str, value: &str) -> Self {
        self.record.mdc.insert(key.to_string(), value.to_string());
        self
    }

    pub fn mark(mut self, mark: &str) -> Self {
        self.record.mark = Some(mark.to_string());
        self
    }

    pub fn build(self) -> LogRecord {
        self.record
    }
}

/// `n` distinct records `0..n` with timestamps `base_ms + i`.
pub fn sequential_records(n: usize, base_ms: i64, source: &str) -> Vec<LogRecord> {
    (0..n)
        .map(|i| {
            LogRecordBuilder::new(format!("record {i}"))
                .at(base_ms + i as i64)
                .source(source)
                .build()
        })
        .collect()
}

/// Columns for filter tests; ids are assigned `1..` in the given order, which
/// must already be sorted by timestamp.
pub fn columns_of(records: Vec<LogRecord>) -> LogColumns {
    let rows = records
        .into_iter()
        .enumerate()
        .map(|(i, mut r)| {
            r.id = i as u64 + 1;
            r
        })
        .collect();
    LogColumns::from_sorted(rows)
}

/// Store holding `records`, inserted as one batch.
pub fn store_with(records: Vec<LogRecord>) -> LogStore {
    let store = LogStore::default();
    store.insert_sorted(records);
    store
}

/// Timestamps of every stored row, in store order.
pub fn store_timestamps(store: &LogStore) -> Vec<i64> {
    store
        .snapshot()
        .timestamps()
        .iter()
        .map(|t| t.timestamp_millis())
        .collect()
}

/// Defaults with the TCP listener on an ephemeral loopback port and no
/// pollers.
pub fn loopback_config() -> Config {
    let mut config = Config::defaults();
    config.tcp.bind = "127.0.0.1".to_string();
    config.tcp.port = 0;
    config
}

/// MDC map literal helper.
pub fn mdc(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
