//! Normalizer: parses raw frames into validated [`LogRecord`] values.
//!
//! Parsing is attempted in order: JSON object → timestamped text layout →
//! bare-level text → fallback (whole line as message). Every field is
//! defaulted here so no layer downstream sees a half-built record: a missing
//! or unparseable timestamp becomes the ingestion time, a missing level
//! becomes [`DEFAULT_LEVEL`].

use crate::error::ParseError;
use crate::types::{LogRecord, Timestamp, DEFAULT_LEVEL};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Default byte budget for `LogRecord::message`.
pub const DEFAULT_MESSAGE_BUDGET: usize = 10_000;

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "@timestamp", "ts", "time"];
const LEVEL_KEYS: &[&str] = &["level", "severity", "lvl", "log.level"];
const LOGGER_KEYS: &[&str] = &["logger", "logger_name", "loggerName"];
const THREAD_KEYS: &[&str] = &["thread", "thread_name", "threadName"];
const SERVICE_KEYS: &[&str] = &["service", "service.name", "app"];
const MESSAGE_KEYS: &[&str] = &["message", "msg"];
const MDC_KEYS: &[&str] = &["mdc", "context"];

static TS_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?(?:Z|[+-]\d{2}:?\d{2})?)\s+(?P<rest>.*)$",
    )
    .expect("timestamp prefix regex is valid")
});

static LEVEL_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<level>[A-Za-z]+)\s+(?:\[(?P<thread>[^\]]*)\]\s+)?(?:(?P<logger>\S+)\s+-\s+)?(?P<msg>.*)$",
    )
    .expect("level-first regex is valid")
});

static THREAD_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(?P<thread>[^\]]*)\]\s+(?P<level>[A-Za-z]+)\s+(?:(?P<logger>\S+)\s+-\s+)?(?P<msg>.*)$",
    )
    .expect("thread-first regex is valid")
});

static BARE_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<level>[A-Z]+):?\s+(?P<msg>.*)$").expect("bare-level regex is valid")
});

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Stateless parser bound to a message byte budget.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    message_budget: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_BUDGET)
    }
}

impl Normalizer {
    /// `message_budget == 0` disables truncation.
    pub fn new(message_budget: usize) -> Self {
        Self { message_budget }
    }

    /// Parse one frame (a single line without its terminator).
    ///
    /// Only JSON-looking lines can fail; any other text yields a record.
    pub fn parse_line(
        &self,
        line: &str,
        source: &str,
        now: Timestamp,
    ) -> Result<LogRecord, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut record = if line.starts_with('{') {
            match serde_json::from_str::<Value>(line)? {
                Value::Object(map) => from_json_object(map, line, source, now),
                other => return Err(ParseError::NotAnObject(json_kind(&other))),
            }
        } else {
            from_text(line, source, now)
        };

        apply_budget(&mut record, self.message_budget);
        Ok(record)
    }

    /// Parse an HTTP response body: a JSON array of objects, a single JSON
    /// object, or NDJSON / plain text with one record per line.
    ///
    /// A malformed JSON array fails the whole body. In NDJSON mode each bad
    /// line is skipped on its own.
    pub fn parse_body(
        &self,
        body: &[u8],
        source: &str,
        now: Timestamp,
    ) -> Result<Vec<LogRecord>, ParseError> {
        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if trimmed.starts_with('[') {
            let Value::Array(items) = serde_json::from_str::<Value>(trimmed)? else {
                return Err(ParseError::NotAnObject("non-array"));
            };
            let mut records = Vec::with_capacity(items.len());
            let mut skipped = 0usize;
            for item in items {
                match item {
                    Value::Object(map) => {
                        let raw = Value::Object(map.clone()).to_string();
                        let mut record = from_json_object(map, &raw, source, now);
                        apply_budget(&mut record, self.message_budget);
                        records.push(record);
                    }
                    _ => skipped += 1,
                }
            }
            if skipped > 0 {
                tracing::debug!(source, skipped, "skipped non-object array elements");
            }
            return Ok(records);
        }

        if trimmed.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                let mut record = from_json_object(map, trimmed, source, now);
                apply_budget(&mut record, self.message_budget);
                return Ok(vec![record]);
            }
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in trimmed.lines() {
            match self.parse_line(line, source, now) {
                Ok(record) => records.push(record),
                Err(ParseError::Empty) => {}
                Err(err) => {
                    skipped += 1;
                    tracing::debug!(source, error = %err, "skipping malformed line");
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(source, skipped, "skipped malformed lines in response body");
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// JSON records
// ---------------------------------------------------------------------------

fn from_json_object(
    mut map: Map<String, Value>,
    raw: &str,
    source: &str,
    now: Timestamp,
) -> LogRecord {
    let timestamp = take_first(&mut map, TIMESTAMP_KEYS)
        .and_then(|v| parse_timestamp_value(&v))
        .unwrap_or(now);
    let level = take_first(&mut map, LEVEL_KEYS)
        .map(|v| normalize_level(&scalar_to_string(&v)))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    let logger = take_string(&mut map, LOGGER_KEYS);
    let thread = take_string(&mut map, THREAD_KEYS);
    let service = take_string(&mut map, SERVICE_KEYS);
    let message = take_first(&mut map, MESSAGE_KEYS)
        .map(|v| scalar_to_string(&v))
        .unwrap_or_else(|| raw.to_string());

    let mut mdc = BTreeMap::new();
    if let Some(Value::Object(context)) = take_first(&mut map, MDC_KEYS) {
        for (key, value) in context {
            if !value.is_null() {
                mdc.insert(key, scalar_to_string(&value));
            }
        }
    }
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) | Value::Null => {}
            scalar => {
                mdc.entry(key).or_insert_with(|| scalar_to_string(&scalar));
            }
        }
    }

    LogRecord {
        level,
        logger,
        thread,
        service,
        mdc,
        ..LogRecord::new(timestamp, message, source)
    }
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| map.remove(*key))
        .filter(|v| !v.is_null())
}

fn take_string(map: &mut Map<String, Value>, keys: &[&str]) -> String {
    take_first(map, keys)
        .map(|v| scalar_to_string(&v))
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Text records
// ---------------------------------------------------------------------------

fn from_text(line: &str, source: &str, now: Timestamp) -> LogRecord {
    if let Some(caps) = TS_PREFIX.captures(line) {
        let timestamp = parse_timestamp_str(&caps["ts"]).unwrap_or(now);
        let rest = caps.name("rest").map_or("", |m| m.as_str());
        let mut record = from_layout(rest, source, timestamp)
            .unwrap_or_else(|| LogRecord::new(timestamp, rest, source));
        if record.message.is_empty() {
            record.message = rest.to_string();
        }
        return record;
    }

    if let Some(caps) = BARE_LEVEL.captures(line) {
        if let Some(level) = canonical_level(&caps["level"]) {
            return LogRecord {
                level: level.to_string(),
                ..LogRecord::new(now, &caps["msg"], source)
            };
        }
    }

    LogRecord::new(now, line, source)
}

/// Match the part of a line after its timestamp against the known layouts.
fn from_layout(rest: &str, source: &str, timestamp: Timestamp) -> Option<LogRecord> {
    [&*THREAD_FIRST, &*LEVEL_FIRST].iter().find_map(|re| {
        let caps = re.captures(rest)?;
        let level = canonical_level(&caps["level"])?;
        let capture = |name: &str| caps.name(name).map_or("", |m| m.as_str()).to_string();
        Some(LogRecord {
            level: level.to_string(),
            thread: capture("thread"),
            logger: capture("logger"),
            ..LogRecord::new(timestamp, capture("msg"), source)
        })
    })
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Map a level spelling onto its canonical upper-case name, if recognised.
pub fn canonical_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "TRC" => Some("TRACE"),
        "DEBUG" | "DBG" => Some("DEBUG"),
        "INFO" | "INFORMATION" | "NOTICE" => Some("INFO"),
        "WARN" | "WARNING" => Some("WARN"),
        "ERROR" | "ERR" => Some("ERROR"),
        "FATAL" | "CRITICAL" | "CRIT" | "PANIC" => Some("FATAL"),
        _ => None,
    }
}

/// Canonicalise a level, keeping unknown spellings upper-cased.
pub fn normalize_level(raw: &str) -> String {
    match canonical_level(raw) {
        Some(level) => level.to_string(),
        None if raw.trim().is_empty() => DEFAULT_LEVEL.to_string(),
        None => raw.trim().to_ascii_uppercase(),
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

fn parse_timestamp_value(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.,]fff[offset]`, or a numeric epoch.
pub fn parse_timestamp_str(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let dotted = raw.replacen(',', ".", 1);
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(&dotted, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, fmt) {
            return Some(naive.and_utc());
        }
    }

    raw.parse::<i64>().ok().and_then(from_epoch)
}

/// Numeric epochs below 10^11 are seconds, anything larger is milliseconds.
fn from_epoch(value: i64) -> Option<Timestamp> {
    let millis = if value.abs() < 100_000_000_000 {
        value.checked_mul(1_000)?
    } else {
        value
    };
    DateTime::from_timestamp_millis(millis)
}

// ---------------------------------------------------------------------------
// Truncation
// ---------------------------------------------------------------------------

fn apply_budget(record: &mut LogRecord, budget: usize) {
    if budget == 0 || record.message.len() <= budget {
        return;
    }
    let mut cut = budget;
    while !record.message.is_char_boundary(cut) {
        cut -= 1;
    }
    let full = std::mem::take(&mut record.message);
    record.message = full[..cut].to_string();
    record.full_message = Some(full);
    record.truncated = true;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
