//! Static log corpora used across harnesses.
//!
//! Each corpus is a `&'static [&'static str]` of representative lines as a
//! TCP client or HTTP endpoint would send them.

/// JSON lines in the shapes the normalizer recognises.
pub const CORPUS_JSON: &[&str] = &[
    r#"{"timestamp":"2024-01-15T10:00:00Z","level":"INFO","logger":"com.acme.Server","thread":"main","message":"Server started","port":8080}"#,
    r#"{"@timestamp":"2024-01-15T10:00:01Z","severity":"ERROR","logger_name":"com.acme.Db","msg":"Connection refused","host":"db.internal"}"#,
    r#"{"ts":1705312802000,"lvl":"warning","message":"Slow query","duration_ms":4200}"#,
    r#"{"time":"2024-01-15T10:00:03.250Z","log.level":"debug","message":"Cache miss","mdc":{"requestId":"req-42"}}"#,
    r#"{"timestamp":"2024-01-15T10:00:04Z","level":"critical","service":"payments","msg":"Out of memory"}"#,
];

/// Plain-text lines in the supported layouts.
pub const CORPUS_TEXT: &[&str] = &[
    "2024-01-15 10:00:00.000 INFO [main] com.acme.App - Starting application version 2.4.1",
    "2024-01-15T10:00:01Z [worker-3] ERROR com.acme.Queue - task queue overflow",
    "2024-01-15 10:00:02,500 WARN com.acme.Disk - Disk usage at 92%",
    "ERROR: NullPointerException at com.example.App.handle(App.java:42)",
    "GET /api/v1/users 200 47ms",
];

/// Lines that must be skipped without affecting their neighbours.
pub const CORPUS_MALFORMED: &[&str] = &[
    r#"{"timestamp":"2024-01-15T10:00:00Z","level":"INFO""#,
    "{not json at all",
    r#"{"level":"INFO","message":"unterminated}"#,
];

/// A JSON line with the given epoch-millis timestamp and message.
///
/// The timestamp is written as RFC 3339 so small values are not read as
/// epoch seconds.
pub fn json_line(ts_ms: i64, message: &str) -> String {
    let ts = chrono::DateTime::from_timestamp_millis(ts_ms)
        .expect("timestamp in range")
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    serde_json::json!({ "timestamp": ts, "level": "INFO", "message": message }).to_string()
}

/// A JSON array body of `count` distinct records starting at `first`.
pub fn json_array_body(first: usize, count: usize) -> String {
    let items: Vec<serde_json::Value> = (first..first + count)
        .map(|i| {
            serde_json::json!({
                "timestamp": 1_700_000_000_000i64 + i as i64,
                "level": "INFO",
                "message": format!("polled record {i}"),
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

/// NDJSON body with one line per `(ts_ms, message)`.
pub fn ndjson_body(lines: &[(i64, &str)]) -> String {
    lines
        .iter()
        .map(|(ts, msg)| json_line(*ts, msg))
        .collect::<Vec<_>>()
        .join("\n")
}
