//! HTTP poller integration harness.
//!
//! # What this covers
//!
//! - **Bounded dedup**: a 10,001-record response trims the poller's seen set
//!   to 5,000; a following response of 999 new records grows it to 5,999.
//!   Checked both on the sink and through the diagnostics snapshot.
//! - **Circuit breaker**: five HTTP 500s open the circuit; the next tick is
//!   skipped without a request. After the cooldown a successful probe closes
//!   it again.
//! - **Bounded fetches**: an oversized body and a slow response both count
//!   as failures.
//! - **Body formats**: JSON arrays and NDJSON are ingested; a malformed body
//!   is skipped without counting against the circuit.
//!
//! # What this does NOT cover
//!
//! - HTTPS endpoints (plain `http://` only)
//!
//! # Running
//!
//! ```sh
//! cargo test --test http_harness
//! ```

mod common;
use common::fake_http_api::FakeLogApi;
use common::*;
use logtide::Pipeline;
use logtide_core::config::PollerConfig;
use logtide_core::{Deduplicator, IngestBuffer, IngestSink, Normalizer};
use logtide_feeds::{
    CircuitConfig, CircuitStateKind, HttpPoller, PollOutcome, PollerSettings,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn sink(capacity: usize) -> IngestSink {
    IngestSink::new(Deduplicator::default(), Arc::new(IngestBuffer::new(capacity)))
}

fn poller(api: &FakeLogApi, sink: IngestSink) -> HttpPoller {
    let settings = PollerSettings::new(api.logs_url(), Duration::from_secs(1));
    HttpPoller::new(settings, sink, Normalizer::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Dedup bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_poll_trims_seen_set_to_half() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, json_array_body(0, 10_001)).await;
    api.respond(200, json_array_body(10_001, 999)).await;

    let sink = sink(20_000);
    let mut poller = poller(&api, sink.clone());

    let first = poller.poll_once().await;
    assert_eq!(first, PollOutcome::Fetched { parsed: 10_001, admitted: 10_001 });
    assert_eq!(sink.seen_len(&api.logs_url()), 5_000);

    let second = poller.poll_once().await;
    assert_eq!(second, PollOutcome::Fetched { parsed: 999, admitted: 999 });
    assert_eq!(sink.seen_len(&api.logs_url()), 5_999);
}

#[tokio::test]
async fn repeated_response_is_admitted_once() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, json_array_body(0, 50)).await;

    let sink = sink(1_000);
    let mut poller = poller(&api, sink.clone());
    assert_eq!(poller.poll_once().await, PollOutcome::Fetched { parsed: 50, admitted: 50 });
    assert_eq!(poller.poll_once().await, PollOutcome::Fetched { parsed: 50, admitted: 0 });
    assert_eq!(sink.buffer().len(), 50);
    assert_eq!(sink.dedup_stats().rejected, 50);
}

#[tokio::test]
async fn diagnostics_report_poller_seen_set_size() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, json_array_body(0, 10_001)).await;
    api.respond(200, json_array_body(10_001, 999)).await;

    let mut config = loopback_config();
    config.tcp.enabled = false;
    config.pollers.push(PollerConfig { url: api.logs_url(), interval_secs: 1 });
    let pipeline = Pipeline::start(&config, None).await.unwrap();
    let probe = pipeline.probe();

    eventually!(
        probe.snapshot().pollers[0].dedup_seen == 5_999,
        5_000,
        "seen set after both responses"
    );
    let diagnostics = probe.snapshot();
    assert!(diagnostics.tcp.is_none());
    assert_eq!(diagnostics.pollers[0].url, api.logs_url());
    assert_eq!(diagnostics.pollers[0].circuit.state, CircuitStateKind::Closed);

    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn five_server_errors_open_the_circuit() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(500, "boom").await;

    let mut poller = poller(&api, sink(100));
    let status = poller.subscribe();
    for _ in 0..5 {
        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
    }
    assert_eq!(status.borrow().circuit.state, CircuitStateKind::Open);
    assert_eq!(api.hits(), 5);

    assert_eq!(poller.poll_once().await, PollOutcome::Skipped);
    assert_eq!(api.hits(), 5, "an open circuit must not touch the network");

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.failures, 5);
    assert_eq!(snapshot.skipped, 1);
    assert!(snapshot.last_error.unwrap().contains("500"));
}

#[tokio::test]
async fn successful_probe_after_cooldown_closes_the_circuit() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(503, "unavailable").await;

    let mut settings = PollerSettings::new(api.logs_url(), Duration::from_secs(1));
    settings.circuit =
        CircuitConfig::new(2, Duration::from_millis(200), Duration::from_secs(5));
    let mut poller = HttpPoller::new(settings, sink(100), Normalizer::default()).unwrap();
    let status = poller.subscribe();

    poller.poll_once().await;
    poller.poll_once().await;
    assert_eq!(status.borrow().circuit.state, CircuitStateKind::Open);

    api.respond(200, json_array_body(0, 3)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(poller.poll_once().await, PollOutcome::Fetched { parsed: 3, admitted: 3 });
    let circuit = status.borrow().circuit.clone();
    assert_eq!(circuit.state, CircuitStateKind::Closed);
    assert_eq!(circuit.consecutive_failures, 0);
}

// ---------------------------------------------------------------------------
// Bounded fetches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_body_counts_as_failure() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, json_array_body(0, 100)).await;

    let mut settings = PollerSettings::new(api.logs_url(), Duration::from_secs(1));
    settings.max_response_bytes = 512;
    let sink = sink(100);
    let mut poller = HttpPoller::new(settings, sink.clone(), Normalizer::default()).unwrap();
    let status = poller.subscribe();

    assert_eq!(poller.poll_once().await, PollOutcome::Failed);
    assert_eq!(status.borrow().circuit.consecutive_failures, 1);
    assert!(sink.buffer().is_empty());
}

#[tokio::test]
async fn slow_response_times_out() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond_after(200, json_array_body(0, 1), Duration::from_secs(3)).await;

    let mut settings = PollerSettings::new(api.logs_url(), Duration::from_secs(1));
    settings.request_timeout = Duration::from_millis(200);
    let mut poller = HttpPoller::new(settings, sink(100), Normalizer::default()).unwrap();
    let status = poller.subscribe();

    let started = std::time::Instant::now();
    assert_eq!(poller.poll_once().await, PollOutcome::Failed);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(status.borrow().last_error.as_deref().unwrap_or_default().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Body formats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ndjson_body_is_ingested_line_by_line() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, ndjson_body(&[(1_000, "one"), (2_000, "two")])).await;

    let sink = sink(100);
    let mut poller = poller(&api, sink.clone());
    assert_eq!(poller.poll_once().await, PollOutcome::Fetched { parsed: 2, admitted: 2 });

    let queued = sink.buffer().drain(10);
    assert_eq!(queued[0].source, api.logs_url());
    assert_eq!(queued[1].message, "two");
}

#[tokio::test]
async fn malformed_body_does_not_count_against_the_circuit() {
    let api = FakeLogApi::start().await.unwrap();
    api.respond(200, "[{\"message\": ").await;

    let mut poller = poller(&api, sink(100));
    let status = poller.subscribe();
    for _ in 0..6 {
        assert_eq!(poller.poll_once().await, PollOutcome::Malformed);
    }
    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.circuit.state, CircuitStateKind::Closed);
    assert_eq!(snapshot.failures, 0);
    assert_eq!(api.hits(), 6);
}

#[tokio::test]
async fn empty_body_fetches_nothing() {
    let api = FakeLogApi::start().await.unwrap();
    let mut poller = poller(&api, sink(100));
    assert_eq!(poller.poll_once().await, PollOutcome::Fetched { parsed: 0, admitted: 0 });
}
