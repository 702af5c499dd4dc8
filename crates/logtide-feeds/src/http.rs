//! Periodic HTTP poller.
//!
//! Each poller owns one URL, one [`CircuitBreaker`] and (through the shared
//! [`IngestSink`]) one dedup set keyed by its URL. A fetch is bounded by the
//! request timeout and the response-size cap; exceeding either counts as a
//! failure. While the circuit is open, ticks are skipped without touching the
//! network.

use crate::circuit::{CircuitBreaker, CircuitConfig, CircuitStatus};
use crate::error::{FetchError, IngestError};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper::header::{ACCEPT, CONTENT_LENGTH};
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use logtide_core::config::{HttpConfig, PollerConfig};
use logtide_core::{IngestSink, Normalizer};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Floor applied to every poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub url: String,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub max_response_bytes: usize,
    pub circuit: CircuitConfig,
}

impl PollerSettings {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self::from_config(
            &PollerConfig { url: url.into(), interval_secs: 0 },
            &HttpConfig::default(),
        )
        .with_interval(interval)
    }

    pub fn from_config(poller: &PollerConfig, http: &HttpConfig) -> Self {
        Self {
            url: poller.url.clone(),
            interval: Duration::from_secs(poller.interval_secs),
            request_timeout: Duration::from_secs(http.request_timeout_secs),
            max_response_bytes: http.max_response_bytes,
            circuit: CircuitConfig::new(
                http.failure_threshold,
                Duration::from_secs(http.open_cooldown_secs),
                Duration::from_secs(http.max_cooldown_secs),
            ),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Live counters and circuit state of one poller.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    pub url: String,
    pub circuit: CircuitStatus,
    pub fetches: u64,
    pub failures: u64,
    pub skipped: u64,
    pub records_admitted: u64,
    pub dedup_seen: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The fetch succeeded and its body was parsed.
    Fetched { parsed: usize, admitted: usize },
    /// The fetch succeeded but the body could not be decoded.
    Malformed,
    /// The circuit is open; no request was sent.
    Skipped,
    /// The fetch failed and was counted against the circuit.
    Failed,
}

pub struct HttpPoller {
    settings: PollerSettings,
    uri: Uri,
    client: Client<HttpConnector, Empty<Bytes>>,
    sink: IngestSink,
    normalizer: Normalizer,
    breaker: CircuitBreaker,
    status: watch::Sender<PollerStatus>,
}

impl HttpPoller {
    pub fn new(
        settings: PollerSettings,
        sink: IngestSink,
        normalizer: Normalizer,
    ) -> Result<Self, IngestError> {
        let uri = settings.url.parse::<Uri>().map_err(|e| IngestError::InvalidUrl {
            url: settings.url.clone(),
            reason: e.to_string(),
        })?;
        if uri.scheme_str() != Some("http") {
            return Err(IngestError::InvalidUrl {
                url: settings.url.clone(),
                reason: "only http:// is supported".into(),
            });
        }

        let breaker = CircuitBreaker::new(settings.url.clone(), settings.circuit.clone());
        let (status, _) = watch::channel(PollerStatus {
            url: settings.url.clone(),
            circuit: breaker.status(),
            fetches: 0,
            failures: 0,
            skipped: 0,
            records_admitted: 0,
            dedup_seen: 0,
            last_error: None,
        });
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            settings,
            uri,
            client,
            sink,
            normalizer,
            breaker,
            status,
        })
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Effective interval after the internal floor.
    pub fn interval(&self) -> Duration {
        self.settings.interval.max(MIN_POLL_INTERVAL)
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerStatus> {
        self.status.subscribe()
    }

    /// Run one tick: consult the circuit, fetch, parse, submit.
    pub async fn poll_once(&mut self) -> PollOutcome {
        if !self.breaker.allow() {
            tracing::debug!(url = %self.settings.url, "circuit open; skipping fetch");
            self.publish(|s| s.skipped += 1);
            return PollOutcome::Skipped;
        }

        let body = match self.fetch().await {
            Ok(body) => body,
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(url = %self.settings.url, error = %e, "fetch failed");
                let message = e.to_string();
                self.publish(|s| {
                    s.fetches += 1;
                    s.failures += 1;
                    s.last_error = Some(message);
                });
                return PollOutcome::Failed;
            }
        };
        self.breaker.record_success();

        let outcome = match self.normalizer.parse_body(&body, &self.settings.url, Utc::now()) {
            Ok(records) => {
                let parsed = records.len();
                let submitted = self.sink.submit(&self.settings.url, records);
                tracing::debug!(
                    url = %self.settings.url,
                    parsed,
                    admitted = submitted.admitted,
                    duplicates = submitted.duplicates,
                    "poll complete"
                );
                PollOutcome::Fetched { parsed, admitted: submitted.admitted }
            }
            Err(e) => {
                tracing::warn!(url = %self.settings.url, error = %e, "skipping malformed response body");
                PollOutcome::Malformed
            }
        };
        let admitted = match outcome {
            PollOutcome::Fetched { admitted, .. } => admitted as u64,
            _ => 0,
        };
        self.publish(|s| {
            s.fetches += 1;
            s.records_admitted += admitted;
            s.last_error = None;
        });
        outcome
    }

    async fn fetch(&self) -> Result<Bytes, FetchError> {
        let limit = self.settings.max_response_bytes;
        let request = Request::get(self.uri.clone())
            .header(ACCEPT, "application/json, application/x-ndjson")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }
            let declared = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            if declared.is_some_and(|len| len > limit) {
                return Err(FetchError::TooLarge { limit });
            }
            let collected = Limited::new(response.into_body(), limit)
                .collect()
                .await
                .map_err(|e| {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        FetchError::TooLarge { limit }
                    } else {
                        FetchError::Transport(e.to_string())
                    }
                })?;
            Ok(collected.to_bytes())
        };

        tokio::time::timeout(self.settings.request_timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout(self.settings.request_timeout))?
    }

    fn publish(&self, update: impl FnOnce(&mut PollerStatus)) {
        let circuit = self.breaker.status();
        let dedup_seen = self.sink.seen_len(&self.settings.url);
        self.status.send_modify(|s| {
            update(s);
            s.circuit = circuit;
            s.dedup_seen = dedup_seen;
        });
    }

    /// Poll on the interval until `cancel` fires. The first tick is immediate.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(url = %self.settings.url, interval_ms = self.interval().as_millis() as u64, "poller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }
        tracing::info!(url = %self.settings.url, "poller stopped");
    }
}
