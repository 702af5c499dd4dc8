//! Feed error types.

use std::time::Duration;

/// Starting a feed failed. Returned to whoever asked for the start; feeds
/// that are already running are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid poller url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A single HTTP fetch failed. Counted by the poller's circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server answered {0}")]
    Status(hyper::StatusCode),
    #[error("response exceeded {limit} bytes")]
    TooLarge { limit: usize },
    #[error("transport error: {0}")]
    Transport(String),
}
