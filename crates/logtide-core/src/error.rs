//! Error types shared by the pipeline layers.
//!
//! Only [`ParseError`] and [`FilterError`] live here; the network feeds define
//! their own fetch and bind errors in `logtide-feeds`.

/// A single unit of input (line or response body) could not be decoded.
///
/// Always local: the offending unit is skipped and ingestion continues.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("empty input")]
    Empty,
}

/// The offloaded filter path could not deliver a result.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter worker has shut down")]
    WorkerGone,
}
