//! logtide-feeds: network feed adapters for logtide.
//!
//! Each feed reads raw bytes from its source, parses them into
//! [`logtide_core::LogRecord`]s and submits them to a shared
//! [`logtide_core::IngestSink`]. Feeds never touch the store.

pub mod circuit;
pub mod codec;
pub mod error;
pub mod http;
pub mod tcp;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitStateKind, CircuitStatus};
pub use error::{FetchError, IngestError};
pub use http::{HttpPoller, PollOutcome, PollerSettings, PollerStatus};
pub use tcp::{TcpServer, TcpServerHandle};
