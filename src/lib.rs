//! logtide: concurrent log ingestion.
//!
//! Accepts records from a TCP listener and periodic HTTP pollers,
//! deduplicates them per source, merges them into an always-sorted column
//! store and serves filtered views. The layers live in two crates; this one
//! wires them into a session and adds diagnostics.
//!
//! # Architecture
//!
//! ```text
//! TcpServer ─┐
//!            ├──► IngestSink ──► IngestBuffer ──► Batcher ──► LogStore ──► FlushEvent
//! HttpPoller ┘    (dedup)        (drop oldest)    (adaptive)      │
//!                                                                 └──► FilterEngine
//! ```

pub mod diagnostics;
pub mod pipeline;

pub use diagnostics::{Diagnostics, DiagnosticsProbe};
pub use pipeline::Pipeline;
