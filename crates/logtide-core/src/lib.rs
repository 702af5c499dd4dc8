//! logtide-core: ingestion pipeline layers for logtide.
//!
//! This crate holds everything between a decoded frame and a filtered view:
//! the validated record type, the parse boundary, deduplication, the
//! backpressure buffer, the adaptive batcher, the ordered column store and
//! the filter engine.
//!
//! # Architecture
//!
//! ```text
//! feed ──► Normalizer ──► IngestSink (Deduplicator ──► IngestBuffer)
//!                                                         │
//!                                      Batcher (single writer)
//!                                                         ▼
//!                          FilterEngine ◄── snapshot ── LogStore ──► FlushEvent
//! ```
//!
//! Producers never touch the store. Only the [`batcher::Batcher`] writes it;
//! readers take [`store::LogStore::snapshot`]s that stay valid across later
//! flushes.

pub mod backpressure;
pub mod batcher;
pub mod config;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod filter_worker;
pub mod normalizer;
pub mod query;
pub mod sink;
pub mod store;
pub mod types;

pub use backpressure::{AdaptiveDelay, IngestBuffer};
pub use batcher::{Batcher, FlushEvent, FlushGate};
pub use dedup::Deduplicator;
pub use error::{FilterError, ParseError};
pub use filter::{FilterOptions, FilterStats, TimeRange};
pub use filter_worker::{FilterEngine, FilterResponse};
pub use normalizer::Normalizer;
pub use sink::IngestSink;
pub use store::{LogColumns, LogStore};
pub use types::{FeedKind, LogRecord, Timestamp};
