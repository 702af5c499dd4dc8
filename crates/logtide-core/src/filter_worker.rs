//! Inline or offloaded filtering with request-id fencing.
//!
//! [`FilterEngine::filter`] tags every request with a fresh id. Small
//! snapshots are filtered in the calling context; larger ones are sent to a
//! dedicated [`FilterWorker`] thread. A response whose id is no longer the
//! latest issued is discarded, which is how superseded requests are
//! cancelled: the worker always finishes what it started.

use crate::error::FilterError;
use crate::filter::{filter_indices, FilterOptions, FilterStats};
use crate::store::LogColumns;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Snapshots with at least this many rows are filtered off-thread.
pub const OFFLOAD_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub request_id: u64,
    pub entries: Arc<LogColumns>,
    pub options: FilterOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResponse {
    pub request_id: u64,
    pub filtered_indices: Vec<usize>,
    pub stats: FilterStats,
}

impl FilterResponse {
    fn evaluate(request: &FilterRequest) -> Self {
        let result = filter_indices(&request.entries, &request.options);
        Self {
            request_id: request.request_id,
            filtered_indices: result.indices,
            stats: result.stats,
        }
    }
}

type Job = (FilterRequest, oneshot::Sender<FilterResponse>);

// ---------------------------------------------------------------------------
// FilterWorker
// ---------------------------------------------------------------------------

/// A background thread evaluating [`FilterRequest`]s one at a time.
#[derive(Debug)]
pub struct FilterWorker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl FilterWorker {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("logtide-filter".into())
            .spawn(move || {
                for (request, reply) in rx {
                    let response = FilterResponse::evaluate(&request);
                    // The caller may have given up on this request.
                    let _ = reply.send(response);
                }
            })?;
        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue `request`; the receiver resolves when the worker is done.
    pub fn submit(
        &self,
        request: FilterRequest,
    ) -> Result<oneshot::Receiver<FilterResponse>, FilterError> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .as_ref()
            .ok_or(FilterError::WorkerGone)?
            .send((request, tx))
            .map_err(|_| FilterError::WorkerGone)?;
        Ok(rx)
    }
}

impl Drop for FilterWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("filter worker thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FilterEngine
// ---------------------------------------------------------------------------

enum Pending {
    Ready(FilterResponse),
    Offloaded(Result<oneshot::Receiver<FilterResponse>, FilterError>),
}

#[derive(Debug)]
pub struct FilterEngine {
    offload_threshold: usize,
    latest: AtomicU64,
    worker: FilterWorker,
}

impl FilterEngine {
    pub fn new(offload_threshold: usize) -> std::io::Result<Self> {
        Ok(Self {
            offload_threshold,
            latest: AtomicU64::new(0),
            worker: FilterWorker::spawn()?,
        })
    }

    pub fn offload_threshold(&self) -> usize {
        self.offload_threshold
    }

    /// Id of the most recently issued request.
    pub fn latest_request_id(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Issue a filter request over `entries`.
    ///
    /// The request id is taken when this method is called, not when the
    /// future is first polled. The future yields `Ok(None)` if a newer
    /// request was issued before this one's result arrived.
    pub fn filter(
        &self,
        entries: Arc<LogColumns>,
        options: FilterOptions,
    ) -> impl Future<Output = Result<Option<FilterResponse>, FilterError>> + '_ {
        let request_id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let request = FilterRequest {
            request_id,
            entries,
            options,
        };
        let pending = if request.entries.len() < self.offload_threshold {
            Pending::Ready(FilterResponse::evaluate(&request))
        } else {
            tracing::debug!(request_id, rows = request.entries.len(), "offloading filter");
            Pending::Offloaded(self.worker.submit(request))
        };

        async move {
            let response = match pending {
                Pending::Ready(response) => response,
                Pending::Offloaded(rx) => rx?.await.map_err(|_| FilterError::WorkerGone)?,
            };
            let latest = self.latest.load(Ordering::SeqCst);
            if response.request_id != latest {
                tracing::trace!(request_id = response.request_id, latest, "discarding stale filter result");
                return Ok(None);
            }
            Ok(Some(response))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
