//! Fake HTTP log API for poller integration tests.
//!
//! Spins up a minimal `axum` server on a random TCP port bound to 127.0.0.1.
//! Serves `GET /logs` with a scripted sequence of responses: each request
//! pops the next queued response, and once the queue is empty the last
//! response is repeated. Every request is counted, so tests can assert that
//! an open circuit made no network call.
//!
//! # Example
//!
//! ```rust,ignore
//! let api = FakeLogApi::start().await.unwrap();
//! api.respond(200, r#"[{"message":"hello"}]"#).await;
//! let url = api.logs_url();
//! ```

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Clone)]
struct Scripted {
    status: StatusCode,
    body: String,
    delay: Duration,
}

#[derive(Default)]
struct ApiState {
    queue: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    hits: AtomicUsize,
}

/// Handle to the running fake API.
pub struct FakeLogApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
}

impl FakeLogApi {
    /// Start on a random port. Returns once the server is listening.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ApiState::default());

        let app = Router::new()
            .route("/logs", get(serve_logs))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self { addr, state })
    }

    /// `http://127.0.0.1:PORT/logs`
    pub fn logs_url(&self) -> String {
        format!("http://{}/logs", self.addr)
    }

    /// Queue a response.
    pub async fn respond(&self, status: u16, body: impl Into<String>) {
        self.respond_after(status, body, Duration::ZERO).await;
    }

    /// Queue a response that is sent after `delay`.
    pub async fn respond_after(&self, status: u16, body: impl Into<String>, delay: Duration) {
        self.state.queue.lock().await.push_back(Scripted {
            status: StatusCode::from_u16(status).expect("valid status code"),
            body: body.into(),
            delay,
        });
    }

    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn serve_logs(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let next = state.queue.lock().await.pop_front();
    let scripted = {
        let mut last = state.last.lock().await;
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone()
    };
    let Some(scripted) = scripted else {
        return (StatusCode::OK, "[]".to_string());
    };
    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }
    (scripted.status, scripted.body)
}
