//! Circuit breaker for HTTP pollers.
//!
//! `closed → open → half-open → {closed | open}`. The circuit opens after
//! `failure_threshold` consecutive failures and refuses calls until the
//! cooldown has elapsed. The next call is a half-open probe: success closes
//! the circuit, failure reopens it with the cooldown doubled (up to
//! `max_cooldown`). Closing resets the cooldown.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl CircuitConfig {
    pub fn new(failure_threshold: u32, open_cooldown: Duration, max_cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_cooldown,
            max_cooldown: max_cooldown.max(open_cooldown),
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub cooldown_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: State,
    consecutive_failures: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let cooldown = config.open_cooldown;
        Self {
            name: name.into(),
            config,
            state: State::Closed,
            consecutive_failures: 0,
            cooldown,
        }
    }

    /// Whether a call may go out now. Moves an expired open circuit to
    /// half-open.
    pub fn allow(&mut self) -> bool {
        match self.state {
            State::Closed | State::HalfOpen => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = State::HalfOpen;
                    tracing::info!(circuit = %self.name, "circuit half-open; sending probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if matches!(self.state, State::HalfOpen) {
            tracing::info!(circuit = %self.name, "circuit closed after successful probe");
        }
        self.state = State::Closed;
        self.consecutive_failures = 0;
        self.cooldown = self.config.open_cooldown;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            State::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = State::Open { opened_at: Instant::now() };
                    tracing::warn!(
                        circuit = %self.name,
                        failures = self.consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "circuit opened after consecutive failures"
                    );
                }
            }
            State::HalfOpen => {
                self.cooldown = (self.cooldown * 2).min(self.config.max_cooldown);
                self.state = State::Open { opened_at: Instant::now() };
                tracing::warn!(
                    circuit = %self.name,
                    cooldown_secs = self.cooldown.as_secs(),
                    "circuit re-opened after failed probe"
                );
            }
            State::Open { .. } => {}
        }
    }

    pub fn state(&self) -> CircuitStateKind {
        match self.state {
            State::Closed => CircuitStateKind::Closed,
            State::Open { .. } => CircuitStateKind::Open,
            State::HalfOpen => CircuitStateKind::HalfOpen,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        let cooldown_remaining_ms = match self.state {
            State::Open { opened_at } => {
                Some(self.cooldown.saturating_sub(opened_at.elapsed()).as_millis() as u64)
            }
            _ => None,
        };
        CircuitStatus {
            state: self.state(),
            consecutive_failures: self.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
            cooldown_remaining_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitConfig::new(3, Duration::from_secs(10), Duration::from_secs(25)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold() {
        let mut cb = breaker();
        for _ in 0..2 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitStateKind::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitStateKind::Open);
        assert!(!cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_count() {
        let mut cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitStateKind::Closed);
        assert_eq!(cb.status().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes() {
        let mut cb = breaker();
        (0..3).for_each(|_| cb.record_failure());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitStateKind::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitStateKind::Closed);
        assert_eq!(cb.status().cooldown_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_longer_cooldown() {
        let mut cb = breaker();
        (0..3).for_each(|_| cb.record_failure());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitStateKind::Open);
        assert_eq!(cb.status().cooldown_ms, 20_000);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!cb.allow());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.allow());
        cb.record_failure();
        // Capped at max_cooldown.
        assert_eq!(cb.status().cooldown_ms, 25_000);
    }

    #[rstest]
    #[case::first_reopen(1, 20_000)]
    #[case::second_reopen_hits_cap(2, 25_000)]
    #[case::stays_capped(4, 25_000)]
    #[tokio::test(start_paused = true)]
    async fn cooldown_escalation(#[case] failed_probes: u32, #[case] expected_ms: u64) {
        let mut cb = breaker();
        (0..3).for_each(|_| cb.record_failure());
        for _ in 0..failed_probes {
            tokio::time::advance(Duration::from_secs(30)).await;
            assert!(cb.allow());
            cb.record_failure();
        }
        assert_eq!(cb.status().cooldown_ms, expected_ms);
    }
}
