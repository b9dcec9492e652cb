//! Circuit breaker (C3) — per-agent failure isolation.
//!
//! Three states: `Closed` (calls flow normally), `Open` (calls rejected
//! until the recovery timeout elapses), `HalfOpen` (a bounded number of
//! trial calls are allowed through to test recovery). Only legal
//! transitions are ever applied; the last five transitions are kept for
//! diagnostics.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use conclave_domain::error::{Error, Result};

const MAX_TRANSITION_LOG: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_calls: u32,
    pub recent_transitions: Vec<StateTransition>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
    transitions: VecDeque<StateTransition>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    half_open_max_calls: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, 5, Duration::from_secs(60), 3, 3)
    }

    pub fn with_config(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            success_threshold,
            half_open_max_calls,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_calls: 0,
                opened_at: None,
                transitions: VecDeque::new(),
            }),
        }
    }

    /// Call before attempting a guarded operation. Transitions `Open` to
    /// `HalfOpen` once the recovery timeout has elapsed.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen, "recovery timeout elapsed");
                    inner.half_open_calls = 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.half_open_max_calls {
                    Err(Error::CircuitHalfOpenSaturated {
                        name: self.name.clone(),
                    })
                } else {
                    inner.half_open_calls += 1;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, "success threshold reached");
                    inner.consecutive_successes = 0;
                    inner.half_open_calls = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, "failure threshold reached");
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, "trial call failed");
                inner.opened_at = Some(Instant::now());
                inner.half_open_calls = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            half_open_calls: inner.half_open_calls,
            recent_transitions: inner.transitions.iter().cloned().collect(),
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, reason: &str) {
        let from = inner.state;
        tracing::info!(breaker = %self.name, ?from, ?to, reason, "circuit breaker transition");
        inner.transitions.push_back(StateTransition {
            from,
            to,
            reason: reason.to_string(),
        });
        if inner.transitions.len() > MAX_TRANSITION_LOG {
            inner.transitions.pop_front();
        }
        inner.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::with_config("test", 2, Duration::from_millis(20), 2, 2)
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = fast_breaker();
        cb.allow().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_calls_while_open() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow().is_err());
    }

    #[test]
    fn transitions_to_half_open_after_timeout() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        cb.allow().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        cb.allow().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_call_cap_is_enforced() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.allow().is_ok()); // 1st trial call
        assert!(cb.allow().is_ok()); // 2nd trial call
        assert!(cb.allow().is_err()); // cap reached
    }

    #[test]
    fn transition_log_is_bounded() {
        let cb = CircuitBreaker::with_config("test", 1, Duration::from_millis(1), 1, 1);
        for _ in 0..10 {
            cb.record_failure();
            std::thread::sleep(Duration::from_millis(2));
            let _ = cb.allow();
            cb.record_failure();
        }
        assert!(cb.stats().recent_transitions.len() <= MAX_TRANSITION_LOG);
    }

    #[test]
    fn default_config_matches_documented_thresholds() {
        let cb = CircuitBreaker::new("default");
        assert_eq!(cb.failure_threshold, 5);
        assert_eq!(cb.recovery_timeout, Duration::from_secs(60));
        assert_eq!(cb.success_threshold, 3);
        assert_eq!(cb.half_open_max_calls, 3);
    }
}
