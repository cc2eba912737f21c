//! Circuit breaker (C2, §4.2)
//!
//! Consecutive-counter state machine, not failure-rate based, for
//! deterministic transitions under test. The rolling failure window exists
//! for observability only; it never drives a transition.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::CircuitConfig;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Classification of a protected-operation failure, retained in the rolling
/// window for observability (never drives a transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    StoreError,
    LookupError,
    Other,
}

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub at: u64,
    pub kind: FailureKind,
}

#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub entered_state_at: u64,
    pub consecutive_failures: u32,
    pub total_operations: u64,
    pub total_failures: u64,
    pub state_changes_count: u64,
    pub recent_failures: Vec<FailureRecord>,
}

/// Outcome of asking the breaker whether to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    FastFail,
}

struct Inner {
    state: CircuitState,
    opened_at: u64,
    entered_state_at: u64,
    consecutive_failures: u32,
    consecutive_half_open_successes: u32,
    half_open_admit_counter: u64,
    total_operations: u64,
    total_failures: u64,
    state_changes_count: u64,
    recent_failures: VecDeque<FailureRecord>,
}

/// C2: the circuit breaker itself. Wraps nothing directly — callers ask
/// `admit()` before attempting the protected operation, then report the
/// outcome via `on_success`/`on_failure`.
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        let now = now_secs();
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: 0,
                entered_state_at: now,
                consecutive_failures: 0,
                consecutive_half_open_successes: 0,
                half_open_admit_counter: 0,
                total_operations: 0,
                total_failures: 0,
                state_changes_count: 0,
                recent_failures: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit mutex poisoned").state
    }

    /// Decide whether to admit a call attempt right now, applying the OPEN ->
    /// HALF_OPEN timeout transition and HALF_OPEN throttled recovery.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        let now = now_secs();

        match inner.state {
            CircuitState::Closed => Admission::Admit,
            CircuitState::Open => {
                if now.saturating_sub(inner.opened_at) >= self.config.open_timeout_seconds {
                    transition(&mut inner, CircuitState::HalfOpen, now);
                    self.admit_half_open(&mut inner)
                } else {
                    Admission::FastFail
                }
            }
            CircuitState::HalfOpen => self.admit_half_open(&mut inner),
        }
    }

    fn admit_half_open(&self, inner: &mut Inner) -> Admission {
        inner.half_open_admit_counter += 1;
        // Deterministic throttle: admit every Nth request where N = 1/recovery_factor.
        let stride = (1.0 / self.config.recovery_factor).round().max(1.0) as u64;
        if inner.half_open_admit_counter % stride == 0 {
            Admission::Admit
        } else {
            Admission::FastFail
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        let now = now_secs();
        inner.total_operations += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_half_open_successes += 1;
                if inner.consecutive_half_open_successes >= self.config.success_threshold {
                    transition(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self, kind: FailureKind) {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        let now = now_secs();
        inner.total_operations += 1;
        inner.total_failures += 1;
        inner.recent_failures.push_back(FailureRecord { at: now, kind });
        while inner.recent_failures.len() > self.config.window_size {
            inner.recent_failures.pop_front();
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock().expect("circuit mutex poisoned");
        CircuitMetrics {
            state: inner.state,
            entered_state_at: inner.entered_state_at,
            consecutive_failures: inner.consecutive_failures,
            total_operations: inner.total_operations,
            total_failures: inner.total_failures,
            state_changes_count: inner.state_changes_count,
            recent_failures: inner.recent_failures.iter().cloned().collect(),
        }
    }
}

fn transition(inner: &mut Inner, to: CircuitState, now: u64) {
    inner.state = to;
    inner.entered_state_at = now;
    inner.state_changes_count += 1;
    match to {
        CircuitState::Open => {
            inner.opened_at = now;
        }
        CircuitState::HalfOpen => {
            inner.consecutive_half_open_successes = 0;
            inner.half_open_admit_counter = 0;
        }
        CircuitState::Closed => {
            inner.consecutive_failures = 0;
        }
    }
}
