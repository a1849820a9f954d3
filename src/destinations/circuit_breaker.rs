//! Three-state circuit breaker guarding a destination worker (spec.md §4.8).
//!
//! `closed -> open` on `max_failures` consecutive failures; `open ->
//! half-open` after `open_timeout` elapses (checked against the injected
//! [`Clock`]'s monotonic reading, never wall-clock, so tests can advance
//! time deterministically); `half-open -> closed` after
//! `successes_to_close` consecutive probe successes; any half-open failure
//! reopens immediately.

use crate::model::CircuitBreakerConfig;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Numeric encoding for the `circuit_breaker_state` gauge (spec.md §6).
    pub fn as_gauge(self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// At most one probe batch may be in flight while half-open.
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self, now: Instant) -> BreakerState {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.maybe_transition_to_half_open(&mut inner, now);
        inner.state
    }

    /// Whether a flush attempt may proceed to the network right now. Closed
    /// always allows; open never allows (caller should spill/drop); half-open
    /// allows exactly one concurrent probe.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.maybe_transition_to_half_open(&mut inner, now);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if now.saturating_duration_since(opened_at).as_millis() as u64 >= self.config.open_timeout_ms {
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = false;
                    info!("circuit breaker half-open, probe permitted");
                }
            }
        }
    }

    pub fn record_success(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.successes_to_close {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!("circuit breaker closed after successful probes");
                }
            }
            BreakerState::Open => {
                // A success can't legitimately arrive while open (try_acquire
                // would have refused it), but stay defensive rather than panic.
                let _ = now;
            }
        }
    }

    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    info!(max_failures = self.config.max_failures, "circuit breaker opened");
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.consecutive_successes = 0;
                info!("circuit breaker reopened after failed probe");
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig { max_failures: 3, open_timeout_ms: 1_000, successes_to_close: 2 }
    }

    #[test]
    fn opens_after_max_consecutive_failures() {
        let breaker = CircuitBreaker::new(config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        assert_eq!(breaker.state(t0), BreakerState::Open);
        assert!(!breaker.try_acquire(t0));
    }

    #[test]
    fn no_probe_before_open_timeout_elapses() {
        let breaker = CircuitBreaker::new(config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        // Even one microsecond before the timeout, still open.
        let before = t0 + Duration::from_millis(999);
        assert!(!breaker.try_acquire(before));
    }

    #[test]
    fn half_opens_after_timeout_and_closes_after_successes() {
        let breaker = CircuitBreaker::new(config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        let after = t0 + Duration::from_secs(2);
        assert!(breaker.try_acquire(after));
        assert_eq!(breaker.state(after), BreakerState::HalfOpen);
        breaker.record_success(after);
        breaker.record_success(after);
        assert_eq!(breaker.state(after), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        let after = t0 + Duration::from_secs(2);
        assert!(breaker.try_acquire(after));
        breaker.record_failure(after);
        assert_eq!(breaker.state(after), BreakerState::Open);
    }

    #[test]
    fn half_open_allows_only_one_concurrent_probe() {
        let breaker = CircuitBreaker::new(config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        let after = t0 + Duration::from_secs(2);
        assert!(breaker.try_acquire(after));
        assert!(!breaker.try_acquire(after));
    }

    /// spec.md §8 S5: `open_timeout=100ms` must be expressible and honored
    /// to the millisecond, not rounded up to a whole second.
    #[test]
    fn s5_sub_second_open_timeout_is_honored() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 3,
            open_timeout_ms: 100,
            successes_to_close: 2,
        });
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        assert!(!breaker.try_acquire(t0 + Duration::from_millis(99)));
        assert!(breaker.try_acquire(t0 + Duration::from_millis(101)));
    }
}
