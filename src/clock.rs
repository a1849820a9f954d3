//! Injectable clock, per the design note in spec.md §9 ("the engine is
//! constructed with ... a clock. No process-wide mutables"). Tests that need
//! to control wall-clock/monotonic time (circuit breaker timeout, spill
//! replay cadence) inject [`FakeClock`] instead of reading the OS clock.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Abstraction over wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, used for `@timestamp`-style fields and path templating.
    fn now(&self) -> DateTime<Utc>;

    /// Current monotonic instant, used for circuit breaker timeouts and flush intervals.
    fn monotonic_now(&self) -> Instant;
}

/// Default clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// A controllable clock for deterministic tests of time-based behavior
/// (circuit breaker `open_timeout`, flush timers) without real sleeps.
pub struct FakeClock {
    epoch: Instant,
    offset_millis: AtomicU64,
    wall_base: DateTime<Utc>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_millis: AtomicU64::new(0),
            wall_base: Utc::now(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advance both wall-clock and monotonic readings by `d`.
    pub fn advance(&self, d: Duration) {
        self.offset_millis
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = self.offset_millis.load(Ordering::SeqCst);
        self.wall_base + chrono::Duration::milliseconds(offset as i64)
    }

    fn monotonic_now(&self) -> Instant {
        let offset = self.offset_millis.load(Ordering::SeqCst);
        self.epoch + Duration::from_millis(offset)
    }
}
