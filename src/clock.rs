//! Clock abstraction so timing-sensitive logic is testable without sleeping

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Time source used by locks and the executor.
///
/// Wall-clock time stamps applied records and lock info; monotonic time bounds
/// polling loops and measures execution spans. Tests substitute a manual clock
/// (see [`crate::testing::ManualClock`]) to simulate elapsed time deterministically.
pub trait Clock: Send + Sync {
    /// Current wall-clock time (UTC).
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic time since an arbitrary epoch. Differences between two calls
    /// measure elapsed time; the absolute value is meaningless.
    fn monotonic(&self) -> Duration;

    /// Block the caller for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Production clock backed by `Utc::now()` and a process-local `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_monotonic_never_decreases() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }
}
