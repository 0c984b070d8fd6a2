// SPDX-License-Identifier: MIT

//! Time abstraction so the scheduler, heartbeat monitor, and cleanup sweeper
//! can be driven deterministically in tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of time for anything that needs to reason about elapsed durations
/// or wall-clock staleness (heartbeat timeout, cleanup age, job `createdAt`).
pub trait Clock: Clone + Send + Sync + 'static {
    /// A monotonic instant, suitable for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, suitable for display/serialization.
    fn epoch_ms(&self) -> u64;
}

/// Production clock backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;

    /// Deterministic clock for tests: starts at `Instant::now()` and only
    /// moves forward when explicitly told to via [`FakeClock::advance`].
    #[derive(Debug, Clone)]
    pub struct FakeClock {
        inner: Arc<Mutex<FakeClockState>>,
    }

    #[derive(Debug)]
    struct FakeClockState {
        now: Instant,
        epoch_ms: u64,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(FakeClockState {
                    now: Instant::now(),
                    epoch_ms: 0,
                })),
            }
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            state.now += duration;
            state.epoch_ms += duration.as_millis() as u64;
        }
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).now
        }

        fn epoch_ms(&self) -> u64 {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).epoch_ms
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn fake_clock_advances_both_now_and_epoch() {
            let clock = FakeClock::new();
            let start = clock.now();
            clock.advance(Duration::from_secs(5));
            assert_eq!(clock.now(), start + Duration::from_secs(5));
            assert_eq!(clock.epoch_ms(), 5000);
        }

        #[test]
        fn fake_clock_clones_share_state() {
            let clock = FakeClock::new();
            let clone = clock.clone();
            clock.advance(Duration::from_secs(1));
            assert_eq!(clone.epoch_ms(), 1000);
        }
    }
}
