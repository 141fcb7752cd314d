//! Time access for the scheduling core.
//!
//! Every component reads time through [`Clock`] so tests can pin or advance
//! it deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// An injectable time source.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// The current wall-clock time, UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Completes once `duration` has elapsed.
    async fn sleep(&self, duration: Duration);
}

/// A shareable clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The process clock: `Utc::now` plus tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Convenience constructor for the default clock handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock pinned to a fixed instant that only moves when slept on or
/// advanced explicitly. Used to make schedule arithmetic deterministic in
/// tests.
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Let other tasks observe the new time before the sleeper resumes.
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::at(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_moves_time() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::at(start);
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(250));
    }

    #[tokio::test]
    async fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        let b = clock.now();
        assert!(b > a);
    }
}
