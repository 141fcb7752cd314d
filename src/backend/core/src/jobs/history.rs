//! Bounded retention for per-job invocation history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::invocation::JobInvocation;

/// Default history length cap.
pub const DEFAULT_MAX_COUNT: usize = 10;
/// Default history age cap.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Retention bounds applied on every history append.
///
/// A zero `max_count` or `max_age` disables the respective bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRetention {
    /// Maximum number of retained invocations.
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Maximum age of a retained invocation, measured from its start.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl HistoryRetention {
    /// Retention that keeps everything.
    pub fn unbounded() -> Self {
        Self {
            max_count: 0,
            max_age: Duration::ZERO,
        }
    }

    /// Apply both bounds to `history`: cap by count first (dropping the
    /// oldest entries), then cull entries older than `max_age`.
    pub fn apply(&self, history: &mut Vec<JobInvocation>, now: DateTime<Utc>) {
        if self.max_count > 0 && history.len() > self.max_count {
            let excess = history.len() - self.max_count;
            history.drain(..excess);
        }
        if !self.max_age.is_zero() {
            // An out-of-range max_age retains everything.
            if let Ok(max_age) = chrono::Duration::from_std(self.max_age) {
                let cutoff = now - max_age;
                history.retain(|invocation| invocation.started >= cutoff);
            }
        }
    }
}

fn default_max_count() -> usize {
    DEFAULT_MAX_COUNT
}

fn default_max_age() -> Duration {
    DEFAULT_MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation_started_at(started: DateTime<Utc>) -> JobInvocation {
        JobInvocation::new("test", started, false)
    }

    #[test]
    fn test_count_cap_drops_oldest() {
        let now = Utc::now();
        let retention = HistoryRetention {
            max_count: 3,
            max_age: Duration::ZERO,
        };

        let mut history: Vec<_> = (0..5)
            .map(|i| invocation_started_at(now - chrono::Duration::seconds(10 - i)))
            .collect();
        retention.apply(&mut history, now);

        assert_eq!(history.len(), 3);
        // Oldest two were dropped; the newest entry survives.
        assert_eq!(history[2].started, now - chrono::Duration::seconds(6));
    }

    #[test]
    fn test_age_cull() {
        let now = Utc::now();
        let retention = HistoryRetention {
            max_count: 0,
            max_age: Duration::from_secs(60),
        };

        let mut history = vec![
            invocation_started_at(now - chrono::Duration::seconds(120)),
            invocation_started_at(now - chrono::Duration::seconds(30)),
        ];
        retention.apply(&mut history, now);

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].started, now - chrono::Duration::seconds(30));
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let now = Utc::now();
        let retention = HistoryRetention::unbounded();

        let mut history: Vec<_> = (0..50)
            .map(|i| invocation_started_at(now - chrono::Duration::hours(i)))
            .collect();
        retention.apply(&mut history, now);

        assert_eq!(history.len(), 50);
    }

    #[test]
    fn test_defaults() {
        let retention = HistoryRetention::default();
        assert_eq!(retention.max_count, 10);
        assert_eq!(retention.max_age, Duration::from_secs(21600));
    }
}
