//! Schedules decide when a job fires next.
//!
//! A [`Schedule`] is a pure function from the previous fire time to the next
//! one. Returning `None` terminates a scheduler's timer loop; the job stays
//! registered and remains runnable on demand.
//!
//! Textual schedules are parsed by [`parse`]: `@every <duration>` maps to an
//! [`IntervalSchedule`], everything else is handed to the cron-expression
//! parser.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{system_clock, SharedClock};
use crate::error::{Error, Result};

/// Yields the next fire time after a reference time.
pub trait Schedule: Send + Sync {
    /// The next fire time strictly after `previous`, or `None` to stop the
    /// timer loop.
    ///
    /// `previous` is `None` on the first consultation. Implementations are
    /// monotonic non-decreasing in `previous`.
    fn next(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>>;
}

/// A shareable schedule handle.
pub type SharedSchedule = Arc<dyn Schedule>;

/// Parse a textual schedule.
///
/// `@every 30s`, `@every 5m` and friends (humantime grammar) produce an
/// interval; `@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly` and plain
/// cron expressions (5, 6 or 7 fields) go through [`CronSchedule`].
pub fn parse(expression: &str) -> Result<SharedSchedule> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_schedule(expression, "empty expression"));
    }

    if let Some(rest) = trimmed.strip_prefix("@every ") {
        let every = humantime::parse_duration(rest.trim())
            .map_err(|e| Error::invalid_schedule(expression, e.to_string()))?;
        if every.is_zero() {
            return Err(Error::invalid_schedule(expression, "interval must be positive"));
        }
        return Ok(Arc::new(IntervalSchedule::new(every)));
    }

    Ok(Arc::new(CronSchedule::parse(trimmed)?))
}

/// A cron-expression schedule.
///
/// Wraps the `cron` crate's parser. Classic 5-field expressions are
/// normalized by prepending a zero seconds field, and the `@hourly`-style
/// mnemonics expand to their 6-field forms; 6- and 7-field expressions
/// (leading seconds, optional trailing year) pass through unchanged.
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
    clock: SharedClock,
}

impl CronSchedule {
    /// Parse a cron expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = Self::normalize(expression);
        let inner = cron::Schedule::from_str(&normalized)
            .map_err(|e| Error::invalid_schedule(expression, e.to_string()))?;
        Ok(Self {
            expression: expression.to_string(),
            inner,
            clock: system_clock(),
        })
    }

    /// Override the clock used to resolve the first fire time.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn normalize(expression: &str) -> String {
        let trimmed = expression.trim();
        if trimmed.starts_with('@') {
            // The cron crate's field parser has no nickname support.
            return match trimmed.to_ascii_lowercase().as_str() {
                "@hourly" => "0 0 * * * *",
                "@daily" | "@midnight" => "0 0 0 * * *",
                "@weekly" => "0 0 0 * * SUN",
                "@monthly" => "0 0 0 1 * *",
                "@yearly" | "@annually" => "0 0 0 1 1 *",
                other => other,
            }
            .to_string();
        }
        if trimmed.split_whitespace().count() == 5 {
            return format!("0 {trimmed}");
        }
        trimmed.to_string()
    }
}

impl Schedule for CronSchedule {
    fn next(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let after = previous.unwrap_or_else(|| self.clock.now());
        self.inner.after(&after).next()
    }
}

/// Fires at a fixed interval. Never returns `None`.
pub struct IntervalSchedule {
    every: Duration,
    clock: SharedClock,
}

impl IntervalSchedule {
    /// Create an interval schedule. `every` must be positive.
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            clock: system_clock(),
        }
    }

    /// Override the clock used to resolve the first fire time.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The configured interval.
    pub fn every(&self) -> Duration {
        self.every
    }
}

impl Schedule for IntervalSchedule {
    fn next(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let base = previous.unwrap_or_else(|| self.clock.now());
        let step = chrono::Duration::from_std(self.every).unwrap_or_else(|_| chrono::Duration::zero());
        Some(base + step)
    }
}

/// Fires immediately on the first consultation, then delegates to an inner
/// schedule.
pub struct ImmediatelyThen {
    inner: SharedSchedule,
    clock: SharedClock,
}

impl ImmediatelyThen {
    /// Wrap `inner` so the first fire happens right away.
    pub fn new(inner: SharedSchedule) -> Self {
        Self {
            inner,
            clock: system_clock(),
        }
    }

    /// Override the clock used for the immediate fire.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

impl Schedule for ImmediatelyThen {
    fn next(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match previous {
            None => Some(self.clock.now()),
            Some(_) => self.inner.next(previous),
        }
    }
}

/// Never fires on its own; the job only runs when forced explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnDemand;

impl Schedule for OnDemand {
    fn next(&self, _previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn pinned(clock_time: DateTime<Utc>) -> SharedClock {
        Arc::new(ManualClock::at(clock_time))
    }

    #[test]
    fn test_interval_advances_from_previous() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let schedule = IntervalSchedule::new(Duration::from_secs(60)).with_clock(pinned(start));

        let first = schedule.next(None).unwrap();
        assert_eq!(first, start + chrono::Duration::seconds(60));

        let second = schedule.next(Some(first)).unwrap();
        assert_eq!(second, first + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_cron_hourly() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
        let schedule = CronSchedule::parse("@hourly").unwrap().with_clock(pinned(start));

        let next = schedule.next(None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_cron_mnemonics_expand() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();

        let daily = CronSchedule::parse("@daily").unwrap().with_clock(pinned(start));
        assert_eq!(
            daily.next(None),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap())
        );

        // 2024-05-01 is a Wednesday; the next Sunday is the 5th.
        let weekly = CronSchedule::parse("@weekly").unwrap().with_clock(pinned(start));
        assert_eq!(
            weekly.next(None),
            Some(Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap())
        );

        let monthly = CronSchedule::parse("@monthly").unwrap().with_clock(pinned(start));
        assert_eq!(
            monthly.next(None),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );

        let yearly = CronSchedule::parse("@yearly").unwrap().with_clock(pinned(start));
        assert_eq!(
            yearly.next(None),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cron_five_field_normalization() {
        // "every 15 minutes" in classic 5-field form.
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 3, 12).unwrap();
        let schedule = CronSchedule::parse("*/15 * * * *")
            .unwrap()
            .with_clock(pinned(start));

        let next = schedule.next(None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_cron_seven_field_with_year() {
        let schedule = CronSchedule::parse("0 0 0 1 1 * 2020").unwrap();
        // The only matching instant is in the past; the schedule is exhausted.
        let previous = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(schedule.next(Some(previous)), None);
    }

    #[test]
    fn test_cron_monotonic() {
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        let p1 = Utc.with_ymd_and_hms(2024, 5, 1, 1, 30, 0).unwrap();
        let p2 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 15, 0).unwrap();
        let n1 = schedule.next(Some(p1)).unwrap();
        let n2 = schedule.next(Some(p2)).unwrap();
        assert!(n1 <= n2);
        assert!(n1 > p1);
        assert!(n2 > p2);
    }

    #[test]
    fn test_immediately_then() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let clock = pinned(start);
        let inner: SharedSchedule =
            Arc::new(IntervalSchedule::new(Duration::from_secs(30)).with_clock(clock.clone()));
        let schedule = ImmediatelyThen::new(inner).with_clock(clock);

        assert_eq!(schedule.next(None), Some(start));
        assert_eq!(
            schedule.next(Some(start)),
            Some(start + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_on_demand_never_fires() {
        let schedule = OnDemand;
        assert_eq!(schedule.next(None), None);
        assert_eq!(schedule.next(Some(Utc::now())), None);
    }

    #[test]
    fn test_parse_every() {
        let schedule = parse("@every 5m").unwrap();
        let previous = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            schedule.next(Some(previous)),
            Some(previous + chrono::Duration::minutes(5))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse(""),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(matches!(
            parse("@every soon"),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(matches!(
            parse("not a cron expression at all really"),
            Err(Error::InvalidSchedule { .. })
        ));
    }
}
