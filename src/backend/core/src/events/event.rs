//! Event flags and payloads emitted by the scheduling core.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

// =============================================================================
// Event Flags
// =============================================================================

/// The lifecycle transitions observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFlag {
    /// An invocation began executing.
    Started,
    /// An invocation finished without error.
    Complete,
    /// An invocation finished with an error.
    Failed,
    /// An invocation was cancelled (explicitly or by timeout).
    Cancelled,
    /// A failure followed a success.
    Broken,
    /// A success followed a failure.
    Fixed,
    /// The job was enabled by an operator.
    Enabled,
    /// The job was disabled by an operator.
    Disabled,
    /// Diagnostic tick from a scheduler's timer loop.
    Heartbeat,
}

impl EventFlag {
    /// Every flag, in lifecycle order.
    pub const ALL: [EventFlag; 9] = [
        EventFlag::Started,
        EventFlag::Complete,
        EventFlag::Failed,
        EventFlag::Cancelled,
        EventFlag::Broken,
        EventFlag::Fixed,
        EventFlag::Enabled,
        EventFlag::Disabled,
        EventFlag::Heartbeat,
    ];

    /// The stable textual name carried on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "cron.started",
            Self::Complete => "cron.complete",
            Self::Failed => "cron.failed",
            Self::Cancelled => "cron.cancelled",
            Self::Broken => "cron.broken",
            Self::Fixed => "cron.fixed",
            Self::Enabled => "cron.enabled",
            Self::Disabled => "cron.disabled",
            Self::Heartbeat => "cron.heartbeat",
        }
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Job Events
// =============================================================================

/// A lifecycle event published through the [`EventBus`](super::EventBus).
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    /// Which transition fired.
    pub flag: EventFlag,

    /// The job the event belongs to.
    pub job_name: String,

    /// The invocation, when the event concerns one.
    pub invocation_id: Option<String>,

    /// Wall time the invocation took, for terminal events.
    #[serde(with = "humantime_serde")]
    pub elapsed: Option<Duration>,

    /// The failure, for `failed` events.
    #[serde(serialize_with = "serialize_err")]
    pub err: Option<Error>,

    /// Whether the job's output is persisted (`should_write_output`).
    pub writable: bool,

    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Create an event for `job_name` at `timestamp`.
    pub fn new(flag: EventFlag, job_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            flag,
            job_name: job_name.into(),
            invocation_id: None,
            elapsed: None,
            err: None,
            writable: true,
            timestamp,
        }
    }

    /// Attach the invocation id.
    pub fn with_invocation(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Attach the elapsed wall time.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Attach the failure.
    pub fn with_err(mut self, err: Error) -> Self {
        self.err = Some(err);
        self
    }

    /// Set the writable flag.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }
}

fn serialize_err<S: Serializer>(err: &Option<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_names_are_stable() {
        assert_eq!(EventFlag::Started.as_str(), "cron.started");
        assert_eq!(EventFlag::Broken.as_str(), "cron.broken");
        assert_eq!(EventFlag::Heartbeat.as_str(), "cron.heartbeat");
        assert_eq!(EventFlag::ALL.len(), 9);
    }

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::new(EventFlag::Failed, "nightly", Utc::now())
            .with_invocation("abc123")
            .with_elapsed(Duration::from_millis(1500))
            .with_err(Error::job("exit status 2"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["flag"], "failed");
        assert_eq!(json["job_name"], "nightly");
        assert_eq!(json["invocation_id"], "abc123");
        assert_eq!(json["err"], "exit status 2");
    }
}
