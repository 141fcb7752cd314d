//! Error handling for Tempo Core.
//!
//! The core distinguishes two propagation paths:
//!
//! - **Management errors** (loading a duplicate job, naming an unknown job,
//!   illegal lifecycle transitions) surface to the caller of the management
//!   operation.
//! - **Execution errors** (action failures, cancellation, recovered panics)
//!   are captured on the invocation record, reflected in its status, and
//!   broadcast through events. They never tear down a scheduler or the
//!   manager.

use thiserror::Error;

/// A specialized Result type for Tempo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A management operation named a job that is not registered.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A job with the same name is already registered with the manager.
    #[error("job already loaded: {0}")]
    JobAlreadyLoaded(String),

    /// The invocation's execution context was cancelled, either explicitly
    /// or by exceeding its timeout.
    #[error("job cancelled")]
    JobCancelled,

    /// A start was attempted while the lifecycle latch was not idle.
    #[error("cannot start; already started")]
    CannotStart,

    /// A stop was attempted while the lifecycle latch was not running.
    #[error("cannot stop; already stopped")]
    CannotStop,

    /// A schedule expression failed to parse.
    #[error("invalid schedule `{expression}`: {reason}")]
    InvalidSchedule {
        /// The offending expression.
        expression: String,
        /// What the parser rejected.
        reason: String,
    },

    /// A job action panicked; the panic was recovered at the worker boundary
    /// and converted into a failure.
    #[error("job panicked: {0}")]
    Panic(String),

    /// An opaque failure returned by a job action. Carried verbatim on the
    /// invocation record.
    #[error("{0}")]
    Job(String),
}

impl Error {
    /// Create an opaque action failure.
    pub fn job(message: impl Into<String>) -> Self {
        Self::Job(message.into())
    }

    /// Create a schedule parse failure.
    pub fn invalid_schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error represents cooperative cancellation (including a
    /// timeout surfacing as cancellation).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::JobCancelled)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Job(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::Job(message.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Job(format!("{error:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_detection() {
        assert!(Error::JobCancelled.is_cancellation());
        assert!(!Error::job("boom").is_cancellation());
        assert!(!Error::Panic("boom".into()).is_cancellation());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::JobNotFound("nightly".into()).to_string(),
            "job not found: nightly"
        );
        assert_eq!(
            Error::invalid_schedule("bogus", "wrong field count").to_string(),
            "invalid schedule `bogus`: wrong field count"
        );
        assert_eq!(Error::job("exit status 2").to_string(), "exit status 2");
    }

    #[test]
    fn test_from_str() {
        let err: Error = "disk full".into();
        assert_eq!(err, Error::Job("disk full".into()));
    }
}
