//! Invocation records and execution contexts.
//!
//! A [`JobInvocation`] is the record of one execution attempt: identity,
//! timing, outcome, and (optionally) captured output. The executing action
//! receives a [`JobContext`] carrying the invocation's cancellation token,
//! deadline, clock, and output buffers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::Error;

/// A shared byte buffer capturing invocation output.
pub type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Generate a fresh invocation id: 128 random bits, hex encoded.
pub fn new_invocation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// =============================================================================
// Status
// =============================================================================

/// The state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInvocationStatus {
    /// Currently executing.
    Running,
    /// Finished without error.
    Complete,
    /// Finished with an error.
    Failed,
    /// Terminated by cancellation (explicit or timeout).
    Cancelled,
}

impl JobInvocationStatus {
    /// Whether the invocation has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for JobInvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Invocation Record
// =============================================================================

/// The record of one execution attempt of a job.
///
/// Mutated only by the worker that owns it; frozen once appended to a
/// scheduler's history.
#[derive(Debug, Clone)]
pub struct JobInvocation {
    /// Globally unique identifier.
    pub id: String,
    /// The owning job.
    pub job_name: String,
    /// Current state.
    pub status: JobInvocationStatus,
    /// When execution began.
    pub started: DateTime<Utc>,
    /// When execution finished, for terminal invocations.
    pub finished: Option<DateTime<Utc>>,
    /// When cancellation took effect, for cancelled invocations.
    pub cancelled: Option<DateTime<Utc>>,
    /// The wall-clock deadline, when a timeout applies.
    pub timeout: Option<DateTime<Utc>>,
    /// `finished - started`, for terminal invocations.
    pub elapsed: Option<Duration>,
    /// The failure, when the invocation did not complete cleanly.
    pub err: Option<Error>,
    /// Captured stdout, when output is persisted.
    pub output: Option<OutputBuffer>,
    /// Captured stderr, when output is persisted.
    pub error_output: Option<OutputBuffer>,
}

impl JobInvocation {
    /// Create a running invocation for `job_name` started at `started`.
    /// Output buffers are allocated when `writable`.
    pub fn new(job_name: impl Into<String>, started: DateTime<Utc>, writable: bool) -> Self {
        let buffer = || -> OutputBuffer { Arc::new(Mutex::new(Vec::new())) };
        Self {
            id: new_invocation_id(),
            job_name: job_name.into(),
            status: JobInvocationStatus::Running,
            started,
            finished: None,
            cancelled: None,
            timeout: None,
            elapsed: None,
            err: None,
            output: writable.then(buffer),
            error_output: writable.then(buffer),
        }
    }

    /// The captured stdout bytes, if output was persisted.
    pub fn output_bytes(&self) -> Option<Vec<u8>> {
        self.output.as_ref().map(|buffer| buffer.lock().clone())
    }

    /// The captured stderr bytes, if output was persisted.
    pub fn error_output_bytes(&self) -> Option<Vec<u8>> {
        self.error_output.as_ref().map(|buffer| buffer.lock().clone())
    }

    /// Project this record into the external status shape.
    pub fn snapshot(&self) -> InvocationSnapshot {
        InvocationSnapshot {
            id: self.id.clone(),
            job_name: self.job_name.clone(),
            status: self.status,
            started: self.started,
            finished: self.finished,
            elapsed: self.elapsed,
            err: self.err.as_ref().map(|e| e.to_string()),
        }
    }
}

/// The JSON projection of an invocation exposed to management surfaces:
/// `{id, jobName, status, started, finished, elapsed, err}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSnapshot {
    pub id: String,
    pub job_name: String,
    pub status: JobInvocationStatus,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Option<Duration>,
    pub err: Option<String>,
}

// =============================================================================
// Execution Context
// =============================================================================

/// The bounded execution context handed to a job action.
#[derive(Clone)]
pub struct JobContext {
    invocation_id: String,
    job_name: String,
    cancellation: CancellationToken,
    deadline: Option<DateTime<Utc>>,
    clock: SharedClock,
    output: Option<OutputBuffer>,
    error_output: Option<OutputBuffer>,
}

impl JobContext {
    /// Build the context for `invocation`, sharing its output buffers.
    pub(crate) fn new(
        invocation: &JobInvocation,
        cancellation: CancellationToken,
        clock: SharedClock,
    ) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            job_name: invocation.job_name.clone(),
            cancellation,
            deadline: invocation.timeout,
            clock,
            output: invocation.output.clone(),
            error_output: invocation.error_output.clone(),
        }
    }

    /// The invocation this context belongs to.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// The owning job.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The wall-clock deadline, when a timeout applies.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// The cancellation token for this invocation. Actions that spawn their
    /// own tasks should propagate it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested. Actions should race their
    /// work against this.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// The current time, via the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Append to the invocation's captured stdout, if output is persisted.
    pub fn write_output(&self, bytes: &[u8]) {
        if let Some(buffer) = &self.output {
            buffer.lock().extend_from_slice(bytes);
        }
    }

    /// Append to the invocation's captured stderr, if output is persisted.
    pub fn write_error_output(&self, bytes: &[u8]) {
        if let Some(buffer) = &self.error_output {
            buffer.lock().extend_from_slice(bytes);
        }
    }

    /// Whether this invocation persists output.
    pub fn writes_output(&self) -> bool {
        self.output.is_some()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("invocation_id", &self.invocation_id)
            .field("job_name", &self.job_name)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
