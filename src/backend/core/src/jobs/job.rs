//! Job definitions.
//!
//! This module provides the core abstractions for defining scheduled jobs:
//!
//! - **Job trait**: identity, the action, and optional capability providers
//!   expressed as default trait methods
//! - **Lifecycle hooks**: optional callbacks invoked at invocation
//!   transitions, no-ops by default
//! - **FuncJob**: a builder-constructed job wrapping an async closure

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::invocation::JobContext;
use crate::error::Result;
use crate::schedule::SharedSchedule;

// ═══════════════════════════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════════════════════════

/// Jobs are runnable unless they opt out.
pub const DEFAULT_ENABLED: bool = true;
/// Overlapping invocations are allowed unless a job opts into serial mode.
pub const DEFAULT_SERIAL: bool = false;
/// Lifecycle events reach listeners unless a job opts out.
pub const DEFAULT_SHOULD_TRIGGER_LISTENERS: bool = true;
/// Invocation output is captured unless a job opts out.
pub const DEFAULT_SHOULD_WRITE_OUTPUT: bool = true;

/// Result type for job executions.
pub type JobResult = Result<()>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A named unit of work plus its policies.
///
/// Only `name` and `execute` are required. The remaining methods are
/// capability providers and lifecycle hooks with sensible defaults;
/// `description` and `schedule` are queried once at registration, the
/// policy providers (`enabled`, `serial`, `timeout`, listener/output
/// gating) are consulted live.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The unique name of this job within a manager.
    fn name(&self) -> &str;

    /// Execute one invocation.
    ///
    /// The context carries the invocation's cancellation token and deadline;
    /// long-running actions should race their work against
    /// [`JobContext::cancelled`]. Returning an error marks the invocation
    /// failed and carries the error verbatim on the record.
    async fn execute(&self, ctx: &JobContext) -> JobResult;

    /// Human-readable description, shown in status snapshots.
    fn description(&self) -> Option<String> {
        None
    }

    /// When this job should fire. `None` means on-demand only: the timer
    /// loop exits immediately but the job stays runnable via `run`.
    fn schedule(&self) -> Option<SharedSchedule> {
        None
    }

    /// Per-invocation timeout. `None` (or zero) means none; exceeding the
    /// deadline surfaces as cancellation.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the job may run at all. Consulted on every fire.
    fn enabled(&self) -> bool {
        DEFAULT_ENABLED
    }

    /// Whether at most one invocation may run at a time. When true, a fire
    /// arriving while one is in flight is dropped silently.
    fn serial(&self) -> bool {
        DEFAULT_SERIAL
    }

    /// Whether lifecycle events for this job reach listeners.
    fn should_trigger_listeners(&self) -> bool {
        DEFAULT_SHOULD_TRIGGER_LISTENERS
    }

    /// Whether invocation output is captured on the record.
    fn should_write_output(&self) -> bool {
        DEFAULT_SHOULD_WRITE_OUTPUT
    }

    /// Called when an invocation starts.
    async fn on_start(&self, _ctx: &JobContext) {}

    /// Called when an invocation completes without error.
    async fn on_complete(&self, _ctx: &JobContext) {}

    /// Called when an invocation fails.
    async fn on_failure(&self, _ctx: &JobContext) {}

    /// Called when an invocation is cancelled.
    async fn on_cancellation(&self, _ctx: &JobContext) {}

    /// Called when a failure follows a success.
    async fn on_broken(&self, _ctx: &JobContext) {}

    /// Called when a success follows a failure.
    async fn on_fixed(&self, _ctx: &JobContext) {}

    /// Called when an operator enables the job.
    async fn on_enabled(&self) {}

    /// Called when an operator disables the job.
    async fn on_disabled(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// FuncJob
// ═══════════════════════════════════════════════════════════════════════════════

type JobAction = Arc<dyn Fn(JobContext) -> BoxFuture<'static, JobResult> + Send + Sync>;

/// A job built from a name and an async closure.
///
/// ```rust,ignore
/// let job = FuncJob::new("heartbeat", |_ctx| async { Ok(()) })
///     .with_schedule(schedule::parse("@every 30s")?)
///     .with_timeout(Duration::from_secs(10));
/// manager.load_job(job)?;
/// ```
pub struct FuncJob {
    name: String,
    description: Option<String>,
    schedule: Option<SharedSchedule>,
    timeout: Option<Duration>,
    enabled: bool,
    serial: bool,
    trigger_listeners: bool,
    write_output: bool,
    action: JobAction,
}

impl FuncJob {
    /// Create a job running `action` on each invocation.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = JobResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            schedule: None,
            timeout: None,
            enabled: DEFAULT_ENABLED,
            serial: DEFAULT_SERIAL,
            trigger_listeners: DEFAULT_SHOULD_TRIGGER_LISTENERS,
            write_output: DEFAULT_SHOULD_WRITE_OUTPUT,
            action: Arc::new(move |ctx| Box::pin(action(ctx))),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the schedule.
    pub fn with_schedule(mut self, schedule: SharedSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set whether the job is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set serial mode.
    pub fn with_serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    /// Suppress lifecycle events for this job.
    pub fn without_listeners(mut self) -> Self {
        self.trigger_listeners = false;
        self
    }

    /// Discard invocation output instead of capturing it.
    pub fn discard_output(mut self) -> Self {
        self.write_output = false;
        self
    }
}

#[async_trait]
impl Job for FuncJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        (self.action)(ctx.clone()).await
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn schedule(&self) -> Option<SharedSchedule> {
        self.schedule.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn serial(&self) -> bool {
        self.serial
    }

    fn should_trigger_listeners(&self) -> bool {
        self.trigger_listeners
    }

    fn should_write_output(&self) -> bool {
        self.write_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::jobs::invocation::JobInvocation;
    use crate::schedule::{IntervalSchedule, Schedule};
    use tokio_util::sync::CancellationToken;

    fn test_context(name: &str) -> JobContext {
        let invocation = JobInvocation::new(name, chrono::Utc::now(), false);
        JobContext::new(&invocation, CancellationToken::new(), system_clock())
    }

    #[tokio::test]
    async fn test_func_job_executes_action() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let job = {
            let counter = counter.clone();
            FuncJob::new("count", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        job.execute(&test_context("count")).await.unwrap();
        job.execute(&test_context("count")).await.unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_func_job_defaults() {
        let job = FuncJob::new("plain", |_ctx| async { Ok(()) });
        assert_eq!(job.name(), "plain");
        assert!(job.enabled());
        assert!(!job.serial());
        assert!(job.should_trigger_listeners());
        assert!(job.should_write_output());
        assert!(job.schedule().is_none());
        assert!(job.timeout().is_none());
    }

    #[tokio::test]
    async fn test_func_job_builder() {
        let schedule: SharedSchedule =
            Arc::new(IntervalSchedule::new(Duration::from_secs(60)));
        let job = FuncJob::new("tuned", |_ctx| async { Ok(()) })
            .with_description("a tuned job")
            .with_schedule(schedule)
            .with_timeout(Duration::from_secs(5))
            .with_serial(true)
            .with_enabled(false)
            .discard_output();

        assert_eq!(job.description().as_deref(), Some("a tuned job"));
        assert!(job.schedule().unwrap().next(None).is_some());
        assert_eq!(job.timeout(), Some(Duration::from_secs(5)));
        assert!(job.serial());
        assert!(!job.enabled());
        assert!(!job.should_write_output());
    }
}
