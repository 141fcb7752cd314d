//! The per-job driver.
//!
//! A [`JobScheduler`] owns one job: its schedule, lifecycle latch, the
//! currently running invocation (if any), the most recently finished one,
//! and the bounded history. The timer loop arms a deadline for the next
//! fire, spawns a worker per invocation, enforces the job's policies
//! (enable/disable, serial, timeout, cancellation), and publishes lifecycle
//! events through the [`EventBus`].
//!
//! Locking: one mutex guards the mutable tuple
//! `(disabled, next_runtime, current, last, history)`. The mutex is never
//! held across listener, hook, or action calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::history::HistoryRetention;
use super::invocation::{InvocationSnapshot, JobContext, JobInvocation, JobInvocationStatus};
use super::job::Job;
use crate::clock::{system_clock, SharedClock};
use crate::config::DEFAULT_HEARTBEAT_INTERVAL;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventFlag, JobEvent};
use crate::latch::Latch;
use crate::schedule::SharedSchedule;

/// An invocation in flight: its running record plus the cancel handle.
struct RunningInvocation {
    invocation: JobInvocation,
    token: CancellationToken,
}

/// The mutable state guarded by the scheduler's mutex.
#[derive(Default)]
struct SchedulerState {
    disabled: bool,
    next_runtime: Option<DateTime<Utc>>,
    current: Option<RunningInvocation>,
    last: Option<JobInvocation>,
    history: Vec<JobInvocation>,
}

/// Drives a single registered job.
pub struct JobScheduler {
    name: String,
    description: Option<String>,
    job: Arc<dyn Job>,
    schedule: Option<SharedSchedule>,
    latch: Latch,
    clock: SharedClock,
    bus: Arc<EventBus>,
    retention: HistoryRetention,
    heartbeat: Duration,
    state: Mutex<SchedulerState>,
    inflight: watch::Sender<usize>,
}

impl JobScheduler {
    /// Create a scheduler for `job`. The description and schedule are
    /// resolved once here and cached.
    pub fn new(job: impl Job) -> Self {
        Self::from_arc(Arc::new(job))
    }

    /// Create a scheduler from an already-shared job.
    pub fn from_arc(job: Arc<dyn Job>) -> Self {
        let name = job.name().to_string();
        let description = job.description();
        let schedule = job.schedule();
        Self {
            name,
            description,
            job,
            schedule,
            latch: Latch::new(),
            clock: system_clock(),
            bus: Arc::new(EventBus::new()),
            retention: HistoryRetention::default(),
            heartbeat: DEFAULT_HEARTBEAT_INTERVAL,
            state: Mutex::new(SchedulerState::default()),
            inflight: watch::channel(0).0,
        }
    }

    /// Override the clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share an event bus with other schedulers.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Override the history retention bounds.
    pub fn with_retention(mut self, retention: HistoryRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Override the timer wakeup granularity.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// The job's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The job's description, if it provided one.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The lifecycle latch.
    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// The event bus this scheduler publishes to.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the timer loop on the calling task. Blocks until the schedule is
    /// exhausted or [`stop`](Self::stop) is called. Fails with
    /// [`Error::CannotStart`] if the scheduler is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.latch.starting()?;
        Arc::clone(self).run_loop().await;
        Ok(())
    }

    /// Launch the timer loop on a background worker; returns once the loop
    /// has started.
    pub async fn start_async(self: &Arc<Self>) -> Result<()> {
        self.latch.starting()?;
        tokio::spawn(Arc::clone(self).run_loop());
        self.latch.wait_started().await;
        Ok(())
    }

    /// Request shutdown of the timer loop and block until the loop has
    /// exited and any in-flight invocation has finished its lifecycle
    /// handling. Does not cancel in-flight invocations; call
    /// [`cancel`](Self::cancel) first for a hard stop.
    pub async fn stop(&self) -> Result<()> {
        self.latch.stopping()?;
        self.latch.wait_stopped().await;
        let mut inflight = self.inflight.subscribe();
        // The sender lives in self, so the channel cannot close under us.
        let _ = inflight.wait_for(|count| *count == 0).await;
        Ok(())
    }

    /// Clear the operator-disabled flag. Emits `enabled` and invokes the
    /// job's `on_enabled` hook on an actual transition.
    pub async fn enable(&self) {
        let was_disabled = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.disabled, false)
        };
        if was_disabled {
            self.emit(
                JobEvent::new(EventFlag::Enabled, &self.name, self.clock.now())
                    .writable(self.job.should_write_output()),
            );
            self.run_hook(self.job.on_enabled()).await;
        }
    }

    /// Set the operator-disabled flag, suppressing all fires until
    /// [`enable`](Self::enable). Emits `disabled` and invokes the job's
    /// `on_disabled` hook on an actual transition.
    pub async fn disable(&self) {
        let was_disabled = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.disabled, true)
        };
        if !was_disabled {
            self.emit(
                JobEvent::new(EventFlag::Disabled, &self.name, self.clock.now())
                    .writable(self.job.should_write_output()),
            );
            self.run_hook(self.job.on_disabled()).await;
        }
    }

    /// Cancel the current invocation's execution context, if one is in
    /// flight. Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        let token = {
            let state = self.state.lock();
            state.current.as_ref().map(|running| running.token.clone())
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Force one invocation now, subject to the admission policy. Returns
    /// silently when the job is disabled, not enabled, or serial with an
    /// invocation already in flight. Blocks until the invocation has
    /// finished its lifecycle handling.
    pub async fn run(&self) {
        if !self.job.enabled() {
            return;
        }
        let serial = self.job.serial();
        let writable = self.job.should_write_output();
        let timeout = self.job.timeout().filter(|t| !t.is_zero());

        let started = self.clock.now();
        let mut invocation = JobInvocation::new(&self.name, started, writable);
        if let Some(timeout) = timeout {
            if let Ok(step) = chrono::Duration::from_std(timeout) {
                invocation.timeout = Some(started + step);
            }
        }
        let token = CancellationToken::new();

        // Admission and publication are one atomic step so a concurrent
        // serial fire cannot slip in between.
        {
            let mut state = self.state.lock();
            if state.disabled {
                return;
            }
            if serial && state.current.is_some() {
                return;
            }
            state.current = Some(RunningInvocation {
                invocation: invocation.clone(),
                token: token.clone(),
            });
        }
        self.inflight.send_modify(|count| *count += 1);

        let ctx = JobContext::new(&invocation, token.clone(), self.clock.clone());

        self.emit(
            JobEvent::new(EventFlag::Started, &self.name, started)
                .with_invocation(&invocation.id)
                .writable(writable),
        );
        self.run_hook(self.job.on_start(&ctx)).await;

        // Race the action against its cancellation token and deadline.
        // The action runs on its own task so a panic is caught at the
        // join boundary and becomes a failure.
        let action_job = Arc::clone(&self.job);
        let action_ctx = ctx.clone();
        let mut action = tokio::spawn(async move { action_job.execute(&action_ctx).await });

        let deadline_elapsed = async {
            match timeout {
                Some(timeout) => self.clock.sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let err = tokio::select! {
            result = &mut action => match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(join_err) if join_err.is_panic() => Some(Error::Panic(panic_message(join_err))),
                Err(_) => Some(Error::JobCancelled),
            },
            _ = token.cancelled() => Some(Error::JobCancelled),
            _ = deadline_elapsed => Some(Error::JobCancelled),
        };

        if matches!(err, Some(Error::JobCancelled)) {
            // Nudge cooperative actions that have not observed the deadline;
            // the detached task exits once it polls the token.
            token.cancel();
        }

        self.finalize(invocation, ctx, err).await;
    }

    /// Spawn [`run`](Self::run) on a background worker. Used by the timer
    /// loop and by managers forcing a fire without waiting on it.
    pub fn run_detached(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the operator has disabled this job.
    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    /// The next scheduled fire time, if the timer loop is armed.
    pub fn next_runtime(&self) -> Option<DateTime<Utc>> {
        self.state.lock().next_runtime
    }

    /// The invocation currently in flight, if any.
    pub fn current(&self) -> Option<JobInvocation> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|running| running.invocation.clone())
    }

    /// The most recently finished invocation, if any.
    pub fn last(&self) -> Option<JobInvocation> {
        self.state.lock().last.clone()
    }

    /// The retained history, oldest first.
    pub fn history(&self) -> Vec<JobInvocation> {
        self.state.lock().history.clone()
    }

    /// Find a finished invocation by id.
    pub fn get_invocation_by_id(&self, id: &str) -> Option<JobInvocation> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .find(|invocation| invocation.id == id)
            .cloned()
    }

    /// Snapshot this scheduler for management surfaces.
    pub fn status(&self) -> JobSchedulerStatus {
        let state = self.state.lock();
        JobSchedulerStatus {
            name: self.name.clone(),
            description: self.description.clone(),
            disabled: state.disabled,
            next_runtime: state.next_runtime,
            current: state
                .current
                .as_ref()
                .map(|running| running.invocation.snapshot()),
            last: state.last.as_ref().map(JobInvocation::snapshot),
            history: state.history.iter().map(JobInvocation::snapshot).collect(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Timer Loop
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_loop(self: Arc<Self>) {
        use futures::FutureExt;

        // The drive loop calls user-supplied schedules and clocks; a panic
        // there must still land the latch in stopped so waiters are
        // released.
        let this = Arc::clone(&self);
        if std::panic::AssertUnwindSafe(this.drive())
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!(job = %self.name, "timer loop panicked; scheduler stopped");
        }
        self.latch.stopped();
    }

    async fn drive(self: Arc<Self>) {
        let seed = self.schedule.as_ref().and_then(|s| s.next(None));
        self.state.lock().next_runtime = seed;
        self.latch.started();

        let Some(mut next) = seed else {
            // On-demand job: no timer to drive, but `run` still works.
            return;
        };

        tracing::debug!(job = %self.name, next = %next, "timer loop armed");

        loop {
            let now = self.clock.now();
            if now < next {
                let until_due = (next - now).to_std().unwrap_or(Duration::ZERO);
                let wait = until_due.min(self.heartbeat);
                tokio::select! {
                    _ = self.clock.sleep(wait) => {}
                    _ = self.latch.wait_stopping() => break,
                }
                if self.clock.now() < next {
                    self.emit(
                        JobEvent::new(EventFlag::Heartbeat, &self.name, self.clock.now())
                            .writable(self.job.should_write_output()),
                    );
                    continue;
                }
            }

            self.run_detached();

            match self.schedule.as_ref().and_then(|s| s.next(Some(next))) {
                Some(following) if following > next => {
                    next = following;
                    self.state.lock().next_runtime = Some(following);
                }
                // An exhausted or regressing schedule terminates the loop.
                _ => {
                    self.state.lock().next_runtime = None;
                    break;
                }
            }
        }

        tracing::debug!(job = %self.name, "timer loop exited");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Finalization
    // ─────────────────────────────────────────────────────────────────────────

    async fn finalize(&self, mut invocation: JobInvocation, ctx: JobContext, err: Option<Error>) {
        let finished = self.clock.now();
        invocation.finished = Some(finished);
        invocation.elapsed = Some(
            (finished - invocation.started)
                .to_std()
                .unwrap_or(Duration::ZERO),
        );
        invocation.err = err.clone();
        invocation.status = match &err {
            None => JobInvocationStatus::Complete,
            Some(e) if e.is_cancellation() => {
                invocation.cancelled = Some(finished);
                JobInvocationStatus::Cancelled
            }
            Some(_) => JobInvocationStatus::Failed,
        };

        // None: no prior invocation; Some(None): last one succeeded;
        // Some(Some(_)): last one failed.
        let previous_err = {
            let state = self.state.lock();
            state.last.as_ref().map(|last| last.err.clone())
        };

        let writable = invocation.output.is_some();
        let elapsed = invocation.elapsed.unwrap_or_default();
        let base_event = |flag: EventFlag| {
            JobEvent::new(flag, &self.name, finished)
                .with_invocation(&invocation.id)
                .with_elapsed(elapsed)
                .writable(writable)
        };

        match invocation.status {
            JobInvocationStatus::Cancelled => {
                self.emit(base_event(EventFlag::Cancelled));
                self.run_hook(self.job.on_cancellation(&ctx)).await;
            }
            JobInvocationStatus::Failed => {
                let failure = err.clone().unwrap_or_else(|| Error::job("unknown failure"));
                tracing::error!(job = %self.name, invocation = %invocation.id, err = %failure, "job failed");
                self.emit(base_event(EventFlag::Failed).with_err(failure));
                self.run_hook(self.job.on_failure(&ctx)).await;
                if matches!(previous_err, Some(None)) {
                    self.emit(base_event(EventFlag::Broken));
                    self.run_hook(self.job.on_broken(&ctx)).await;
                }
            }
            JobInvocationStatus::Complete => {
                self.emit(base_event(EventFlag::Complete));
                self.run_hook(self.job.on_complete(&ctx)).await;
                if matches!(previous_err, Some(Some(_))) {
                    self.emit(base_event(EventFlag::Fixed));
                    self.run_hook(self.job.on_fixed(&ctx)).await;
                }
            }
            JobInvocationStatus::Running => unreachable!("finalize requires a terminal outcome"),
        }

        // The history append happens-after the terminal event; rotation of
        // current/last is one atomic step.
        {
            let mut state = self.state.lock();
            state.history.push(invocation.clone());
            self.retention.apply(&mut state.history, finished);
            // With overlapping invocations the slot tracks the most recent
            // fire; only clear it if it is still ours.
            let still_current = state
                .current
                .as_ref()
                .map(|running| running.invocation.id == invocation.id)
                .unwrap_or(false);
            if still_current {
                state.current = None;
            }
            state.last = Some(invocation);
        }
        self.inflight.send_modify(|count| *count -= 1);
    }

    fn emit(&self, event: JobEvent) {
        if !self.job.should_trigger_listeners() {
            return;
        }
        self.bus.trigger(&event);
    }

    async fn run_hook<F>(&self, hook: F)
    where
        F: Future<Output = ()>,
    {
        use futures::FutureExt;
        if std::panic::AssertUnwindSafe(hook)
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::warn!(job = %self.name, "job lifecycle hook panicked; suppressed");
        }
    }
}

/// Snapshot of one scheduler for management surfaces:
/// `{name, description, disabled, nextRuntime, current, last, history}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSchedulerStatus {
    pub name: String,
    pub description: Option<String>,
    pub disabled: bool,
    pub next_runtime: Option<DateTime<Utc>>,
    pub current: Option<InvocationSnapshot>,
    pub last: Option<InvocationSnapshot>,
    pub history: Vec<InvocationSnapshot>,
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(_) => "unknown panic".to_string(),
    }
}
