//! The job scheduling core.
//!
//! This module hosts the scheduling subsystem:
//!
//! - **Job Definitions**: the [`Job`] trait with capability providers and
//!   lifecycle hooks, plus [`FuncJob`] for closure-backed jobs
//! - **Invocations**: per-execution records with ids, timing, outcome, and
//!   captured output, and the [`JobContext`] handed to actions
//! - **Scheduler**: one timer loop per job enforcing enable/disable,
//!   serial, timeout, and cancellation policies
//! - **Manager**: the registry fanning out lifecycle operations and
//!   exposing status snapshots
//! - **History**: bounded retention over per-job invocation history
//!
//! # Usage
//!
//! ```rust,ignore
//! use tempo_core::jobs::{FuncJob, JobManager};
//! use tempo_core::schedule;
//!
//! let manager = JobManager::new();
//! manager.load_job(
//!     FuncJob::new("heartbeat", |_ctx| async { Ok(()) })
//!         .with_schedule(schedule::parse("@every 30s")?),
//! )?;
//! manager.start().await?;
//! ```

pub mod history;
pub mod invocation;
pub mod job;
pub mod manager;
pub mod scheduler;

pub use history::{HistoryRetention, DEFAULT_MAX_AGE, DEFAULT_MAX_COUNT};
pub use invocation::{
    new_invocation_id, InvocationSnapshot, JobContext, JobInvocation, JobInvocationStatus,
    OutputBuffer,
};
pub use job::{
    FuncJob, Job, JobResult, DEFAULT_ENABLED, DEFAULT_SERIAL, DEFAULT_SHOULD_TRIGGER_LISTENERS,
    DEFAULT_SHOULD_WRITE_OUTPUT,
};
pub use manager::{clear_default, default_manager, set_default, JobManager};
pub use scheduler::{JobScheduler, JobSchedulerStatus};
