//! # Tempo Core
//!
//! A background job scheduling engine: a registry of named jobs, each
//! driven by its own timer loop, executed under bounded contexts with
//! timeouts and cooperative cancellation.
//!
//! ## Architecture
//!
//! - **Clock**: injectable time source so tests can pin or advance time
//! - **Schedule**: pure `next(previous)` functions (cron, interval,
//!   immediately-then, on-demand)
//! - **Latch**: the four-state lifecycle primitive under every runnable
//!   component
//! - **Jobs**: the `Job` trait, per-invocation records and contexts, the
//!   per-job scheduler, the manager registry, and history retention
//! - **Events**: lifecycle event flags fanned out to named listeners
//!   (logging, metrics)
//! - **Config**: runtime settings plus the jobs document contract

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod latch;
pub mod schedule;
pub mod telemetry;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{system_clock, Clock, SharedClock, SystemClock};
    pub use crate::config::{Config, JobConfig};
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        EventBus, EventFlag, EventListener, FnListener, JobEvent, LoggingListener, MetricsListener,
    };
    pub use crate::jobs::{
        FuncJob, HistoryRetention, InvocationSnapshot, Job, JobContext, JobInvocation,
        JobInvocationStatus, JobManager, JobResult, JobScheduler, JobSchedulerStatus,
    };
    pub use crate::latch::{Latch, LatchState};
    pub use crate::schedule::{
        CronSchedule, ImmediatelyThen, IntervalSchedule, OnDemand, Schedule, SharedSchedule,
    };
}
