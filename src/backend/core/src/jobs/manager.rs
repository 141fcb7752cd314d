//! The job registry.
//!
//! A [`JobManager`] owns one [`JobScheduler`] per registered job, fans out
//! start/stop, proxies management operations by name, and snapshots the
//! whole fleet for management surfaces. It adds no scheduling of its own;
//! every scheduler drives its own timer loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;

use super::history::HistoryRetention;
use super::job::Job;
use super::scheduler::{JobScheduler, JobSchedulerStatus};
use crate::clock::{system_clock, SharedClock};
use crate::config::{heartbeat_interval_from_env, Config};
use crate::error::{Error, Result};
use crate::events::EventBus;

/// Registry of named jobs and their schedulers.
pub struct JobManager {
    schedulers: RwLock<HashMap<String, Arc<JobScheduler>>>,
    bus: Arc<EventBus>,
    clock: SharedClock,
    retention: HistoryRetention,
    heartbeat: Duration,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    /// Create an empty manager with default policies.
    pub fn new() -> Self {
        Self {
            schedulers: RwLock::new(HashMap::new()),
            bus: Arc::new(EventBus::new()),
            clock: system_clock(),
            retention: HistoryRetention::default(),
            heartbeat: heartbeat_interval_from_env(),
        }
    }

    /// Create a manager with the retention and heartbeat settings from
    /// `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            schedulers: RwLock::new(HashMap::new()),
            bus: Arc::new(EventBus::new()),
            clock: system_clock(),
            retention: config.history,
            heartbeat: config.heartbeat_interval,
        }
    }

    /// Override the clock handed to schedulers loaded after this call.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the shared event bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// The event bus shared by every scheduler this manager loads.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `job`, creating its scheduler. Fails with
    /// [`Error::JobAlreadyLoaded`] on a duplicate name.
    pub fn load_job(&self, job: impl Job) -> Result<Arc<JobScheduler>> {
        self.load_job_arc(Arc::new(job))
    }

    /// Register an already-shared job.
    pub fn load_job_arc(&self, job: Arc<dyn Job>) -> Result<Arc<JobScheduler>> {
        let name = job.name().to_string();
        if name.is_empty() {
            return Err(Error::job("job name must not be empty"));
        }

        let mut schedulers = self.schedulers.write();
        if schedulers.contains_key(&name) {
            return Err(Error::JobAlreadyLoaded(name));
        }

        let scheduler = Arc::new(
            JobScheduler::from_arc(job)
                .with_clock(self.clock.clone())
                .with_bus(self.bus.clone())
                .with_retention(self.retention)
                .with_heartbeat(self.heartbeat),
        );
        schedulers.insert(name.clone(), scheduler.clone());
        tracing::info!(job = %name, "job loaded");
        Ok(scheduler)
    }

    /// Stop and remove the named job. Fails with [`Error::JobNotFound`]
    /// when absent.
    pub async fn unload_job(&self, name: &str) -> Result<()> {
        let scheduler = self
            .schedulers
            .write()
            .remove(name)
            .ok_or_else(|| Error::JobNotFound(name.to_string()))?;

        match scheduler.stop().await {
            // Never started, or its loop already exited on its own.
            Ok(()) | Err(Error::CannotStop) => {}
            Err(err) => return Err(err),
        }
        tracing::info!(job = %name, "job unloaded");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Launch every scheduler in the background, returning once each has
    /// started.
    pub async fn start(&self) -> Result<()> {
        for scheduler in self.snapshot() {
            scheduler.start_async().await?;
        }
        Ok(())
    }

    /// Fan out shutdown and await every scheduler's stop. In-flight
    /// invocations are not cancelled; call [`cancel_all`](Self::cancel_all)
    /// first for a hard stop.
    pub async fn stop(&self) -> Result<()> {
        let schedulers = self.snapshot();
        let results = join_all(schedulers.iter().map(|s| s.stop())).await;
        for result in results {
            match result {
                // Loops that already exited (on-demand, exhausted schedules)
                // have nothing to stop.
                Ok(()) | Err(Error::CannotStop) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Proxies
    // ─────────────────────────────────────────────────────────────────────────

    /// Force one invocation of the named job now, awaiting its completion.
    pub async fn run_job(&self, name: &str) -> Result<()> {
        self.get(name)?.run().await;
        Ok(())
    }

    /// Cancel the named job's current invocation, if any.
    pub fn cancel_job(&self, name: &str) -> Result<()> {
        self.get(name)?.cancel();
        Ok(())
    }

    /// Cancel every in-flight invocation.
    pub fn cancel_all(&self) {
        for scheduler in self.snapshot() {
            scheduler.cancel();
        }
    }

    /// Enable the named job.
    pub async fn enable_job(&self, name: &str) -> Result<()> {
        self.get(name)?.enable().await;
        Ok(())
    }

    /// Disable the named job.
    pub async fn disable_job(&self, name: &str) -> Result<()> {
        self.get(name)?.disable().await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a scheduler by job name.
    pub fn get_scheduler(&self, name: &str) -> Option<Arc<JobScheduler>> {
        self.schedulers.read().get(name).cloned()
    }

    /// The registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.schedulers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.schedulers.read().len()
    }

    /// Whether no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.schedulers.read().is_empty()
    }

    /// Snapshot every scheduler, sorted by job name.
    pub fn status(&self) -> Vec<JobSchedulerStatus> {
        let mut statuses: Vec<_> = self.snapshot().iter().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn get(&self, name: &str) -> Result<Arc<JobScheduler>> {
        self.get_scheduler(name)
            .ok_or_else(|| Error::JobNotFound(name.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<JobScheduler>> {
        self.schedulers.read().values().cloned().collect()
    }
}

// =============================================================================
// Process-wide default
// =============================================================================

static DEFAULT_MANAGER: RwLock<Option<Arc<JobManager>>> = RwLock::new(None);

/// Install `manager` as the process-wide default.
pub fn set_default(manager: Arc<JobManager>) {
    *DEFAULT_MANAGER.write() = Some(manager);
}

/// The process-wide default manager, if one was installed.
pub fn default_manager() -> Option<Arc<JobManager>> {
    DEFAULT_MANAGER.read().clone()
}

/// Tear down the process-wide default.
pub fn clear_default() {
    *DEFAULT_MANAGER.write() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::FuncJob;
    use crate::jobs::invocation::JobInvocationStatus;
    use crate::schedule::OnDemand;

    fn on_demand_job(name: &str) -> FuncJob {
        FuncJob::new(name, |_ctx| async { Ok(()) }).with_schedule(Arc::new(OnDemand))
    }

    #[tokio::test]
    async fn test_duplicate_load_fails() {
        let manager = JobManager::new();
        manager.load_job(on_demand_job("a")).unwrap();
        assert_eq!(
            manager.load_job(on_demand_job("a")).err(),
            Some(Error::JobAlreadyLoaded("a".into()))
        );
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let manager = JobManager::new();
        assert!(manager.load_job(on_demand_job("")).is_err());
    }

    #[tokio::test]
    async fn test_proxies_fail_on_unknown_job() {
        let manager = JobManager::new();
        assert_eq!(
            manager.run_job("ghost").await.err(),
            Some(Error::JobNotFound("ghost".into()))
        );
        assert_eq!(
            manager.cancel_job("ghost").err(),
            Some(Error::JobNotFound("ghost".into()))
        );
        assert_eq!(
            manager.enable_job("ghost").await.err(),
            Some(Error::JobNotFound("ghost".into()))
        );
        assert_eq!(
            manager.unload_job("ghost").await.err(),
            Some(Error::JobNotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_run_job_records_invocation() {
        let manager = JobManager::new();
        manager.load_job(on_demand_job("work")).unwrap();
        manager.run_job("work").await.unwrap();

        let scheduler = manager.get_scheduler("work").unwrap();
        let history = scheduler.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobInvocationStatus::Complete);
    }

    #[tokio::test]
    async fn test_unload_removes_job() {
        let manager = JobManager::new();
        manager.load_job(on_demand_job("transient")).unwrap();
        manager.unload_job("transient").await.unwrap();
        assert!(manager.is_empty());
        assert!(manager.get_scheduler("transient").is_none());
    }

    #[tokio::test]
    async fn test_status_is_sorted() {
        let manager = JobManager::new();
        manager.load_job(on_demand_job("zeta")).unwrap();
        manager.load_job(on_demand_job("alpha")).unwrap();

        let status = manager.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "alpha");
        assert_eq!(status[1].name, "zeta");
        assert_eq!(manager.job_names(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_default_manager_handle() {
        clear_default();
        assert!(default_manager().is_none());

        let manager = Arc::new(JobManager::new());
        set_default(manager.clone());
        assert!(default_manager().is_some());

        clear_default();
        assert!(default_manager().is_none());
    }
}
