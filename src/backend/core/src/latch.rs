//! Lifecycle latch underlying every runnable component.
//!
//! A [`Latch`] moves through idle → starting → started → stopping → stopped
//! and can be reset back to idle for reuse. Guarded transitions fail with
//! [`Error::CannotStart`] / [`Error::CannotStop`] so double-start and
//! double-stop are impossible; waiters resolve once the lifecycle has
//! reached *or passed* the awaited state, so a transient `started` that is
//! immediately replaced by `stopped` still releases `wait_started`.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// The states a latch moves through, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LatchState {
    /// Not yet started, or reset after a full cycle.
    Idle,
    /// A start was requested; the component is coming up.
    Starting,
    /// The component's main loop is running.
    Started,
    /// A stop was requested; the component is winding down.
    Stopping,
    /// The component's main loop has exited.
    Stopped,
}

/// A reusable lifecycle state machine with wait/notify signals.
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<LatchState>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// Create a latch in the idle state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LatchState::Idle);
        Self { tx }
    }

    /// The current state.
    pub fn state(&self) -> LatchState {
        *self.tx.borrow()
    }

    /// Whether a start is currently legal.
    pub fn can_start(&self) -> bool {
        matches!(self.state(), LatchState::Idle | LatchState::Stopped)
    }

    /// Whether a stop is currently legal.
    pub fn can_stop(&self) -> bool {
        matches!(self.state(), LatchState::Starting | LatchState::Started)
    }

    /// Whether the component is starting or started.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), LatchState::Starting | LatchState::Started)
    }

    /// Whether the component has fully stopped.
    pub fn is_stopped(&self) -> bool {
        self.state() == LatchState::Stopped
    }

    /// Transition to `starting`. Fails unless the latch is idle or stopped.
    pub fn starting(&self) -> Result<()> {
        self.guarded_transition(LatchState::Starting, Error::CannotStart, |state| {
            matches!(state, LatchState::Idle | LatchState::Stopped)
        })
    }

    /// Transition to `started`.
    pub fn started(&self) {
        self.tx.send_replace(LatchState::Started);
    }

    /// Transition to `stopping`. Fails unless the latch is running.
    pub fn stopping(&self) -> Result<()> {
        self.guarded_transition(LatchState::Stopping, Error::CannotStop, |state| {
            matches!(state, LatchState::Starting | LatchState::Started)
        })
    }

    /// Transition to `stopped`.
    pub fn stopped(&self) {
        self.tx.send_replace(LatchState::Stopped);
    }

    /// Return a stopped latch to idle so the component can start again.
    pub fn reset(&self) {
        self.tx.send_replace(LatchState::Idle);
    }

    /// Resolves once the latch has reached or passed `started`.
    pub async fn wait_started(&self) {
        self.wait_at_least(LatchState::Started).await;
    }

    /// Resolves once the latch has reached or passed `stopping`.
    pub async fn wait_stopping(&self) {
        self.wait_at_least(LatchState::Stopping).await;
    }

    /// Resolves once the latch has reached `stopped`.
    pub async fn wait_stopped(&self) {
        self.wait_at_least(LatchState::Stopped).await;
    }

    async fn wait_at_least(&self, target: LatchState) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close under us;
        // a closed-channel error would only mean the latch was dropped.
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    fn guarded_transition(
        &self,
        to: LatchState,
        guard_error: Error,
        allowed: impl Fn(LatchState) -> bool,
    ) -> Result<()> {
        let mut ok = false;
        self.tx.send_if_modified(|state| {
            if allowed(*state) {
                *state = to;
                ok = true;
                true
            } else {
                false
            }
        });
        if ok {
            Ok(())
        } else {
            Err(guard_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let latch = Latch::new();
        assert_eq!(latch.state(), LatchState::Idle);
        assert!(latch.can_start());
        assert!(!latch.can_stop());

        latch.starting().unwrap();
        assert!(latch.is_running());

        latch.started();
        assert_eq!(latch.state(), LatchState::Started);
        assert!(latch.can_stop());

        latch.stopping().unwrap();
        latch.stopped();
        assert!(latch.is_stopped());
        assert!(latch.can_start());

        latch.reset();
        assert_eq!(latch.state(), LatchState::Idle);
    }

    #[test]
    fn test_double_start_fails() {
        let latch = Latch::new();
        latch.starting().unwrap();
        assert_eq!(latch.starting(), Err(Error::CannotStart));

        latch.started();
        assert_eq!(latch.starting(), Err(Error::CannotStart));
    }

    #[test]
    fn test_double_stop_fails() {
        let latch = Latch::new();
        assert_eq!(latch.stopping(), Err(Error::CannotStop));

        latch.starting().unwrap();
        latch.started();
        latch.stopping().unwrap();
        assert_eq!(latch.stopping(), Err(Error::CannotStop));

        latch.stopped();
        assert_eq!(latch.stopping(), Err(Error::CannotStop));
    }

    #[tokio::test]
    async fn test_wait_started_observes_transient_state() {
        let latch = std::sync::Arc::new(Latch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait_started().await })
        };

        latch.starting().unwrap();
        // Race straight through started to stopped; the waiter must still
        // be released because stopped is past started.
        latch.started();
        latch.stopped();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_started should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_stopped() {
        let latch = std::sync::Arc::new(Latch::new());
        latch.starting().unwrap();
        latch.started();

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait_stopped().await })
        };

        latch.stopping().unwrap();
        latch.stopped();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_stopped should resolve")
            .unwrap();
    }
}
