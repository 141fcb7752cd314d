//! The listener registry.
//!
//! Listeners register under a `(flag, name)` pair; the scheduler triggers
//! events outside its critical sections. Delivery is best-effort: a
//! panicking listener is logged and suppressed, never propagated back into
//! the scheduler.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;

use super::event::{EventFlag, JobEvent};

/// Receives lifecycle events.
pub trait EventListener: Send + Sync {
    /// Handle one event. Must not block; long work should be handed off.
    fn handle(&self, event: &JobEvent);
}

/// Adapt a closure into a listener.
pub struct FnListener<F>(pub F);

impl<F> EventListener for FnListener<F>
where
    F: Fn(&JobEvent) + Send + Sync,
{
    fn handle(&self, event: &JobEvent) {
        (self.0)(event)
    }
}

type ListenerMap = HashMap<EventFlag, HashMap<String, Arc<dyn EventListener>>>;

/// Registry of lifecycle-event listeners keyed by `(flag, listener name)`.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<ListenerMap>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `flag` under `name`, replacing any previous
    /// listener with the same key.
    pub fn listen(&self, flag: EventFlag, name: impl Into<String>, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .entry(flag)
            .or_default()
            .insert(name.into(), listener);
    }

    /// Register `listener` for every flag under `name`.
    pub fn listen_all(&self, name: impl Into<String>, listener: Arc<dyn EventListener>) {
        let name = name.into();
        let mut listeners = self.listeners.write();
        for flag in EventFlag::ALL {
            listeners
                .entry(flag)
                .or_default()
                .insert(name.clone(), listener.clone());
        }
    }

    /// Remove the listener registered for `(flag, name)`. Returns whether
    /// one was present.
    pub fn unlisten(&self, flag: EventFlag, name: &str) -> bool {
        self.listeners
            .write()
            .get_mut(&flag)
            .map(|by_name| by_name.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Remove `name`'s listeners from every flag.
    pub fn unlisten_all(&self, name: &str) {
        let mut listeners = self.listeners.write();
        for by_name in listeners.values_mut() {
            by_name.remove(name);
        }
    }

    /// Whether any listener is registered for `flag`.
    pub fn has_listeners(&self, flag: EventFlag) -> bool {
        self.listeners
            .read()
            .get(&flag)
            .map(|by_name| !by_name.is_empty())
            .unwrap_or(false)
    }

    /// Deliver `event` to every listener registered for its flag.
    pub fn trigger(&self, event: &JobEvent) {
        let targets: Vec<(String, Arc<dyn EventListener>)> = {
            let listeners = self.listeners.read();
            match listeners.get(&event.flag) {
                Some(by_name) => by_name
                    .iter()
                    .map(|(name, listener)| (name.clone(), listener.clone()))
                    .collect(),
                None => return,
            }
        };

        for (name, listener) in targets {
            if catch_unwind(AssertUnwindSafe(|| listener.handle(event))).is_err() {
                tracing::warn!(
                    listener = %name,
                    flag = %event.flag,
                    job = %event.job_name,
                    "event listener panicked; suppressed"
                );
            }
        }
    }
}

// =============================================================================
// Built-in Listeners
// =============================================================================

/// Logs every event through `tracing`, level chosen by flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn handle(&self, event: &JobEvent) {
        let invocation = event.invocation_id.as_deref().unwrap_or("-");
        match event.flag {
            EventFlag::Failed | EventFlag::Broken => {
                let err = event
                    .err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                tracing::error!(
                    flag = %event.flag,
                    job = %event.job_name,
                    invocation = %invocation,
                    elapsed = ?event.elapsed,
                    %err,
                    "job event"
                );
            }
            EventFlag::Cancelled => {
                tracing::warn!(
                    flag = %event.flag,
                    job = %event.job_name,
                    invocation = %invocation,
                    elapsed = ?event.elapsed,
                    "job event"
                );
            }
            EventFlag::Heartbeat => {
                tracing::trace!(flag = %event.flag, job = %event.job_name, "job event");
            }
            _ => {
                tracing::info!(
                    flag = %event.flag,
                    job = %event.job_name,
                    invocation = %invocation,
                    elapsed = ?event.elapsed,
                    "job event"
                );
            }
        }
    }
}

/// Counts events per flag and job through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsListener;

impl EventListener for MetricsListener {
    fn handle(&self, event: &JobEvent) {
        counter!(
            "tempo_job_events_total",
            "flag" => event.flag.as_str(),
            "job" => event.job_name.clone(),
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn recording() -> (Arc<Mutex<Vec<EventFlag>>>, Arc<dyn EventListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = seen.clone();
            Arc::new(FnListener(move |event: &JobEvent| {
                seen.lock().push(event.flag)
            })) as Arc<dyn EventListener>
        };
        (seen, listener)
    }

    #[test]
    fn test_trigger_routes_by_flag() {
        let bus = EventBus::new();
        let (seen, listener) = recording();
        bus.listen(EventFlag::Complete, "test", listener);

        bus.trigger(&JobEvent::new(EventFlag::Complete, "a", Utc::now()));
        bus.trigger(&JobEvent::new(EventFlag::Failed, "a", Utc::now()));

        assert_eq!(&*seen.lock(), &[EventFlag::Complete]);
    }

    #[test]
    fn test_listen_all_and_unlisten() {
        let bus = EventBus::new();
        let (seen, listener) = recording();
        bus.listen_all("test", listener);
        assert!(bus.has_listeners(EventFlag::Heartbeat));

        bus.trigger(&JobEvent::new(EventFlag::Started, "a", Utc::now()));
        assert!(bus.unlisten(EventFlag::Started, "test"));
        bus.trigger(&JobEvent::new(EventFlag::Started, "a", Utc::now()));

        assert_eq!(&*seen.lock(), &[EventFlag::Started]);

        bus.unlisten_all("test");
        assert!(!bus.has_listeners(EventFlag::Complete));
    }

    #[test]
    fn test_panicking_listener_is_suppressed() {
        let bus = EventBus::new();
        bus.listen(
            EventFlag::Started,
            "bad",
            Arc::new(FnListener(|_: &JobEvent| panic!("listener bug"))),
        );
        let (seen, listener) = recording();
        bus.listen(EventFlag::Started, "good", listener);

        bus.trigger(&JobEvent::new(EventFlag::Started, "a", Utc::now()));
        assert_eq!(&*seen.lock(), &[EventFlag::Started]);
    }
}
