//! Operational helpers: logging, event history, settings persistence.

use std::{collections::VecDeque, sync::Arc};

use pillwatch_types::{config::OpsConfig, events::SystemEvent, PillwatchError, Result};
use tokio::sync::Mutex;
use tracing::trace;
use tracing_subscriber::{fmt, EnvFilter};

pub mod settings;

pub use settings::{MemorySettingsStore, SettingsStore, StoredBaseline};

pub const DEFAULT_EVENT_CAPACITY: usize = 512;

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Bounded in-memory history of session events; the oldest entries are dropped first.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<VecDeque<SystemEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record_event(&self, event: SystemEvent) {
        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        trace!(kind = ?event.kind, "event recorded");
        events.push_back(event);
    }

    pub async fn record_all(&self, batch: impl IntoIterator<Item = SystemEvent>) {
        for event in batch {
            self.record_event(event).await;
        }
    }

    pub async fn snapshot_events(&self) -> Vec<SystemEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

pub fn ops_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Ops(message.into())
}

#[cfg(test)]
mod tests {
    use pillwatch_types::events::{EventKind, LifecyclePhase};

    use super::*;

    #[tokio::test]
    async fn event_log_drops_oldest_when_full() {
        let log = EventLog::with_capacity(2);
        log.record_event(SystemEvent::lifecycle(
            LifecyclePhase::RegionSet,
            String::from("one"),
        ))
        .await;
        log.record_event(SystemEvent::lifecycle(
            LifecyclePhase::BaselinesReplaced,
            String::from("two"),
        ))
        .await;
        log.record_event(SystemEvent::lifecycle(
            LifecyclePhase::MonitoringStarted,
            String::from("three"),
        ))
        .await;

        let events = log.snapshot_events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == EventKind::Lifecycle));
        match &events[0].payload {
            pillwatch_types::events::EventPayload::Lifecycle(lifecycle) => {
                assert_eq!(lifecycle.phase, LifecyclePhase::BaselinesReplaced)
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
