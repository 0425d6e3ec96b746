//! Notification sinks and the in-process event bus.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use pillwatch_types::{
    events::{EventPayload, Notification, Severity, SystemEvent},
    PillwatchError, Result,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

/// Receives user-facing alerts. The core decides when and what; the sink decides how.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

#[async_trait]
impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    async fn notify(&self, notification: Notification) -> Result<()> {
        (**self).notify(notification).await
    }
}

/// In-process bus backed by a broadcast channel. Notifications are published as events.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing without subscribers is not an error.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Only the notification payloads of [`subscribe`](Self::subscribe).
    pub fn notifications(&self) -> BoxStream<'static, Notification> {
        self.subscribe()
            .filter_map(|event| async move {
                match event.payload {
                    EventPayload::Notification(notification) => Some(notification),
                    _ => None,
                }
            })
            .boxed()
    }
}

#[async_trait]
impl NotificationSink for LocalBus {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.publish(SystemEvent::notification(notification));
        Ok(())
    }
}

/// Writes notifications to the log; used when nothing renders them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        match notification.severity {
            Severity::Error => error!("{}", notification.message),
            Severity::Warning => warn!("{}", notification.message),
            Severity::Info | Severity::Success => info!("{}", notification.message),
        }
        Ok(())
    }
}

/// Keeps every notification in memory, mostly for tests and headless replay.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.received.lock() {
            guard.clear();
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.received
            .lock()
            .map_err(|_| notify_error("failed to lock notification log"))?
            .push(notification);
        Ok(())
    }
}

pub fn notify_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Notify(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_notifications_to_subscribers() {
        let bus = LocalBus::new(8);
        let mut stream = bus.notifications();

        bus.publish(SystemEvent::lifecycle(
            pillwatch_types::events::LifecyclePhase::MonitoringStarted,
            String::from("ignored by notification stream"),
        ));
        bus.notify(Notification::new("Monday Morning changed", Severity::Info, 5_000))
            .await
            .expect("notify");

        let received = stream.next().await.expect("notification");
        assert_eq!(received.message, "Monday Morning changed");
        assert_eq!(received.severity, Severity::Info);
    }

    #[tokio::test]
    async fn tracing_sink_accepts_every_severity() {
        let sink: Arc<dyn NotificationSink> = Arc::new(TracingSink);
        for severity in [Severity::Info, Severity::Success, Severity::Warning, Severity::Error] {
            sink.notify(Notification::new("Friday Noon changed", severity, 1))
                .await
                .expect("notify");
        }
    }

    #[tokio::test]
    async fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let shared: Arc<dyn NotificationSink> = Arc::new(sink.clone());
        shared
            .notify(Notification::new("first", Severity::Info, 1))
            .await
            .expect("notify");
        shared
            .notify(Notification::new("second", Severity::Error, 1))
            .await
            .expect("notify");
        let messages: Vec<String> = sink.received().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
