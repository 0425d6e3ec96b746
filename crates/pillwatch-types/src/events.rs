use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    geometry::{CellId, Rectangle},
    status::CellStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// User-facing alert. Display and expiry are the sink's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub display_ms: u64,
}

impl Notification {
    pub fn new(message: impl Into<String>, severity: Severity, display_ms: u64) -> Self {
        Self {
            message: message.into(),
            severity,
            display_ms,
        }
    }
}

/// High-level event kinds moving through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    CellTransition,
    Notification,
}

/// Immutable event envelope for logging and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Cell(CellTransitionEvent),
    Notification(Notification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: LifecyclePhase,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecyclePhase {
    RegionSet,
    RegionCleared,
    BaselinesReplaced,
    BaselinesCleared,
    MonitoringStarted,
    MonitoringStopped,
    SourceLost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellTransitionEvent {
    pub cell: CellId,
    pub label: String,
    pub from: CellStatus,
    pub to: CellStatus,
    pub diff: Option<f64>,
}

impl SystemEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(phase: LifecyclePhase, details: impl Into<Option<String>>) -> Self {
        Self::new(
            EventKind::Lifecycle,
            EventPayload::Lifecycle(LifecycleEvent {
                phase,
                details: details.into(),
            }),
        )
    }

    pub fn region_set(region: &Rectangle, cells: usize) -> Self {
        Self::lifecycle(
            LifecyclePhase::RegionSet,
            format!("master region {region} split into {cells} cells"),
        )
    }

    pub fn cell_transition(event: CellTransitionEvent) -> Self {
        Self::new(EventKind::CellTransition, EventPayload::Cell(event))
    }

    pub fn notification(notification: Notification) -> Self {
        Self::new(
            EventKind::Notification,
            EventPayload::Notification(notification),
        )
    }
}
