//! Live progress fan-out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{DeploymentId, Progress};

/// Events buffered per subscriber before it starts skipping
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    StepStarted,
    Progress,
    ItemFailed,
    Warning,
    Completed,
    Failed,
    RollbackStarted,
    RolledBack,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::StepStarted => "step_started",
            EventKind::Progress => "progress",
            EventKind::ItemFailed => "item_failed",
            EventKind::Warning => "warning",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::RollbackStarted => "rollback_started",
            EventKind::RolledBack => "rolled_back",
        }
    }
}

/// Snapshot of a deployment at the moment something happened.
///
/// Carries the full progress so that a consumer that missed or replayed
/// events still ends up with the right state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub deployment_id: DeploymentId,
    pub kind: EventKind,
    pub progress: Progress,
    pub percentage: u8,
    #[serde(default)]
    pub detail: Option<String>,
    /// No further events follow for the deployment
    #[serde(default)]
    pub is_final: bool,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        deployment_id: DeploymentId,
        kind: EventKind,
        progress: &Progress,
        detail: Option<String>,
    ) -> Self {
        Self {
            deployment_id,
            kind,
            progress: progress.clone(),
            percentage: progress.percentage(),
            detail,
            is_final: false,
            at: Utc::now(),
        }
    }

    /// Mark this as the last event of the deployment
    pub fn finished(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Broadcasts progress events to any number of observers
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event; having no observers is fine
    pub fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            trace!("no progress subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
