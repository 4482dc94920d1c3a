//! Sync events published to UI hosts

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::Conflict;

const DEFAULT_CAPACITY: usize = 256;

/// Machine-readable sync notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// One mutation finished replaying
    #[serde(rename = "sync-progress")]
    Progress {
        completed: usize,
        total: usize,
        label: String,
    },
    /// A drain pass finished
    #[serde(rename = "sync-complete")]
    Complete { success: usize, failed: usize },
    /// A drain pass could not run to completion
    #[serde(rename = "sync-error")]
    Error { error: String },
    /// A conflict needs the user
    #[serde(rename = "data-conflict")]
    Conflict { conflict: Box<Conflict>, message: String },
}

impl SyncEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "sync-progress",
            Self::Complete { .. } => "sync-complete",
            Self::Error { .. } => "sync-error",
            Self::Conflict { .. } => "data-conflict",
        }
    }
}

/// Publish/subscribe channel owned by the orchestrator
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for {name}");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
