//! Sync orchestration: drain passes, retries, events and triggers

mod events;
mod orchestrator;
mod retry;
mod triggers;

pub use events::{EventBus, SyncEvent};
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncStatus};
pub use retry::{backoff_delay, Clock, ManualClock, RetryScheduler, SystemClock};
pub use triggers::{SignalState, SyncTriggers};
