//! Wiring that decides when a drain pass runs.
//!
//! Hosts feed connectivity and foreground changes into [`SignalState`];
//! [`SyncTriggers`] turns transitions, a periodic wake and explicit requests
//! into `trigger_sync` calls without ever blocking the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::orchestrator::SyncOrchestrator;

/// Connectivity and foreground state supplied by the host platform
#[derive(Debug, Clone)]
pub struct SignalState {
    online: Arc<watch::Sender<bool>>,
    foreground: Arc<watch::Sender<bool>>,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl SignalState {
    pub fn new(online: bool, foreground: bool) -> Self {
        Self {
            online: Arc::new(watch::channel(online).0),
            foreground: Arc::new(watch::channel(foreground).0),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn is_foreground(&self) -> bool {
        *self.foreground.borrow()
    }

    /// Record a connectivity change; returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.send_replace(online);
        if previous != online {
            tracing::debug!("Connectivity changed: online={online}");
        }
        previous
    }

    /// Record a visibility change; returns the previous value.
    pub fn set_foreground(&self, foreground: bool) -> bool {
        let previous = self.foreground.send_replace(foreground);
        if previous != foreground {
            tracing::debug!("Visibility changed: foreground={foreground}");
        }
        previous
    }

    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn subscribe_foreground(&self) -> watch::Receiver<bool> {
        self.foreground.subscribe()
    }
}

/// Running trigger tasks; dropping the handle stops them.
pub struct SyncTriggers {
    manual: mpsc::UnboundedSender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncTriggers {
    /// Spawn the trigger tasks and the retry driver for `orchestrator`.
    ///
    /// `periodic` is the best-effort background wake interval; `None` disables it.
    pub fn spawn(orchestrator: &SyncOrchestrator, periodic: Option<Duration>) -> Self {
        let (manual, manual_rx) = mpsc::unbounded_channel();
        let mut tasks = vec![
            tokio::spawn(watch_connectivity(orchestrator.clone())),
            tokio::spawn(watch_foreground(orchestrator.clone())),
            tokio::spawn(serve_manual_requests(orchestrator.clone(), manual_rx)),
            orchestrator.spawn_retry_driver(),
        ];
        if let Some(interval) = periodic {
            tasks.push(tokio::spawn(periodic_wake(orchestrator.clone(), interval)));
        }

        tracing::debug!("Started {} sync trigger task(s)", tasks.len());
        Self { manual, tasks }
    }

    /// Ask for a forced drain pass ("sync now"). Returns immediately.
    pub fn request_sync(&self) {
        if self.manual.send(()).is_err() {
            tracing::warn!("Manual sync requested after triggers stopped");
        }
    }

    /// Stop every trigger task. In-flight drain passes run to completion.
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncTriggers {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Run a drain pass on its own task so the trigger loop never waits on it.
fn fire(orchestrator: &SyncOrchestrator, force: bool, reason: &'static str) {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        tracing::debug!("Sync triggered by {reason}");
        if let Err(error) = orchestrator.trigger_sync(force).await {
            tracing::warn!("Sync triggered by {reason} failed: {error}");
        }
    });
}

async fn watch_connectivity(orchestrator: SyncOrchestrator) {
    let mut online = orchestrator.signals().subscribe_online();
    let mut was_online = *online.borrow_and_update();

    while online.changed().await.is_ok() {
        let now_online = *online.borrow_and_update();
        if now_online && !was_online {
            fire(&orchestrator, false, "connectivity");
        }
        was_online = now_online;
    }
}

async fn watch_foreground(orchestrator: SyncOrchestrator) {
    let mut foreground = orchestrator.signals().subscribe_foreground();
    let mut was_foreground = *foreground.borrow_and_update();

    while foreground.changed().await.is_ok() {
        let now_foreground = *foreground.borrow_and_update();
        if now_foreground && !was_foreground && orchestrator.signals().is_online() {
            fire(&orchestrator, false, "foreground");
        }
        was_foreground = now_foreground;
    }
}

async fn serve_manual_requests(
    orchestrator: SyncOrchestrator,
    mut requests: mpsc::UnboundedReceiver<()>,
) {
    while requests.recv().await.is_some() {
        fire(&orchestrator, true, "manual request");
    }
}

async fn periodic_wake(orchestrator: SyncOrchestrator, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if orchestrator.signals().is_online() {
            fire(&orchestrator, false, "periodic wake");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{NewMutation, Record, PRIORITY_NORMAL};
    use crate::remote::InMemoryRemote;
    use crate::services::LocalStore;
    use crate::sync::SyncEvent;

    async fn wait_for_complete(
        rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>,
    ) -> SyncEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches!(event, SyncEvent::Complete { .. }) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn setup(online: bool) -> (SyncOrchestrator, InMemoryRemote) {
        let store = LocalStore::open_in_memory().unwrap();
        let record = Record::new("anniversary").with_field("name", "Mom's Birthday");
        store.put(&record).await.unwrap();
        store
            .enqueue(NewMutation::create(record), PRIORITY_NORMAL)
            .await
            .unwrap();

        let remote = InMemoryRemote::new();
        let orchestrator = SyncOrchestrator::new(
            store,
            Arc::new(remote.clone()),
            EngineConfig::default(),
            SignalState::new(online, true),
        );
        (orchestrator, remote)
    }

    #[test]
    fn signal_state_reports_previous_value() {
        let signals = SignalState::new(false, true);
        assert!(!signals.set_online(true));
        assert!(signals.is_online());
        assert!(signals.set_foreground(false));
        assert!(!signals.is_foreground());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnecting_triggers_a_drain() {
        let (orchestrator, remote) = setup(false).await;
        let mut events = orchestrator.subscribe();
        let triggers = SyncTriggers::spawn(&orchestrator, None);

        orchestrator.signals().set_online(true);
        let event = wait_for_complete(&mut events).await;

        assert_eq!(
            event,
            SyncEvent::Complete {
                success: 1,
                failed: 0
            }
        );
        assert_eq!(remote.records().len(), 1);
        triggers.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foregrounding_while_online_triggers_a_drain() {
        let (orchestrator, remote) = setup(true).await;
        orchestrator.signals().set_foreground(false);
        let mut events = orchestrator.subscribe();
        let triggers = SyncTriggers::spawn(&orchestrator, None);

        orchestrator.signals().set_foreground(true);
        wait_for_complete(&mut events).await;

        assert_eq!(remote.records().len(), 1);
        drop(triggers);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_request_forces_a_drain() {
        let (orchestrator, remote) = setup(true).await;
        let mut events = orchestrator.subscribe();
        let triggers = SyncTriggers::spawn(&orchestrator, None);

        triggers.request_sync();
        wait_for_complete(&mut events).await;

        assert_eq!(remote.records().len(), 1);
        assert_eq!(orchestrator.store().pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_wake_drains_while_online() {
        let (orchestrator, remote) = setup(true).await;
        let mut events = orchestrator.subscribe();
        let _triggers = SyncTriggers::spawn(&orchestrator, Some(Duration::from_millis(50)));

        wait_for_complete(&mut events).await;
        assert_eq!(remote.records().len(), 1);
    }
}
