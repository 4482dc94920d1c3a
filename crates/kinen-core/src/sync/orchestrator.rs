//! Drains the pending-mutation queue against the remote authority.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::db::{QueueEntry, UnreadableMutation};
use crate::models::{
    ConflictStatus, MutationAction, MutationId, MutationPayload, PendingMutation, Record,
    RecordId, SyncOutcome,
};
use crate::remote::{RemoteAuthority, RemoteError};
use crate::services::LocalStore;
use crate::{Error, Result};

use super::events::{EventBus, SyncEvent};
use super::retry::{add_std, backoff_delay, Clock, RetryScheduler, SystemClock};
use super::triggers::SignalState;

/// Counts for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Mutations queued when the pass started
    pub total: usize,
    pub success: usize,
    /// Failed, exhausted, or blocked by a pending conflict
    pub failed: usize,
    /// Waiting on a scheduled retry or an earlier mutation for the same entity
    pub deferred: usize,
}

/// Point-in-time view of the engine for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub draining: bool,
    pub online: bool,
    pub pending: usize,
    pub failed: usize,
    pub pending_conflicts: usize,
    pub scheduled_retries: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// What happened to one mutation
#[derive(Debug)]
enum Replay {
    Done,
    /// Left queued behind a pending conflict
    Conflict,
    /// Must wait for an earlier mutation of the same entity
    Waiting,
}

struct Inner {
    store: LocalStore,
    remote: Arc<dyn RemoteAuthority>,
    resolver: ConflictResolver,
    events: EventBus,
    retries: RetryScheduler,
    signals: SignalState,
    config: EngineConfig,
    draining: AtomicBool,
    wakeup: Notify,
}

/// Holds the "draining" flag for one pass. Dropping it, including when the
/// pass future is cancelled, releases the flag and wakes the retry driver.
struct DrainGuard<'a> {
    inner: &'a Inner,
}

impl<'a> DrainGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { inner })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.inner.draining.store(false, Ordering::Release);
        self.inner.wakeup.notify_one();
    }
}

/// The single logical sync worker of a process.
///
/// Cheap to clone; every clone drives the same queue and shares one
/// "draining" guard.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteAuthority>,
        config: EngineConfig,
        signals: SignalState,
    ) -> Self {
        Self::with_clock(store, remote, config, signals, Arc::new(SystemClock))
    }

    /// Like [`SyncOrchestrator::new`] with an injected retry clock.
    pub fn with_clock(
        store: LocalStore,
        remote: Arc<dyn RemoteAuthority>,
        config: EngineConfig,
        signals: SignalState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver: ConflictResolver::new(store.clone()),
                store,
                remote,
                events: EventBus::default(),
                retries: RetryScheduler::new(clock),
                signals,
                config,
                draining: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.inner.resolver
    }

    pub fn signals(&self) -> &SignalState {
        &self.inner.signals
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.inner.retries
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Start a drain pass.
    ///
    /// Returns `None` without touching the queue when offline, or when a pass
    /// is already running and `force` is false. Failures are counted per
    /// mutation in the report; the pass itself always completes.
    pub async fn trigger_sync(&self, force: bool) -> Result<Option<SyncReport>> {
        if !self.inner.signals.is_online() {
            tracing::debug!("Offline; sync skipped");
            return Ok(None);
        }

        let guard = DrainGuard::acquire(&self.inner);
        if guard.is_none() {
            if !force {
                tracing::debug!("Drain pass already running; sync skipped");
                return Ok(None);
            }
            tracing::info!("Forcing a drain pass while another is running");
        }

        let report = self.drain().await;
        drop(guard);
        Ok(Some(report))
    }

    /// Run a pass when at least one scheduled retry is due.
    pub async fn run_due_retries(&self) -> Result<Option<SyncReport>> {
        if !self.inner.retries.has_due() {
            return Ok(None);
        }
        self.trigger_sync(false).await
    }

    /// Mutations that exhausted automatic retries or failed permanently.
    pub async fn failed_items(&self) -> Result<Vec<PendingMutation>> {
        self.inner
            .store
            .failed_mutations(self.inner.config.max_retries)
            .await
    }

    /// Reset exhausted retry counters and force a drain pass.
    pub async fn retry_failed_items(&self) -> Result<Option<SyncReport>> {
        let reset = self
            .inner
            .store
            .reset_failed_mutations(self.inner.config.max_retries)
            .await?;
        tracing::info!("Reset {reset} failed item(s) for retry");
        self.trigger_sync(true).await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let store = &self.inner.store;
        Ok(SyncStatus {
            draining: self.is_draining(),
            online: self.inner.signals.is_online(),
            pending: store.pending_count().await?,
            failed: self.failed_items().await?.len(),
            pending_conflicts: store.pending_conflict_count().await?,
            scheduled_retries: self.inner.retries.len(),
            last_sync_at: store.last_sync_at().await?,
        })
    }

    /// Spawn the task that runs passes when scheduled retries come due.
    pub fn spawn_retry_driver(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            loop {
                let inner = &orchestrator.inner;
                if orchestrator.is_draining() {
                    inner.wakeup.notified().await;
                    continue;
                }
                if !inner.signals.is_online() {
                    let mut online = inner.signals.subscribe_online();
                    if online.wait_for(|online| *online).await.is_err() {
                        return;
                    }
                    continue;
                }

                match inner.retries.next_due() {
                    Some(due) => {
                        let wait = (due - inner.retries.now()).to_std().unwrap_or_default();
                        tokio::select! {
                            () = inner.wakeup.notified() => continue,
                            () = tokio::time::sleep(wait) => {}
                        }
                    }
                    None => {
                        inner.wakeup.notified().await;
                        continue;
                    }
                }

                if let Err(error) = orchestrator.run_due_retries().await {
                    tracing::warn!("Scheduled retry pass failed: {error}");
                }
            }
        })
    }

    async fn drain(&self) -> SyncReport {
        let inner = &self.inner;
        let store = &inner.store;

        // Due retries become ordinary queue entries for this pass
        let due: HashSet<MutationId> = inner.retries.take_due().into_iter().collect();
        if !due.is_empty() {
            tracing::debug!("{} scheduled retr(ies) due", due.len());
        }

        let total = store.pending_count().await.unwrap_or_else(|error| {
            tracing::warn!("Failed to count pending mutations: {error}");
            0
        });
        let mut report = SyncReport {
            total,
            ..SyncReport::default()
        };
        tracing::info!("Drain pass started with {} pending mutation(s)", report.total);

        let mut cursor = store.dequeue_by_priority(inner.config.queue_page_size);
        let mut held: HashSet<RecordId> = HashSet::new();

        loop {
            let listed = match cursor.next_entry().await {
                Ok(Some(QueueEntry::Ready(listed))) => listed,
                Ok(Some(QueueEntry::Unreadable(row))) => {
                    self.skip_unreadable(&row, &due, &mut report).await;
                    continue;
                }
                Ok(None) => break,
                Err(error) => {
                    // Nothing further can be read; the rest waits for the next pass
                    tracing::error!("Failed to read the sync queue: {error}");
                    inner.events.emit(SyncEvent::Error {
                        error: error.to_string(),
                    });
                    break;
                }
            };
            let entity = listed.entity_id().clone();

            let mutation = match store.get_mutation(listed.id).await {
                Ok(Some(mutation)) => mutation,
                Ok(None) => continue,
                Err(error) => {
                    held.insert(entity);
                    report.failed += 1;
                    self.record_failure(&listed, &error).await;
                    continue;
                }
            };

            if held.contains(&entity) || inner.retries.is_scheduled(mutation.id) {
                held.insert(entity);
                report.deferred += 1;
                continue;
            }
            if mutation.is_exhausted(inner.config.max_retries) {
                tracing::debug!("Skipping failed item {} ({})", mutation.id, mutation.label());
                held.insert(entity);
                report.failed += 1;
                continue;
            }
            if !due.contains(&mutation.id)
                && self.backing_off(mutation.id, mutation.retry_count, mutation.last_retry_at)
            {
                held.insert(entity);
                report.deferred += 1;
                continue;
            }

            let outcome = match self.blocked_by_conflict(&mutation).await {
                Ok(true) => Ok(Replay::Conflict),
                Ok(false) => self.replay(&mutation).await,
                Err(error) => Err(error),
            };

            match outcome {
                Ok(Replay::Done) => {
                    report.success += 1;
                    self.log(&mutation, SyncOutcome::Success, None).await;
                    inner.events.emit(SyncEvent::Progress {
                        completed: report.success + report.failed,
                        total: report.total,
                        label: mutation.label(),
                    });
                    tracing::debug!("Replayed {} {}", mutation.action, mutation.label());
                }
                Ok(Replay::Conflict) => {
                    held.insert(entity);
                    report.failed += 1;
                }
                // Its create sorts later in this pass; the next pass picks it up
                Ok(Replay::Waiting) => report.deferred += 1,
                Err(error) => {
                    held.insert(entity);
                    report.failed += 1;
                    self.record_failure(&mutation, &error).await;
                }
            }
        }

        self.finish(&report).await;
        report
    }

    /// Whether a mutation that failed in an earlier run is still inside its
    /// backoff window; if so it is put back on the in-memory schedule.
    fn backing_off(
        &self,
        id: MutationId,
        retry_count: u32,
        last_retry_at: Option<DateTime<Utc>>,
    ) -> bool {
        let inner = &self.inner;
        let Some(last_retry_at) = last_retry_at else {
            return false;
        };
        if retry_count == 0 {
            return false;
        }
        let resume_at = add_std(
            last_retry_at,
            backoff_delay(inner.config.retry_base_delay(), retry_count),
        );
        if resume_at <= inner.retries.now() {
            return false;
        }
        inner.retries.schedule_at(id, resume_at);
        inner.wakeup.notify_one();
        tracing::debug!("Mutation {id} backs off until {resume_at}");
        true
    }

    /// A queued row that no longer decodes fails like a storage error: it is
    /// retried with backoff and then parked with the other failed items.
    async fn skip_unreadable(
        &self,
        row: &UnreadableMutation,
        due: &HashSet<MutationId>,
        report: &mut SyncReport,
    ) {
        let inner = &self.inner;
        let max_retries = inner.config.max_retries;

        let waiting = inner.retries.is_scheduled(row.id)
            || (!due.contains(&row.id)
                && self.backing_off(row.id, row.retry_count, row.last_retry_at));
        if waiting {
            report.deferred += 1;
            return;
        }
        report.failed += 1;
        if row.retry_count >= max_retries {
            return;
        }

        let retry_count = row.retry_count.saturating_add(1);
        let message = format!("unreadable queue entry: {}", row.error);
        if let Err(error) = inner
            .store
            .record_failure(row.id, retry_count, &message, inner.retries.now())
            .await
        {
            tracing::warn!("Failed to record failure of mutation {}: {error}", row.id);
        }
        if retry_count < max_retries {
            let delay = backoff_delay(inner.config.retry_base_delay(), retry_count);
            let due = inner.retries.schedule_after(row.id, delay);
            inner.wakeup.notify_one();
            tracing::warn!(
                "Mutation {} is unreadable ({}); retry {retry_count}/{max_retries} at {due}",
                row.id,
                row.error
            );
        } else {
            tracing::error!(
                "Mutation {} is unreadable after {retry_count} attempt(s): {}",
                row.id,
                row.error
            );
        }
    }

    async fn finish(&self, report: &SyncReport) {
        let inner = &self.inner;
        if let Err(error) = inner.store.set_last_sync_at(Utc::now()).await {
            tracing::warn!("Failed to record last sync time: {error}");
        }

        tracing::info!(
            "Drain pass finished: {} succeeded, {} failed, {} deferred",
            report.success,
            report.failed,
            report.deferred
        );
        inner.events.emit(SyncEvent::Complete {
            success: report.success,
            failed: report.failed,
        });

        let retention = inner.config.history_retention();
        if let Err(error) = inner.resolver.cleanup(retention).await {
            tracing::warn!("Failed to prune conflict history: {error}");
        }
        match inner.store.prune_sync_log(Utc::now() - retention).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Pruned {removed} sync log entr(ies)"),
            Err(error) => tracing::warn!("Failed to prune sync log: {error}"),
        }
    }

    async fn blocked_by_conflict(&self, mutation: &PendingMutation) -> Result<bool> {
        let Some(conflict_id) = &mutation.conflict_id else {
            return Ok(false);
        };
        let conflict = self.inner.store.get_conflict(conflict_id).await?;
        let blocked = conflict.is_some_and(|conflict| conflict.status == ConflictStatus::Pending);
        if blocked {
            tracing::debug!(
                "Mutation {} waits on conflict {conflict_id}",
                mutation.id
            );
        }
        Ok(blocked)
    }

    async fn replay(&self, mutation: &PendingMutation) -> Result<Replay> {
        match (&mutation.action, &mutation.payload) {
            (MutationAction::Create, MutationPayload::Record(record)) => {
                self.replay_create(mutation, record).await
            }
            (MutationAction::Update, MutationPayload::Record(record)) => {
                self.replay_update(mutation, record).await
            }
            (MutationAction::Delete, payload) => {
                self.replay_delete(mutation, payload.entity_id()).await
            }
            (action, MutationPayload::DeleteRef { .. }) => Err(Error::Remote(
                RemoteError::InvalidPayload(format!("{action} mutation carries no record")),
            )),
        }
    }

    async fn replay_create(&self, mutation: &PendingMutation, record: &Record) -> Result<Replay> {
        let canonical = self.inner.remote.create(record).await?;
        let stored = self
            .inner
            .store
            .complete_create(mutation.id, &record.id, &canonical)
            .await?;
        if stored.is_none() {
            tracing::debug!("Create {} was completed by another pass", mutation.id);
        }
        Ok(Replay::Done)
    }

    async fn replay_update(&self, mutation: &PendingMutation, record: &Record) -> Result<Replay> {
        let inner = &self.inner;

        if record.id.is_temporary() {
            if self.create_queued_before(mutation).await? {
                return Ok(Replay::Waiting);
            }
            tracing::debug!("Replaying orphaned update {} as a create", mutation.id);
            return self.replay_create(mutation, record).await;
        }

        let server = inner.remote.fetch(&record.id).await?;
        let outgoing = match inner.resolver.process(record, &server).await? {
            Resolution::Clean => record.clone(),
            Resolution::AutoResolved { mut record, .. } => {
                // A failed write below then retries the merge instead of re-detecting it
                record.base_updated_at = Some(server.updated_at);
                inner.store.rewrite_mutation(mutation.id, &record).await?;
                record
            }
            Resolution::Pending(conflict) => {
                inner.store.block_mutation(mutation.id, &conflict.id).await?;
                self.log(mutation, SyncOutcome::Conflict, Some(&conflict.id))
                    .await;
                let message = conflict.message();
                inner.events.emit(SyncEvent::Conflict {
                    conflict: Box::new(conflict),
                    message,
                });
                return Ok(Replay::Conflict);
            }
        };

        let confirmed = inner.remote.update(&outgoing).await?;
        inner.store.complete_update(mutation.id, &confirmed).await?;
        Ok(Replay::Done)
    }

    async fn replay_delete(&self, mutation: &PendingMutation, id: &RecordId) -> Result<Replay> {
        let inner = &self.inner;

        if id.is_temporary() {
            if self.create_queued_before(mutation).await? {
                return Ok(Replay::Waiting);
            }
            // Never reached the authority; nothing to delete remotely
            inner.store.complete_delete(mutation.id, id).await?;
            return Ok(Replay::Done);
        }

        match inner.remote.delete(id).await {
            Ok(()) => {}
            Err(RemoteError::NotFound) => {
                tracing::debug!("{id} already absent remotely; delete treated as done");
            }
            Err(error) => return Err(error.into()),
        }
        inner.store.complete_delete(mutation.id, id).await?;
        Ok(Replay::Done)
    }

    async fn create_queued_before(&self, mutation: &PendingMutation) -> Result<bool> {
        let queued = self.inner.store.mutations_for(mutation.entity_id()).await?;
        Ok(queued
            .iter()
            .any(|other| other.action == MutationAction::Create && other.id != mutation.id))
    }

    async fn record_failure(&self, mutation: &PendingMutation, error: &Error) {
        let inner = &self.inner;
        let max_retries = inner.config.max_retries;
        let message = error.to_string();
        let transient = match error {
            Error::Remote(remote) => remote.is_transient(),
            other => other.is_storage(),
        };

        let retry_count = if transient {
            mutation.retry_count.saturating_add(1)
        } else {
            max_retries
        };
        if let Err(store_error) = inner
            .store
            .record_failure(mutation.id, retry_count, &message, inner.retries.now())
            .await
        {
            tracing::warn!(
                "Failed to record failure of mutation {}: {store_error}",
                mutation.id
            );
        }

        if transient && retry_count < max_retries {
            let delay = backoff_delay(inner.config.retry_base_delay(), retry_count);
            let due = inner.retries.schedule_after(mutation.id, delay);
            inner.wakeup.notify_one();
            tracing::warn!(
                "{} {} failed ({message}); retry {retry_count}/{max_retries} at {due}",
                mutation.action,
                mutation.label()
            );
            self.log(mutation, SyncOutcome::RetryScheduled, Some(&message))
                .await;
        } else {
            tracing::error!(
                "{} {} failed permanently after {retry_count} attempt(s): {message}",
                mutation.action,
                mutation.label()
            );
            self.log(mutation, SyncOutcome::Failed, Some(&message)).await;
        }
    }

    async fn log(&self, mutation: &PendingMutation, outcome: SyncOutcome, message: Option<&str>) {
        if let Err(error) = self.inner.store.log_outcome(mutation, outcome, message).await {
            tracing::warn!("Failed to write sync log: {error}");
        }
    }
}
