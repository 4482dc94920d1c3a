//! Durable local store shared by the UI host and the sync engine.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, MutationQueue, QueueEntry, QueuePosition, RecordRepository,
    SettingsRepository, SqliteConflictRepository, SqliteMutationQueue, SqliteRecordRepository,
    SqliteSettingsRepository, SqliteSyncLogRepository, SyncLogRepository,
};
use crate::models::{
    Conflict, ConflictStatus, MutationAction, MutationId, MutationPayload, NewMutation,
    PendingMutation, Record, RecordId, SyncLogEntry, SyncOutcome,
};
use crate::{Error, Result};

/// Settings key holding the RFC 3339 time of the last completed drain pass
pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";

/// Thread-safe, cloneable handle to the local store.
///
/// Every operation takes the connection lock for its own duration only, so
/// callers never hold store state across an await point.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Opening local store at {}", db_path.display());
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location, when the store is file-backed
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ---------------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------------

    /// Upsert a local edit: stamps `last_modified` and marks it unsynced.
    pub async fn put(&self, record: &Record) -> Result<Record> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).put(record, false, Utc::now())
    }

    /// Upsert a copy the remote authority has acknowledged.
    pub async fn put_synced(&self, record: &Record) -> Result<Record> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).put(record, true, Utc::now())
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).get(id)
    }

    /// All records, newest first.
    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.list_records(None).await
    }

    /// Records of one entity type (or all), newest first.
    pub async fn list_records(&self, entity_type: Option<&str>) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list(entity_type)
    }

    /// Remove a record. Deleting an absent id succeeds.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let removed = SqliteRecordRepository::new(db.connection()).delete(id)?;
        if !removed {
            tracing::debug!("Delete of absent record {} ignored", id);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pending mutation queue
    // ---------------------------------------------------------------------

    /// Append a mutation; higher `priority` is served first.
    pub async fn enqueue(&self, mutation: NewMutation, priority: i64) -> Result<PendingMutation> {
        let db = self.db.lock().await;
        let queued = SqliteMutationQueue::new(db.connection()).enqueue(&mutation, priority, Utc::now())?;
        tracing::debug!(
            "Queued {} for {} (seq {}, priority {})",
            queued.action,
            queued.entity_id(),
            queued.id,
            queued.priority
        );
        Ok(queued)
    }

    /// Lazy cursor over the queue in drain order.
    pub fn dequeue_by_priority(&self, page_size: usize) -> QueueCursor {
        QueueCursor::new(self.clone(), page_size)
    }

    async fn queue_page(
        &self,
        after: Option<QueuePosition>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).page_after(after, limit)
    }

    /// Re-read one mutation.
    pub async fn get_mutation(&self, id: MutationId) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).get(id)
    }

    /// Delete one mutation; returns whether it was still queued.
    pub async fn remove_mutation(&self, id: MutationId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).remove(id)
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).count()
    }

    /// Queued mutations for one entity, in enqueue order.
    pub async fn mutations_for(&self, entity_id: &RecordId) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).for_entity(entity_id)
    }

    /// Persist a failed replay attempt made at `at`.
    pub async fn record_failure(
        &self,
        id: MutationId,
        retry_count: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).record_failure(id, retry_count, error, at)
    }

    /// Replace the record a queued mutation will replay.
    pub async fn rewrite_mutation(&self, id: MutationId, record: &Record) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection())
            .update_payload(id, &MutationPayload::Record(record.clone()))
    }

    /// Mutations that exhausted automatic retries.
    pub async fn failed_mutations(&self, max_retries: u32) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).list_exhausted(max_retries)
    }

    /// Reset retry counters of exhausted mutations.
    pub async fn reset_failed_mutations(&self, max_retries: u32) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).reset_exhausted(max_retries)
    }

    /// Tag a mutation as waiting on a pending conflict.
    pub async fn block_mutation(&self, id: MutationId, conflict_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).set_conflict(id, Some(conflict_id))
    }

    /// Complete a successful `create` replay atomically.
    ///
    /// The temporary record is swapped for the canonical one, the mutation is
    /// removed, and queued mutations still naming the temporary id are
    /// rewritten to the canonical id with the canonical baseline. Returns
    /// `None` when another pass already completed the mutation.
    pub async fn complete_create(
        &self,
        mutation_id: MutationId,
        temporary_id: &RecordId,
        canonical: &Record,
    ) -> Result<Option<Record>> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let now = Utc::now();

        let stored = {
            let records = SqliteRecordRepository::new(&tx);
            let queue = SqliteMutationQueue::new(&tx);

            if !queue.remove(mutation_id)? {
                return Ok(None);
            }
            let local = records.get(temporary_id)?;
            records.delete(temporary_id)?;

            let followers = queue.for_entity(temporary_id)?;
            for follower in &followers {
                let payload = rebase_payload(&follower.payload, &canonical.id, canonical.updated_at);
                queue.update_payload(follower.id, &payload)?;
            }

            match local {
                Some(mut local) if !followers.is_empty() => {
                    local.id = canonical.id.clone();
                    local.base_updated_at = Some(canonical.updated_at);
                    records.put(&local, false, now)?
                }
                // Deleted locally while the create was in flight; the queued delete follows
                None if !followers.is_empty() => canonical.clone(),
                _ => {
                    let mut confirmed = canonical.clone();
                    confirmed.base_updated_at = Some(canonical.updated_at);
                    records.put(&confirmed, true, now)?
                }
            }
        };

        tx.commit()?;
        tracing::debug!("Replaced {} with canonical id {}", temporary_id, stored.id);
        Ok(Some(stored))
    }

    /// Complete a successful `update` replay atomically.
    ///
    /// The local copy becomes the authority's copy only when nothing else is
    /// queued for it; otherwise later mutations are rebased onto the new
    /// remote timestamp so they do not conflict with this write.
    pub async fn complete_update(
        &self,
        mutation_id: MutationId,
        confirmed: &Record,
    ) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        {
            let records = SqliteRecordRepository::new(&tx);
            let queue = SqliteMutationQueue::new(&tx);

            queue.remove(mutation_id)?;
            let followers = queue.for_entity(&confirmed.id)?;
            if followers.is_empty() {
                let mut confirmed = confirmed.clone();
                confirmed.base_updated_at = Some(confirmed.updated_at);
                records.put(&confirmed, true, Utc::now())?;
            } else {
                records.set_baseline(&confirmed.id, confirmed.updated_at)?;
                for follower in &followers {
                    let payload =
                        rebase_payload(&follower.payload, &confirmed.id, confirmed.updated_at);
                    queue.update_payload(follower.id, &payload)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Complete a successful `delete` replay atomically.
    pub async fn complete_delete(&self, mutation_id: MutationId, id: &RecordId) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        SqliteMutationQueue::new(&tx).remove(mutation_id)?;
        SqliteRecordRepository::new(&tx).delete(id)?;

        tx.commit()?;
        Ok(())
    }

    /// Settle a conflict by hand atomically: persist the conflict, write the
    /// chosen record, drop superseded mutations and queue a fresh update.
    pub async fn apply_manual_resolution(
        &self,
        conflict: &Conflict,
        record: &Record,
        priority: i64,
    ) -> Result<PendingMutation> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let now = Utc::now();

        let queued = {
            let queue = SqliteMutationQueue::new(&tx);
            SqliteConflictRepository::new(&tx).save(conflict)?;
            let stored = SqliteRecordRepository::new(&tx).put(record, false, now)?;
            let superseded = queue.remove_by_conflict(&conflict.id)?;
            tracing::debug!(
                "Conflict {} superseded {} queued mutation(s)",
                conflict.id,
                superseded
            );
            queue.enqueue(&NewMutation::update(stored), priority, now)?
        };

        tx.commit()?;
        Ok(queued)
    }

    // ---------------------------------------------------------------------
    // Conflicts
    // ---------------------------------------------------------------------

    /// Insert or replace a conflict.
    pub async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).save(conflict)
    }

    /// Fetch a conflict by id.
    pub async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).get(id)
    }

    /// List conflicts newest first.
    pub async fn list_conflicts(
        &self,
        status: Option<ConflictStatus>,
        limit: usize,
    ) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list(status, limit)
    }

    /// Conflict history of one entity.
    pub async fn conflicts_for(&self, entity_id: &str) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).for_entity(entity_id)
    }

    /// Delete settled conflicts older than `cutoff`.
    pub async fn prune_conflicts(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).prune(cutoff)
    }

    /// Number of conflicts awaiting the user.
    pub async fn pending_conflict_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).count_pending()
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    /// Write a scalar setting.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).set_setting(key, value)
    }

    /// Read a scalar setting.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).get_setting(key)
    }

    /// Read a JSON-encoded setting.
    pub async fn get_json_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_setting(key)
            .await?
            .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    /// Write a JSON-encoded setting.
    pub async fn set_json_setting<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_setting(key, &raw).await
    }

    /// Time of the last completed drain pass.
    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get_setting(LAST_SYNC_AT_KEY).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|error| Error::Storage(format!("invalid {LAST_SYNC_AT_KEY} value: {error}")))
    }

    /// Record the time of a completed drain pass.
    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_setting(LAST_SYNC_AT_KEY, &at.to_rfc3339()).await
    }

    // ---------------------------------------------------------------------
    // Sync log
    // ---------------------------------------------------------------------

    /// Append a replay outcome to the history.
    pub async fn log_outcome(
        &self,
        mutation: &PendingMutation,
        outcome: SyncOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        self.log_entry(
            mutation.id,
            &mutation.entity_id().to_string(),
            mutation.action,
            outcome,
            message,
        )
        .await
    }

    async fn log_entry(
        &self,
        mutation_id: MutationId,
        entity_id: &str,
        action: MutationAction,
        outcome: SyncOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncLogRepository::new(db.connection()).append(
            mutation_id,
            entity_id,
            action,
            outcome,
            message,
            Utc::now(),
        )
    }

    /// Most recent replay outcomes.
    pub async fn recent_sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let db = self.db.lock().await;
        SqliteSyncLogRepository::new(db.connection()).recent(limit)
    }

    /// Delete history entries older than `cutoff`.
    pub async fn prune_sync_log(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteSyncLogRepository::new(db.connection()).prune(cutoff)
    }

    /// Run raw SQL against the store, for tests that damage or lock rows.
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute_batch(sql)?;
        Ok(())
    }
}

/// Point a queued payload at `id` and rebase it onto `base_updated_at`.
fn rebase_payload(
    payload: &MutationPayload,
    id: &RecordId,
    base_updated_at: DateTime<Utc>,
) -> MutationPayload {
    match payload {
        MutationPayload::Record(record) => {
            let mut record = record.clone();
            record.id = id.clone();
            record.base_updated_at = Some(base_updated_at);
            MutationPayload::Record(record)
        }
        MutationPayload::DeleteRef { entity_type, .. } => MutationPayload::DeleteRef {
            id: id.clone(),
            entity_type: entity_type.clone(),
        },
    }
}

/// Lazy, finite, restartable walk over the queue in drain order.
///
/// Pages are re-read from the store as the cursor advances, so mutations
/// removed or rewritten mid-walk are observed.
pub struct QueueCursor {
    store: LocalStore,
    page_size: usize,
    position: Option<QueuePosition>,
    buffer: VecDeque<QueueEntry>,
    exhausted: bool,
}

impl QueueCursor {
    fn new(store: LocalStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next row in drain order, undecodable ones included.
    pub async fn next_entry(&mut self) -> Result<Option<QueueEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self.store.queue_page(self.position, self.page_size).await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        let next = self.buffer.pop_front();
        if let Some(entry) = &next {
            self.position = Some(entry.position());
        }
        Ok(next)
    }

    /// Next decodable mutation in drain order, or `None` at the end of the queue.
    pub async fn next(&mut self) -> Result<Option<PendingMutation>> {
        while let Some(entry) = self.next_entry().await? {
            match entry {
                QueueEntry::Ready(mutation) => return Ok(Some(mutation)),
                QueueEntry::Unreadable(row) => {
                    tracing::warn!("Skipping unreadable queued mutation {}: {}", row.id, row.error);
                }
            }
        }
        Ok(None)
    }

    /// Start again from the head of the queue.
    pub fn restart(&mut self) {
        self.position = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Drain the remaining mutations into a vector.
    pub async fn collect(mut self) -> Result<Vec<PendingMutation>> {
        let mut mutations = Vec::new();
        while let Some(mutation) = self.next().await? {
            mutations.push(mutation);
        }
        Ok(mutations)
    }
}
