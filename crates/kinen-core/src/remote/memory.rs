//! In-process remote authority.
//!
//! Deterministic stand-in for the HTTP service, used by tests and offline
//! demos. Failures can be injected and server-side edits simulated.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Record, RecordId};

use super::{RemoteAuthority, RemoteError, RemoteResult};

/// Kind of failure returned by an injected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// 503, retried with backoff
    Transient,
    /// 422, never retried automatically
    Permanent,
}

/// One call observed by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create { label: String },
    Fetch { id: String },
    Update { id: String, label: String },
    Delete { id: String },
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Record>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    failures: VecDeque<InjectedFailure>,
    write_failures: VecDeque<InjectedFailure>,
    unreachable: bool,
    latency: Option<Duration>,
    calls: Vec<RemoteCall>,
}

impl State {
    /// Server clock; strictly increasing so every write is observably newer
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn take_failure(&mut self, write: bool) -> RemoteResult<()> {
        if self.unreachable {
            return Err(RemoteError::Network("authority unreachable".to_string()));
        }
        let injected = match self.failures.pop_front() {
            Some(failure) => Some(failure),
            None if write => self.write_failures.pop_front(),
            None => None,
        };
        match injected {
            Some(InjectedFailure::Transient) => Err(RemoteError::Server {
                status: 503,
                message: "injected transient failure".to_string(),
            }),
            Some(InjectedFailure::Permanent) => Err(RemoteError::Client {
                status: 422,
                message: "injected permanent failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Poisoned only if a caller panicked mid-call
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fail the next `count` calls with `failure`.
    pub fn fail_next(&self, count: usize, failure: InjectedFailure) {
        let mut state = self.state();
        state.failures.extend(std::iter::repeat(failure).take(count));
    }

    /// Fail the next `count` write calls; fetches pass through.
    pub fn fail_next_write(&self, count: usize, failure: InjectedFailure) {
        let mut state = self.state();
        state
            .write_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Make every call fail with a network error until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Delay every call, to keep a drain pass in flight.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Store a record as if another device had created it.
    pub fn seed(&self, mut record: Record) -> Record {
        let mut state = self.state();
        if record.id.is_temporary() {
            state.next_id += 1;
            record.id = RecordId::canonical(format!("srv-{}", state.next_id));
        }
        record.updated_at = state.stamp();
        record.base_updated_at = None;
        record.last_modified = None;
        record.synced = false;
        state.records.insert(record.id.to_string(), record.clone());
        record
    }

    /// Change a field as another device would; returns the new copy.
    pub fn edit_field(
        &self,
        id: &RecordId,
        field: &str,
        value: impl Into<Value>,
    ) -> Option<Record> {
        let mut state = self.state();
        let at = state.stamp();
        let record = state.records.get_mut(&id.to_string())?;
        record.set_field_at(field, value, at);
        Some(record.clone())
    }

    /// Remove a record as another device would.
    pub fn remove(&self, id: &RecordId) -> Option<Record> {
        self.state().records.remove(&id.to_string())
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.state().records.get(&id.to_string()).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.state().records.values().cloned().collect()
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Calls that carried a write (`create`, `update`, `delete`).
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, RemoteCall::Fetch { .. }))
            .collect()
    }

    async fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let write = !matches!(call, RemoteCall::Fetch { .. });
        let latency = {
            let mut state = self.state();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state().take_failure(write)
    }
}

#[async_trait]
impl RemoteAuthority for InMemoryRemote {
    async fn create(&self, record: &Record) -> RemoteResult<Record> {
        self.begin(RemoteCall::Create {
            label: record.display_name(),
        })
        .await?;

        let mut state = self.state();
        state.next_id += 1;
        let mut created = record.to_wire();
        created.id = RecordId::canonical(format!("srv-{}", state.next_id));
        created.updated_at = state.stamp();
        state.records.insert(created.id.to_string(), created.clone());
        Ok(created)
    }

    async fn fetch(&self, id: &RecordId) -> RemoteResult<Record> {
        self.begin(RemoteCall::Fetch { id: id.to_string() }).await?;
        self.get(id).ok_or(RemoteError::NotFound)
    }

    async fn update(&self, record: &Record) -> RemoteResult<Record> {
        self.begin(RemoteCall::Update {
            id: record.id.to_string(),
            label: record.display_name(),
        })
        .await?;

        let mut state = self.state();
        let key = record.id.to_string();
        if !state.records.contains_key(&key) {
            return Err(RemoteError::NotFound);
        }
        let mut stored = record.to_wire();
        stored.updated_at = state.stamp();
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &RecordId) -> RemoteResult<()> {
        self.begin(RemoteCall::Delete { id: id.to_string() }).await?;
        self.state()
            .records
            .remove(&id.to_string())
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_assigns_canonical_ids() {
        let remote = InMemoryRemote::new();
        let record = Record::new("anniversary").with_field("name", "Wedding");

        let created = remote.create(&record).await.unwrap();
        assert!(!created.id.is_temporary());
        assert_eq!(remote.fetch(&created.id).await.unwrap(), created);
        assert_eq!(
            remote.calls()[0],
            RemoteCall::Create {
                label: "Wedding".into()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next(1, InjectedFailure::Transient);
        remote.fail_next(1, InjectedFailure::Permanent);
        let record = Record::new("anniversary");

        assert!(remote.create(&record).await.unwrap_err().is_transient());
        assert!(!remote.create(&record).await.unwrap_err().is_transient());
        assert!(remote.create(&record).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_failures_skip_fetches() {
        let remote = InMemoryRemote::new();
        let seeded = remote.seed(Record::new("anniversary").with_field("memo", "A"));
        remote.fail_next_write(1, InjectedFailure::Transient);

        assert!(remote.fetch(&seeded.id).await.is_ok());
        assert!(remote.update(&seeded).await.unwrap_err().is_transient());
        assert!(remote.update(&seeded).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_entities_report_not_found() {
        let remote = InMemoryRemote::new();
        let id = RecordId::canonical("gone");

        assert!(matches!(
            remote.delete(&id).await,
            Err(RemoteError::NotFound)
        ));
        assert!(matches!(remote.fetch(&id).await, Err(RemoteError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_edits_advance_updated_at() {
        let remote = InMemoryRemote::new();
        let seeded = remote.seed(Record::new("anniversary").with_field("memo", "A"));
        let edited = remote.edit_field(&seeded.id, "memo", "B").unwrap();

        assert!(edited.updated_at > seeded.updated_at);
        assert_eq!(edited.field_timestamp("memo"), edited.updated_at);
    }
}
