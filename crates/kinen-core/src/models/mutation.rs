//! Pending mutation model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{Record, RecordId};

/// Default priority for ordinary user edits
pub const PRIORITY_NORMAL: i64 = 1;
/// Priority used when re-enqueueing manually resolved conflicts
pub const PRIORITY_HIGH: i64 = 10;

/// Sequence id of a queued mutation (monotonically increasing)
pub type MutationId = i64;

/// Kind of change a mutation replays against the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation action '{other}'")),
        }
    }
}

/// Snapshot carried by a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationPayload {
    /// Full record snapshot (create/update)
    Record(Record),
    /// Minimal reference for deletes
    DeleteRef { id: RecordId, entity_type: String },
}

impl MutationPayload {
    pub const fn entity_id(&self) -> &RecordId {
        match self {
            Self::Record(record) => &record.id,
            Self::DeleteRef { id, .. } => id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Record(record) => record.display_name(),
            Self::DeleteRef { id, entity_type } => format!("{entity_type} {id}"),
        }
    }
}

/// A mutation to be queued; the store assigns id and enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub action: MutationAction,
    pub payload: MutationPayload,
}

impl NewMutation {
    pub fn create(record: Record) -> Self {
        Self {
            action: MutationAction::Create,
            payload: MutationPayload::Record(record),
        }
    }

    pub fn update(record: Record) -> Self {
        Self {
            action: MutationAction::Update,
            payload: MutationPayload::Record(record),
        }
    }

    pub fn delete(id: RecordId, entity_type: impl Into<String>) -> Self {
        Self {
            action: MutationAction::Delete,
            payload: MutationPayload::DeleteRef {
                id,
                entity_type: entity_type.into(),
            },
        }
    }
}

/// One intended change not yet confirmed by the remote authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: MutationId,
    pub action: MutationAction,
    pub payload: MutationPayload,
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Pending conflict blocking this mutation, if any
    pub conflict_id: Option<String>,
}

impl PendingMutation {
    pub const fn entity_id(&self) -> &RecordId {
        self.payload.entity_id()
    }

    pub fn label(&self) -> String {
        self.payload.label()
    }

    /// Whether automatic retries are exhausted for the given cap
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
