//! Record model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const TEMPORARY_PREFIX: &str = "tmp:";

/// Field names used to derive a human-readable label for a record.
const DISPLAY_NAME_FIELDS: [&str; 3] = ["name", "title", "label"];

/// Identifier of a record.
///
/// A record created offline carries a client-generated temporary token until
/// the remote authority accepts it and assigns the canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RecordId {
    /// Client-generated id, never seen by the remote authority
    Temporary(String),
    /// Id assigned by the remote authority
    Canonical(String),
}

impl RecordId {
    /// Create a fresh temporary id using UUID v7 (time-sortable)
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(Uuid::now_v7().to_string())
    }

    /// Wrap an id assigned by the remote authority
    pub fn canonical(id: impl Into<String>) -> Self {
        Self::Canonical(id.into())
    }

    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The raw token or server id, without the temporary marker
    pub fn value(&self) -> &str {
        match self {
            Self::Temporary(value) | Self::Canonical(value) => value,
        }
    }

    /// Storage form: temporary ids are prefixed with `tmp:`
    pub fn as_str(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(token) => write!(f, "{TEMPORARY_PREFIX}{token}"),
            Self::Canonical(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("record id must not be empty".to_string());
        }
        match trimmed.strip_prefix(TEMPORARY_PREFIX) {
            Some("") => Err("temporary record id is missing its token".to_string()),
            Some(token) => Ok(Self::Temporary(token.to_string())),
            None => Ok(Self::Canonical(trimmed.to_string())),
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A domain entity (e.g. an anniversary) as held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Temporary or canonical identifier
    pub id: RecordId,
    /// Entity kind, e.g. `anniversary`
    pub entity_type: String,
    /// Named domain fields (strings, booleans, ISO dates)
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Per-field modification times, when known
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_updated_at: BTreeMap<String, DateTime<Utc>>,
    /// Authoritative recency timestamp
    pub updated_at: DateTime<Utc>,
    /// Remote `updated_at` this copy was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_updated_at: Option<DateTime<Utc>>,
    /// Last local write to the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether the local copy matches what the remote last acknowledged
    #[serde(default)]
    pub synced: bool,
}

impl Record {
    /// Create a new, never-synced record with a temporary id
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            id: RecordId::temporary(),
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            field_updated_at: BTreeMap::new(),
            updated_at: Utc::now(),
            base_updated_at: None,
            last_modified: None,
            synced: false,
        }
    }

    /// Builder-style field assignment that does not touch timestamps
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Assign a field as a local edit: stamps the field and record timestamps.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.set_field_at(name, value, Utc::now());
    }

    /// Assign a field as a local edit made at `at`.
    pub fn set_field_at(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        at: DateTime<Utc>,
    ) {
        let name = name.into();
        self.field_updated_at.insert(name.clone(), at);
        self.fields.insert(name, value.into());
        self.updated_at = at;
    }

    /// Read a field; absent fields read as `Null`.
    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&Value::Null)
    }

    /// Timestamp of the last change to `name`, falling back to the record's
    pub fn field_timestamp(&self, name: &str) -> DateTime<Utc> {
        self.field_updated_at
            .get(name)
            .copied()
            .unwrap_or(self.updated_at)
    }

    /// Human-readable label used in progress events and conflict lists
    pub fn display_name(&self) -> String {
        DISPLAY_NAME_FIELDS
            .iter()
            .find_map(|name| self.fields.get(*name).and_then(Value::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("{} {}", self.entity_type, self.id),
                ToString::to_string,
            )
    }

    /// The timestamp conflict detection compares the remote copy against
    pub fn baseline(&self) -> DateTime<Utc> {
        self.base_updated_at.unwrap_or(self.updated_at)
    }

    /// Copy without local bookkeeping, as sent to the remote authority
    #[must_use]
    pub fn to_wire(&self) -> Self {
        Self {
            base_updated_at: None,
            last_modified: None,
            synced: false,
            ..self.clone()
        }
    }
}
