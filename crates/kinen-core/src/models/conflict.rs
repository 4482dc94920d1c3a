//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::record::Record;

/// How a single field divergence is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep the local value
    Local,
    /// Take the server value
    Server,
    /// Take whichever side changed the field most recently
    Latest,
    /// Combine both values (type-specific)
    Merge,
    /// Leave the conflict for the user
    Manual,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
            Self::Latest => "latest",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            "latest" => Ok(Self::Latest),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

/// Per-field resolution policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub field: String,
    pub strategy: ResolutionStrategy,
    /// Higher wins when several rules name the same field
    #[serde(default)]
    pub priority: i32,
}

impl ResolutionRule {
    pub fn new(field: impl Into<String>, strategy: ResolutionStrategy) -> Self {
        Self {
            field: field.into(),
            strategy,
            priority: 0,
        }
    }
}

/// Lifecycle of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
    AutoResolved,
}

impl ConflictStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::AutoResolved => "auto-resolved",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "auto-resolved" => Ok(Self::AutoResolved),
            other => Err(format!("unknown conflict status '{other}'")),
        }
    }
}

/// Who settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    System,
    User,
}

/// Which record a user keeps when settling a conflict by hand
#[derive(Debug, Clone, PartialEq)]
pub enum ManualChoice {
    Local,
    Server,
    Custom(Record),
}

/// One diverging field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub local_value: Value,
    pub server_value: Value,
    pub local_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
}

/// Divergence between a queued local update and the remote authority's copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub fields: Vec<FieldConflict>,
    pub local: Record,
    pub server: Record,
    pub status: ConflictStatus,
    #[serde(default)]
    pub strategy: Option<ResolutionStrategy>,
    /// Record produced by resolution, when resolved
    #[serde(default)]
    pub resolved_record: Option<Record>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<ResolvedBy>,
}

impl Conflict {
    /// New pending conflict between `local` and `server`
    pub fn new(local: Record, server: Record, fields: Vec<FieldConflict>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            entity_type: local.entity_type.clone(),
            entity_id: local.id.to_string(),
            entity_name: local.display_name(),
            fields,
            local,
            server,
            status: ConflictStatus::Pending,
            strategy: None,
            resolved_record: None,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.field.as_str()).collect()
    }

    /// Message used for the `data-conflict` event
    pub fn message(&self) -> String {
        format!(
            "'{}' was changed on another device ({})",
            self.entity_name,
            self.field_names().join(", ")
        )
    }

    pub(crate) fn mark_resolved(
        &mut self,
        status: ConflictStatus,
        strategy: ResolutionStrategy,
        by: ResolvedBy,
        record: Record,
    ) {
        self.status = status;
        self.strategy = Some(strategy);
        self.resolved_by = Some(by);
        self.resolved_at = Some(Utc::now());
        self.resolved_record = Some(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!(
            "Merge".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::Merge
        );
        assert!("coin-flip".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn status_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ConflictStatus::AutoResolved).unwrap(),
            "\"auto-resolved\""
        );
        assert_eq!(
            "auto-resolved".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::AutoResolved
        );
        assert!(!ConflictStatus::Pending.is_terminal());
        assert!(ConflictStatus::Resolved.is_terminal());
    }

    #[test]
    fn new_conflict_is_pending_and_named() {
        let local = Record::new("anniversary").with_field("name", "Wedding");
        let server = local.clone();
        let conflict = Conflict::new(local, server, Vec::new());

        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert_eq!(conflict.entity_name, "Wedding");
        assert!(conflict.resolved_by.is_none());
    }
}
