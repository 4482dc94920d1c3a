use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kinen_core::models::{Conflict, PendingMutation, Record, RecordId};
use kinen_core::{EngineConfig, HttpRemote, LocalStore, SignalState, SyncOrchestrator};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    pub fields: BTreeMap<String, Value>,
    pub updated_at: String,
    pub relative_time: String,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct MutationItem {
    pub id: i64,
    pub action: String,
    pub entity_id: String,
    pub label: String,
    pub priority: i64,
    pub enqueued_at: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub conflict_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub entity_id: String,
    pub entity_name: String,
    pub fields: Vec<String>,
    pub status: String,
    pub strategy: Option<String>,
    pub created_at: String,
    pub message: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("KINEN_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kinen")
        .join("kinen.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("KINEN_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kinen")
        .join("config.json")
}

pub fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    Ok(EngineConfig::load(path)?)
}

pub fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(path)?)
}

/// Compose the engine against the configured HTTP authority.
pub fn build_orchestrator(
    store: LocalStore,
    config: EngineConfig,
) -> Result<SyncOrchestrator, CliError> {
    if config.remote_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let remote = HttpRemote::from_config(&config)?;
    tracing::debug!("Syncing against {}", remote.base_url());
    Ok(SyncOrchestrator::new(
        store,
        Arc::new(remote),
        config,
        SignalState::default(),
    ))
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_name(parts: &[String]) -> Option<String> {
    let joined = parts.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Find a record by exact id or unique id prefix.
pub async fn resolve_record(store: &LocalStore, query: &str) -> Result<Record, CliError> {
    if let Ok(id) = query.parse::<RecordId>() {
        if let Some(record) = store.get(&id).await? {
            return Ok(record);
        }
    }

    let mut matching = store
        .get_all()
        .await?
        .into_iter()
        .filter(|record| {
            record.id.to_string().starts_with(query) || record.id.value().starts_with(query)
        })
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::RecordNotFound(query.to_string())),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|record| short_id(&record.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Parse `KEY=VALUE`. An empty value means "remove"; `true`/`false` become booleans.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    }

    let value = match value.trim() {
        "" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        text => Value::String(text.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Apply parsed assignments as local edits.
pub fn apply_assignments(record: &mut Record, assignments: &[(String, Value)]) {
    for (key, value) in assignments {
        record.set_field(key.as_str(), value.clone());
        if value.is_null() {
            record.fields.remove(key);
        }
    }
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_field_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

const fn sync_label(record: &Record) -> &'static str {
    if record.synced {
        "synced"
    } else {
        "pending"
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now = Utc::now();
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.id);
            let name = record.display_name();
            let date = format_field_value(record.field("date"));
            let relative_time = format_relative_time(record.updated_at, now);
            format!(
                "{id:<13}  {name:<32}  {date:<10}  {:<7}  {relative_time}",
                sync_label(record)
            )
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        id: record.id.to_string(),
        entity_type: record.entity_type.clone(),
        name: record.display_name(),
        fields: record.fields.clone(),
        updated_at: record.updated_at.to_rfc3339(),
        relative_time: format_relative_time(record.updated_at, Utc::now()),
        synced: record.synced,
    }
}

pub fn format_record_detail(record: &Record) -> Vec<String> {
    let mut lines = vec![
        format!("id:       {}", record.id),
        format!("type:     {}", record.entity_type),
        format!("updated:  {}", format_timestamp(record.updated_at)),
        format!("status:   {}", sync_label(record)),
    ];
    for (name, value) in &record.fields {
        lines.push(format!("  {name}: {}", format_field_value(value)));
    }
    lines
}

pub fn format_mutation_lines(mutations: &[PendingMutation]) -> Vec<String> {
    mutations
        .iter()
        .map(|mutation| {
            let mut line = format!(
                "#{:<5} {:<6}  p{:<3} {}  retries={}",
                mutation.id,
                mutation.action.as_str(),
                mutation.priority,
                mutation.label(),
                mutation.retry_count
            );
            if let Some(conflict_id) = &mutation.conflict_id {
                line.push_str(&format!("  blocked-by={conflict_id}"));
            }
            if let Some(error) = &mutation.last_error {
                line.push_str(&format!("  error={error}"));
            }
            line
        })
        .collect()
}

pub fn mutation_to_item(mutation: &PendingMutation) -> MutationItem {
    MutationItem {
        id: mutation.id,
        action: mutation.action.to_string(),
        entity_id: mutation.entity_id().to_string(),
        label: mutation.label(),
        priority: mutation.priority,
        enqueued_at: mutation.enqueued_at.to_rfc3339(),
        retry_count: mutation.retry_count,
        last_error: mutation.last_error.clone(),
        conflict_id: mutation.conflict_id.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let strategy = conflict
                .strategy
                .map_or_else(String::new, |strategy| format!("  strategy={strategy}"));
            format!(
                "{}  {:<13}  {}  '{}'  fields={}{strategy}",
                format_timestamp(conflict.created_at),
                conflict.status.as_str(),
                conflict.id,
                conflict.entity_name,
                conflict.field_names().join(",")
            )
        })
        .collect()
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        id: conflict.id.clone(),
        entity_id: conflict.entity_id.clone(),
        entity_name: conflict.entity_name.clone(),
        fields: conflict
            .field_names()
            .into_iter()
            .map(ToString::to_string)
            .collect(),
        status: conflict.status.to_string(),
        strategy: conflict.strategy.map(|strategy| strategy.to_string()),
        created_at: conflict.created_at.to_rfc3339(),
        message: conflict.message(),
    }
}
