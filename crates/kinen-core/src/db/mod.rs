//! Database layer for kinen

mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;
mod record_repository;
mod settings_repository;
mod sync_log_repository;

pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use queue_repository::{
    MutationQueue, QueueEntry, QueuePosition, SqliteMutationQueue, UnreadableMutation,
};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use settings_repository::{SettingsRepository, SqliteSettingsRepository};
pub use sync_log_repository::{SqliteSyncLogRepository, SyncLogRepository};

use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// Decode a JSON text column, surfacing malformed rows as conversion errors
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}
