use std::path::Path;

use kinen_core::models::{NewMutation, RecordId, PRIORITY_NORMAL};
use kinen_core::LocalStore;

use crate::commands::common::{normalize_record_identifier, open_store, resolve_record};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let query = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let deleted = delete_record(&store, &query).await?;

    println!("{deleted}");
    Ok(())
}

/// Remove a record locally and queue the remote delete.
pub async fn delete_record(store: &LocalStore, query: &str) -> Result<RecordId, CliError> {
    let record = resolve_record(store, query).await?;
    store.delete(&record.id).await?;
    store
        .enqueue(
            NewMutation::delete(record.id.clone(), record.entity_type),
            PRIORITY_NORMAL,
        )
        .await?;
    Ok(record.id)
}
