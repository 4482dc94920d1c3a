use std::path::Path;

use kinen_core::models::{NewMutation, Record, PRIORITY_NORMAL};
use kinen_core::LocalStore;

use crate::commands::common::{
    apply_assignments, normalize_record_identifier, open_store, parse_assignment, resolve_record,
};
use crate::error::CliError;

pub async fn run_set(id: &str, assignments: &[String], db_path: &Path) -> Result<(), CliError> {
    let query = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let updated = set_fields(&store, &query, assignments).await?;

    println!("{}", updated.id);
    Ok(())
}

/// Edit a record locally and queue the update.
pub async fn set_fields(
    store: &LocalStore,
    query: &str,
    assignments: &[String],
) -> Result<Record, CliError> {
    let parsed = assignments
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let mut record = resolve_record(store, query).await?;
    apply_assignments(&mut record, &parsed);

    let stored = store.put(&record).await?;
    store
        .enqueue(NewMutation::update(stored.clone()), PRIORITY_NORMAL)
        .await?;
    Ok(stored)
}
