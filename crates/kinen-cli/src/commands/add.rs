use std::path::Path;

use kinen_core::models::{NewMutation, Record, PRIORITY_NORMAL};
use kinen_core::LocalStore;

use crate::commands::common::{apply_assignments, normalize_name, open_store, parse_assignment};
use crate::error::CliError;

pub async fn run_add(
    name_parts: &[String],
    entity_type: &str,
    date: Option<&str>,
    fields: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let name = normalize_name(name_parts).ok_or(CliError::EmptyName)?;
    let store = open_store(db_path)?;
    let record = add_record(&store, &name, entity_type, date, fields).await?;

    println!("{}", record.id);
    Ok(())
}

/// Store a new record under a temporary id and queue its create.
pub async fn add_record(
    store: &LocalStore,
    name: &str,
    entity_type: &str,
    date: Option<&str>,
    fields: &[String],
) -> Result<Record, CliError> {
    let mut assignments = fields
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>, _>>()?;
    assignments.insert(0, ("name".to_string(), name.into()));
    if let Some(date) = date {
        assignments.insert(1, ("date".to_string(), date.trim().into()));
    }

    let mut record = Record::new(entity_type.trim());
    apply_assignments(&mut record, &assignments);

    let stored = store.put(&record).await?;
    let queued = store
        .enqueue(NewMutation::create(stored.clone()), PRIORITY_NORMAL)
        .await?;
    tracing::debug!("Queued create #{} for {}", queued.id, stored.id);
    Ok(stored)
}
