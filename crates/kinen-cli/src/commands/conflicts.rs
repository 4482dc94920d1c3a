use std::path::Path;

use kinen_core::models::{ConflictStatus, ManualChoice};
use kinen_core::{ConflictResolver, LocalStore};

use crate::cli::ResolveChoice;
use crate::commands::common::{conflict_to_item, format_conflict_lines, open_store, ConflictItem};
use crate::error::CliError;

pub async fn run_conflicts(
    include_settled: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let status = (!include_settled).then_some(ConflictStatus::Pending);
    let conflicts = store.list_conflicts(status, limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(id: &str, choice: ResolveChoice, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    resolve_conflict(&store, id, choice).await?;
    println!("{}", id.trim());
    Ok(())
}

/// Settle a pending conflict and queue the chosen copy.
pub async fn resolve_conflict(
    store: &LocalStore,
    id: &str,
    choice: ResolveChoice,
) -> Result<(), CliError> {
    let id = id.trim();
    let choice = match choice {
        ResolveChoice::Local => ManualChoice::Local,
        ResolveChoice::Server => ManualChoice::Server,
    };

    let resolver = ConflictResolver::new(store.clone());
    if resolver.resolve_manually(id, choice).await? {
        Ok(())
    } else {
        Err(CliError::ConflictNotFound(id.to_string()))
    }
}
