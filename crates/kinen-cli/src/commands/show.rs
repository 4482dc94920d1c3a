use std::path::Path;

use serde::Serialize;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_mutation_lines, format_record_detail,
    mutation_to_item, normalize_record_identifier, open_store, record_to_list_item, resolve_record,
    ConflictItem, MutationItem, RecordListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct RecordDetail {
    record: RecordListItem,
    queued: Vec<MutationItem>,
    conflicts: Vec<ConflictItem>,
}

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let query = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let record = resolve_record(&store, &query).await?;
    let queued = store.mutations_for(&record.id).await?;
    let conflicts = store.conflicts_for(&record.id.to_string()).await?;

    if as_json {
        let detail = RecordDetail {
            record: record_to_list_item(&record),
            queued: queued.iter().map(mutation_to_item).collect(),
            conflicts: conflicts.iter().map(conflict_to_item).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    for line in format_record_detail(&record) {
        println!("{line}");
    }
    if !queued.is_empty() {
        println!("queued:");
        for line in format_mutation_lines(&queued) {
            println!("  {line}");
        }
    }
    if !conflicts.is_empty() {
        println!("conflicts:");
        for line in format_conflict_lines(&conflicts) {
            println!("  {line}");
        }
    }
    Ok(())
}
