use std::path::Path;

use crate::commands::common::{format_record_lines, open_store, record_to_list_item, RecordListItem};
use crate::error::CliError;

pub async fn run_list(
    entity_type: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let records = store.list_records(entity_type).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
