use std::path::Path;

use chrono::{DateTime, Utc};
use kinen_core::{SyncEvent, SyncOrchestrator, SyncReport};
use serde::Serialize;

use crate::commands::common::{
    build_orchestrator, format_mutation_lines, format_timestamp, load_config, mutation_to_item,
    open_store, MutationItem,
};
use crate::error::CliError;

/// What one CLI-driven pass did, including the events it published
#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub report: Option<SyncReport>,
    pub conflicts: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub remote_url: Option<String>,
    pub pending: usize,
    pub failed: usize,
    pub pending_conflicts: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}

pub async fn run_sync(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(open_store(db_path)?, config)?;
    let summary = sync_once(&orchestrator, false).await?;
    print_summary(&summary, as_json)
}

pub async fn run_retry(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(open_store(db_path)?, config)?;
    let summary = sync_once(&orchestrator, true).await?;
    print_summary(&summary, as_json)
}

/// Run one forced pass and collect the events it emitted.
///
/// With `retry_failed` set, exhausted items are reset first.
pub async fn sync_once(
    orchestrator: &SyncOrchestrator,
    retry_failed: bool,
) -> Result<SyncSummary, CliError> {
    let mut events = orchestrator.subscribe();
    let result = if retry_failed {
        orchestrator.retry_failed_items().await
    } else {
        orchestrator.trigger_sync(true).await
    };

    let mut summary = SyncSummary::default();
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::Conflict { message, .. } => summary.conflicts.push(message),
            SyncEvent::Error { error } => summary.errors.push(error),
            SyncEvent::Progress { .. } | SyncEvent::Complete { .. } => {}
        }
    }
    summary.report = result?;
    Ok(summary)
}

pub fn format_sync_summary(summary: &SyncSummary) -> Vec<String> {
    let mut lines = Vec::new();
    match summary.report {
        Some(report) => {
            let mut line = format!(
                "Sync completed: {} succeeded, {} failed",
                report.success, report.failed
            );
            if report.deferred > 0 {
                line.push_str(&format!(", {} waiting", report.deferred));
            }
            lines.push(line);
        }
        None => lines.push("Sync skipped".to_string()),
    }
    for message in &summary.conflicts {
        lines.push(format!("conflict: {message}"));
    }
    for error in &summary.errors {
        lines.push(format!("error: {error}"));
    }
    lines
}

fn print_summary(summary: &SyncSummary, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        for line in format_sync_summary(summary) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_status(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let store = open_store(db_path)?;
    let status = StatusItem {
        remote_url: config.remote_url.clone(),
        pending: store.pending_count().await?,
        failed: store.failed_mutations(config.max_retries).await?.len(),
        pending_conflicts: store.pending_conflict_count().await?,
        last_sync_at: store.last_sync_at().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(status: &StatusItem) -> Vec<String> {
    vec![
        format!(
            "remote:     {}",
            status.remote_url.as_deref().unwrap_or("not configured")
        ),
        format!("pending:    {}", status.pending),
        format!("failed:     {}", status.failed),
        format!("conflicts:  {}", status.pending_conflicts),
        format!(
            "last sync:  {}",
            status
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
    ]
}

pub async fn run_queue(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let store = open_store(db_path)?;
    let queued = store
        .dequeue_by_priority(config.queue_page_size)
        .collect()
        .await?;
    print_mutations(&queued, as_json, "Queue is empty.")
}

pub async fn run_failed(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let store = open_store(db_path)?;
    let failed = store.failed_mutations(config.max_retries).await?;
    print_mutations(&failed, as_json, "No failed items.")
}

fn print_mutations(
    mutations: &[kinen_core::PendingMutation],
    as_json: bool,
    empty_message: &str,
) -> Result<(), CliError> {
    if as_json {
        let json_items = mutations
            .iter()
            .map(mutation_to_item)
            .collect::<Vec<MutationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if mutations.is_empty() {
        println!("{empty_message}");
        return Ok(());
    }
    for line in format_mutation_lines(mutations) {
        println!("{line}");
    }
    Ok(())
}
