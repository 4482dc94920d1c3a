use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use kinen_core::models::{MutationAction, Record, RecordId, ResolutionRule, ResolutionStrategy};
use kinen_core::{
    EngineConfig, InMemoryRemote, LocalStore, ResolverConfig, SignalState, SyncOrchestrator,
};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::cli::{CompletionShell, ResolveChoice};
use crate::commands::add::add_record;
use crate::commands::common::{
    build_orchestrator, format_conflict_lines, format_mutation_lines, format_record_lines,
    format_relative_time, load_config, normalize_name, normalize_record_identifier,
    parse_assignment, resolve_record, short_id,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::conflicts::resolve_conflict;
use crate::commands::delete::delete_record;
use crate::commands::set::set_fields;
use crate::commands::sync::{format_status_lines, format_sync_summary, sync_once, StatusItem};
use crate::error::CliError;

fn temp_store() -> (TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open_path(dir.path().join("kinen.db")).unwrap();
    (dir, store)
}

fn orchestrator_for(store: &LocalStore, remote: &InMemoryRemote) -> SyncOrchestrator {
    SyncOrchestrator::new(
        store.clone(),
        Arc::new(remote.clone()),
        EngineConfig::default(),
        SignalState::default(),
    )
}

#[test]
fn parse_assignment_handles_text_bools_and_removal() {
    assert_eq!(
        parse_assignment("memo = dinner at eight").unwrap(),
        ("memo".to_string(), json!("dinner at eight"))
    );
    assert_eq!(
        parse_assignment("notify=true").unwrap(),
        ("notify".to_string(), Value::Bool(true))
    );
    assert_eq!(
        parse_assignment("memo=").unwrap(),
        ("memo".to_string(), Value::Null)
    );
    assert!(matches!(
        parse_assignment("memo"),
        Err(CliError::InvalidAssignment(_))
    ));
    assert!(matches!(
        parse_assignment("=value"),
        Err(CliError::InvalidAssignment(_))
    ));
}

#[test]
fn normalize_name_collapses_whitespace() {
    let parts = vec!["  Mom's ".to_string(), "Birthday\n".to_string()];
    assert_eq!(normalize_name(&parts).as_deref(), Some("Mom's Birthday"));
    assert_eq!(normalize_name(&[" ".to_string()]), None);
}

#[test]
fn normalize_record_identifier_rejects_empty() {
    assert!(matches!(
        normalize_record_identifier("  "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_identifier(" srv-1 ").unwrap(), "srv-1");
}

#[test]
fn format_relative_time_units() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    assert_eq!(format_relative_time(now - Duration::seconds(30), now), "just now");
    assert_eq!(format_relative_time(now - Duration::minutes(2), now), "2m ago");
    assert_eq!(format_relative_time(now - Duration::hours(2), now), "2h ago");
    assert_eq!(format_relative_time(now + Duration::hours(1), now), "just now");
}

#[test]
fn short_id_truncates_temporary_ids() {
    let id = RecordId::temporary();
    let short = short_id(&id);
    assert_eq!(short.chars().count(), 13);
    assert!(short.starts_with("tmp:"));
    assert_eq!(short_id(&RecordId::canonical("srv-7")), "srv-7");
}

#[test]
fn format_record_lines_show_name_date_and_state() {
    let mut record = Record::new("anniversary")
        .with_field("name", "Wedding")
        .with_field("date", "2019-06-15");
    record.id = RecordId::canonical("srv-3");
    record.synced = true;

    let lines = format_record_lines(&[record]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("srv-3"));
    assert!(lines[0].contains("Wedding"));
    assert!(lines[0].contains("2019-06-15"));
    assert!(lines[0].contains("synced"));
}

#[test]
fn format_status_lines_include_counts() {
    let lines = format_status_lines(&StatusItem {
        remote_url: None,
        pending: 2,
        failed: 1,
        pending_conflicts: 0,
        last_sync_at: None,
    });
    assert!(lines[0].contains("not configured"));
    assert!(lines[1].ends_with('2'));
    assert!(lines[4].contains("never"));
}

#[test]
fn load_config_defaults_when_file_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir.path().join("missing.json")).unwrap();
    assert_eq!(config.max_retries, EngineConfig::default().max_retries);
}

#[test]
fn build_orchestrator_requires_remote_url() {
    let store = LocalStore::open_in_memory().unwrap();
    let result = build_orchestrator(store, EngineConfig::default());
    assert!(matches!(result, Err(CliError::SyncNotConfigured)));
}

#[tokio::test(flavor = "multi_thread")]
async fn add_set_delete_queue_mutations_in_order() {
    let (_dir, store) = temp_store();

    let added = add_record(
        &store,
        "Mom's Birthday",
        "anniversary",
        Some("2024-05-01"),
        &["notify=true".to_string()],
    )
    .await
    .unwrap();
    assert!(added.id.is_temporary());
    assert_eq!(added.field("date"), &json!("2024-05-01"));
    assert_eq!(added.field("notify"), &json!(true));

    let query = added.id.to_string();
    let updated = set_fields(&store, &query, &["memo=flowers".to_string()])
        .await
        .unwrap();
    assert_eq!(updated.field("memo"), &json!("flowers"));

    delete_record(&store, &query).await.unwrap();
    assert!(store.get(&added.id).await.unwrap().is_none());

    let queued = store.dequeue_by_priority(8).collect().await.unwrap();
    let actions = queued
        .iter()
        .map(|mutation| mutation.action)
        .collect::<Vec<_>>();
    assert_eq!(
        actions,
        vec![
            MutationAction::Create,
            MutationAction::Update,
            MutationAction::Delete
        ]
    );
    let lines = format_mutation_lines(&queued);
    assert!(lines[0].contains("create"));
    assert!(lines[0].contains("Mom's Birthday"));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_record_supports_exact_and_prefix_id() {
    let (_dir, store) = temp_store();
    let mut record = Record::new("anniversary").with_field("name", "Wedding");
    record.id = RecordId::canonical("srv-42");
    store.put_synced(&record).await.unwrap();

    assert_eq!(
        resolve_record(&store, "srv-42").await.unwrap().id,
        record.id
    );
    assert_eq!(resolve_record(&store, "srv-4").await.unwrap().id, record.id);
    assert!(matches!(
        resolve_record(&store, "nope").await,
        Err(CliError::RecordNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_record_rejects_ambiguous_prefix() {
    let (_dir, store) = temp_store();
    add_record(&store, "First", "anniversary", None, &[])
        .await
        .unwrap();
    add_record(&store, "Second", "anniversary", None, &[])
        .await
        .unwrap();

    assert!(matches!(
        resolve_record(&store, "tmp:").await,
        Err(CliError::AmbiguousRecordId(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_once_replays_queue_and_reports() {
    let (_dir, store) = temp_store();
    let remote = InMemoryRemote::new();
    add_record(&store, "Mom's Birthday", "anniversary", Some("2024-05-01"), &[])
        .await
        .unwrap();

    let summary = sync_once(&orchestrator_for(&store, &remote), false)
        .await
        .unwrap();
    let report = summary.report.unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(report.failed, 0);
    assert!(summary.conflicts.is_empty());
    assert_eq!(
        format_sync_summary(&summary),
        vec!["Sync completed: 1 succeeded, 0 failed".to_string()]
    );

    let records = store.get_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].id.is_temporary());
    assert!(records[0].synced);
    assert_eq!(remote.records().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_conflict_surfaces_and_resolves_from_cli() {
    let (_dir, store) = temp_store();
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator_for(&store, &remote);
    orchestrator
        .resolver()
        .set_config(
            &ResolverConfig::default()
                .with_rule(ResolutionRule::new("date", ResolutionStrategy::Manual)),
        )
        .await
        .unwrap();

    let mut seeded = remote.seed(
        Record::new("anniversary")
            .with_field("name", "Wedding")
            .with_field("date", "2019-06-15"),
    );
    seeded.base_updated_at = Some(seeded.updated_at);
    store.put_synced(&seeded).await.unwrap();

    set_fields(&store, &seeded.id.to_string(), &["date=2019-06-16".to_string()])
        .await
        .unwrap();
    remote.edit_field(&seeded.id, "date", "2019-06-14").unwrap();

    let summary = sync_once(&orchestrator, false).await.unwrap();
    assert_eq!(summary.report.unwrap().failed, 1);
    assert_eq!(summary.conflicts.len(), 1);
    assert!(summary.conflicts[0].contains("Wedding"));

    let pending = orchestrator.resolver().pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(format_conflict_lines(&pending)[0].contains("pending"));

    resolve_conflict(&store, &pending[0].id, ResolveChoice::Server)
        .await
        .unwrap();
    assert!(matches!(
        resolve_conflict(&store, &pending[0].id, ResolveChoice::Local).await,
        Err(CliError::ConflictNotFound(_))
    ));

    let summary = sync_once(&orchestrator, false).await.unwrap();
    assert_eq!(summary.report.unwrap().success, 1);
    let stored = store.get(&seeded.id).await.unwrap().unwrap();
    assert_eq!(stored.field("date"), &json!("2019-06-14"));
    assert!(stored.synced);
}

#[test]
fn render_completions_names_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("kinen"));
}

#[test]
fn run_completions_writes_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("kinen.fish");

    run_completions(CompletionShell::Fish, Some(&output)).unwrap();

    let script = std::fs::read_to_string(output).unwrap();
    assert!(script.contains("complete -c kinen"));
}
